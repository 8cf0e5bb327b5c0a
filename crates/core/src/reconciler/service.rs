use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde_json::Value;
use tallysync_common::{EventBus, Subscription};
use tallysync_domain::{
    CacheConfig, CacheKey, ConnectionState, ConnectionStatus, NotificationEvent, NotificationKind,
    OperationKind, Result, SyncStatus, TallySyncError,
};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::events::ReconcilerEvent;
use super::ports::RemoteReadApi;
use crate::cache::{CacheLookup, CacheStore};
use crate::queue::ports::OperationQueue;

type RefreshFuture = Shared<BoxFuture<'static, Result<Value>>>;

/// Reconciler timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Notification-triggered refreshes of one key within this window merge.
    pub refresh_debounce: Duration,
    /// Join timeout when stopping
    pub join_timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

impl From<&CacheConfig> for ReconcilerConfig {
    fn from(config: &CacheConfig) -> Self {
        Self { refresh_debounce: config.refresh_debounce(), join_timeout: Duration::from_secs(5) }
    }
}

/// Cache keys affected by a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    Keys(Vec<CacheKey>),
    /// No entity named; every tracked key may be affected.
    AllTracked,
    /// Invalidate everything and reload, as after a reconnect.
    FullRefresh,
}

/// Map a notification to the cache keys it invalidates.
pub fn bound_keys(event: &NotificationEvent) -> Binding {
    match event.kind {
        NotificationKind::Created | NotificationKind::Updated | NotificationKind::Deleted => {
            match event.entity() {
                Some(entity) => Binding::Keys(vec![CacheKey::entity(entity), CacheKey::summary()]),
                None => Binding::AllTracked,
            }
        }
        NotificationKind::BillGenerated => {
            Binding::Keys(vec![CacheKey::for_kind(OperationKind::Payment), CacheKey::summary()])
        }
        NotificationKind::RefreshRequested => Binding::FullRefresh,
    }
}

struct ReconcilerShared {
    cache: Arc<CacheStore>,
    remote: Arc<dyn RemoteReadApi>,
    queue: Arc<dyn OperationQueue>,
    connection: watch::Receiver<ConnectionStatus>,
    config: ReconcilerConfig,
    events: EventBus<ReconcilerEvent>,
    in_flight: DashMap<CacheKey, InFlight>,
    tracked: DashSet<CacheKey>,
    debouncing: Mutex<HashSet<CacheKey>>,
    /// Source of invalidation generations.
    generation: AtomicU64,
    /// Generation of the last `invalidate_all`.
    all_invalidated_at: AtomicU64,
    /// Generation of the last invalidation per key.
    invalidated_at: DashMap<CacheKey, u64>,
}

/// A remote read and the invalidation generation it started under. Reads
/// older than the key's current generation may return pre-change data and
/// are never joined.
struct InFlight {
    generation: u64,
    future: RefreshFuture,
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Keeps cached reads in line with server-side changes.
pub struct Reconciler {
    shared: Arc<ReconcilerShared>,
    worker: Mutex<Option<Worker>>,
}

impl Reconciler {
    /// Build a stopped reconciler over `cache`. Call [`Reconciler::start`]
    /// to begin consuming notifications.
    pub fn new(
        cache: Arc<CacheStore>,
        remote: Arc<dyn RemoteReadApi>,
        queue: Arc<dyn OperationQueue>,
        connection: watch::Receiver<ConnectionStatus>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            shared: Arc::new(ReconcilerShared {
                cache,
                remote,
                queue,
                connection,
                config,
                events: EventBus::new("reconciler"),
                in_flight: DashMap::new(),
                tracked: DashSet::new(),
                debouncing: Mutex::new(HashSet::new()),
                generation: AtomicU64::new(0),
                all_invalidated_at: AtomicU64::new(0),
                invalidated_at: DashMap::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Bus carrying refresh outcomes.
    pub fn events(&self) -> EventBus<ReconcilerEvent> {
        self.shared.events.clone()
    }

    /// Receive [`ReconcilerEvent`]s published from now on.
    pub fn subscribe(&self) -> Subscription<ReconcilerEvent> {
        self.shared.events.subscribe()
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.shared.cache
    }

    /// Read through the cache.
    ///
    /// A fresh hit returns immediately. A stale hit returns the stale value
    /// and refreshes in the background. A miss waits for the remote.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn read(&self, key: &CacheKey) -> Result<Value> {
        self.shared.tracked.insert(key.clone());

        match self.shared.cache.get(key) {
            CacheLookup::Fresh(value) => Ok(value),
            CacheLookup::Stale(value) => {
                let (refresh, started) = self.shared.refresh_future(key);
                if started {
                    tokio::spawn(async move {
                        let _ = refresh.await;
                    });
                }
                Ok(value)
            }
            CacheLookup::Miss => self.shared.refresh_future(key).0.await,
        }
    }

    /// Fetch `key` from the remote. Joins a read already in flight unless
    /// the key was invalidated after that read started.
    pub async fn refresh(&self, key: &CacheKey) -> Result<Value> {
        self.shared.tracked.insert(key.clone());
        self.shared.refresh_future(key).0.await
    }

    /// Apply one notification: invalidate its keys and schedule refreshes.
    #[instrument(skip_all, fields(kind = %event.kind))]
    pub async fn handle_notification(&self, event: &NotificationEvent) -> Binding {
        self.shared.handle_notification(event).await
    }

    /// Invalidate every entry and reload all tracked keys.
    pub async fn full_refresh(&self, reason: impl Into<String>) -> Vec<CacheKey> {
        self.shared.full_refresh(reason.into()).await
    }

    /// Keys read through this reconciler plus everything in the cache.
    pub fn tracked_keys(&self) -> Vec<CacheKey> {
        self.shared.tracked_keys()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.shared.connection.borrow().clone()
    }

    /// Connection state plus the unsynced and dead-letter counts.
    pub async fn status(&self) -> Result<SyncStatus> {
        let pending_count = self.shared.queue.pending_count().await?;
        let dead_letter_count = self.shared.queue.dead_letters().await?.len();
        Ok(SyncStatus { connection: self.connection_status(), pending_count, dead_letter_count })
    }

    /// Start consuming notifications and watching for new sessions.
    pub fn start(&self, notifications: Subscription<NotificationEvent>) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(TallySyncError::InvalidInput("reconciler already running".into()));
        }

        let runtime = Handle::try_current()
            .map_err(|_| TallySyncError::Internal("reconciler requires a Tokio runtime".into()))?;

        let cancel = CancellationToken::new();
        let connection = self.shared.connection.clone();
        let handle = runtime.spawn(Arc::clone(&self.shared).run(
            notifications,
            connection,
            cancel.clone(),
        ));
        *worker = Some(Worker { cancel, handle });

        info!("Reconciler started");
        Ok(())
    }

    /// Cancel the worker and wait up to `join_timeout` for it. Stopping a
    /// stopped reconciler is a no-op.
    pub async fn stop(&self) -> Result<()> {
        let Some(worker) = self.worker.lock().take() else {
            return Ok(());
        };

        worker.cancel.cancel();
        match tokio::time::timeout(self.shared.config.join_timeout, worker.handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(error = %e, "Reconciler task panicked");
                return Err(TallySyncError::Internal("reconciler task panicked".into()));
            }
            Err(_) => {
                warn!("Reconciler task did not complete within timeout");
                return Err(TallySyncError::Timeout("reconciler shutdown".into()));
            }
        }

        info!("Reconciler stopped");
        Ok(())
    }

    /// Whether [`Reconciler::start`] was called without a matching stop.
    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }
}

impl ReconcilerShared {
    async fn run(
        self: Arc<Self>,
        mut notifications: Subscription<NotificationEvent>,
        mut connection: watch::Receiver<ConnectionStatus>,
        cancel: CancellationToken,
    ) {
        let mut session = connection.borrow_and_update().session;
        let mut listening = true;
        let mut watching = true;

        loop {
            if !listening && !watching {
                cancel.cancelled().await;
                break;
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                event = notifications.recv(), if listening => {
                    let Some(event) = event else {
                        debug!("Notification bus closed");
                        listening = false;
                        continue;
                    };
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        _ = self.handle_notification(&event) => {}
                    }
                }
                changed = connection.changed(), if watching => {
                    if changed.is_err() {
                        debug!("Connection status publisher dropped");
                        watching = false;
                        continue;
                    }

                    let status = connection.borrow_and_update().clone();
                    if status.state != ConnectionState::Connected || status.session == session {
                        continue;
                    }
                    session = status.session;

                    tokio::select! {
                        () = cancel.cancelled() => break,
                        _ = self.full_refresh(format!("connected (session {session})")) => {}
                    }
                }
            }
        }
    }

    async fn handle_notification(self: &Arc<Self>, event: &NotificationEvent) -> Binding {
        let binding = bound_keys(event);
        match &binding {
            Binding::FullRefresh => {
                self.full_refresh(format!("{} notification", event.kind)).await;
            }
            Binding::Keys(keys) => self.invalidate_and_schedule(keys.iter().cloned()),
            Binding::AllTracked => self.invalidate_and_schedule(self.tracked_keys()),
        }
        binding
    }

    fn invalidate_and_schedule(self: &Arc<Self>, keys: impl IntoIterator<Item = CacheKey>) {
        for key in keys {
            // bump before invalidating so a read finishing in between cannot store fresh
            let generation = self.next_generation();
            self.invalidated_at.insert(key.clone(), generation);
            self.cache.invalidate(&key);
            self.schedule_refresh(key);
        }
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn current_generation(&self, key: &CacheKey) -> u64 {
        let for_key = self.invalidated_at.get(key).map_or(0, |generation| *generation);
        for_key.max(self.all_invalidated_at.load(Ordering::SeqCst))
    }

    /// Refresh `key` once the debounce window closes. Requests arriving
    /// while one is pending merge into it.
    fn schedule_refresh(self: &Arc<Self>, key: CacheKey) {
        if !self.debouncing.lock().insert(key.clone()) {
            debug!(key = %key, "Refresh already scheduled");
            return;
        }

        let shared = Arc::clone(self);
        let delay = self.config.refresh_debounce;
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            shared.debouncing.lock().remove(&key);
            let _ = shared.refresh_future(&key).0.await;
        });
    }

    fn tracked_keys(&self) -> Vec<CacheKey> {
        let mut keys: BTreeSet<CacheKey> = self.tracked.iter().map(|key| key.clone()).collect();
        keys.extend(self.cache.keys());
        keys.into_iter().collect()
    }

    async fn full_refresh(self: &Arc<Self>, reason: String) -> Vec<CacheKey> {
        let generation = self.next_generation();
        self.all_invalidated_at.fetch_max(generation, Ordering::SeqCst);
        let invalidated = self.cache.invalidate_all();
        let keys = self.tracked_keys();
        info!(reason = %reason, invalidated, keys = keys.len(), "Full refresh");
        self.events.publish(ReconcilerEvent::FullRefresh { reason, keys: keys.clone() });

        let results = join_all(keys.iter().map(|key| self.refresh_future(key).0)).await;
        let failed = results.iter().filter(|result| result.is_err()).count();
        if failed > 0 {
            warn!(failed, total = keys.len(), "Some keys failed to refresh");
        }
        keys
    }

    /// Shared future for the remote read of `key`, and whether this call
    /// started it. Joins an in-flight read only if no invalidation of `key`
    /// happened since it started.
    fn refresh_future(self: &Arc<Self>, key: &CacheKey) -> (RefreshFuture, bool) {
        let generation = self.current_generation(key);
        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) if entry.get().generation >= generation => {
                debug!(key = %key, "Joining in-flight refresh");
                (entry.get().future.clone(), false)
            }
            Entry::Occupied(mut entry) => {
                debug!(key = %key, "In-flight refresh predates an invalidation, starting another");
                let future = self.spawn_fetch(key.clone(), generation);
                entry.insert(InFlight { generation, future: future.clone() });
                (future, true)
            }
            Entry::Vacant(entry) => {
                let future = self.spawn_fetch(key.clone(), generation);
                entry.insert(InFlight { generation, future: future.clone() });
                (future, true)
            }
        }
    }

    fn spawn_fetch(self: &Arc<Self>, key: CacheKey, generation: u64) -> RefreshFuture {
        let shared: Weak<Self> = Arc::downgrade(self);
        async move {
            match shared.upgrade() {
                Some(shared) => shared.fetch_and_store(key, generation).await,
                None => Err(TallySyncError::ShuttingDown),
            }
        }
        .boxed()
        .shared()
    }

    async fn fetch_and_store(&self, key: CacheKey, generation: u64) -> Result<Value> {
        debug!(key = %key, generation, "Refreshing from remote");
        let outcome = match self.remote.fetch(&key).await {
            Ok(value) if self.current_generation(&key) > generation => {
                // invalidated while in flight; keep only as a fallback for an empty slot
                debug!(key = %key, "Refresh result predates an invalidation, storing as stale");
                if matches!(self.cache.get(&key), CacheLookup::Miss) {
                    self.cache.put(key.clone(), value.clone(), None);
                    self.cache.invalidate(&key);
                }
                Ok(value)
            }
            Ok(value) => {
                self.cache.put(key.clone(), value.clone(), None);
                self.events.publish(ReconcilerEvent::Refreshed { key: key.clone(), value: value.clone() });
                Ok(value)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Refresh failed");
                self.events
                    .publish(ReconcilerEvent::RefreshFailed { key: key.clone(), error: e.to_string() });
                Err(TallySyncError::from(e))
            }
        };
        self.in_flight.remove_if(&key, |_, in_flight| in_flight.generation == generation);
        outcome
    }
}
