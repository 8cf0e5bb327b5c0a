//! Application context - dependency injection container
//!
//! One [`AppContext`] is built at process start and shared by `Arc` with every
//! command. Nothing in the workspace holds global state; dropping the context
//! after [`AppContext::shutdown`] releases every component.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tallysync_common::{Clock, SystemClock};
use tallysync_core::{
    CacheStore, CacheStoreConfig, OperationQueue, RealtimeChannel, RealtimeChannelConfig,
    RealtimeTransport, Reconciler, ReconcilerConfig, RemoteCommitApi, RemoteReadApi,
    SharedOverlay, SyncEngine, SyncEngineConfig,
};
use tallysync_domain::{Config, Result, TallySyncError};
use tallysync_infra::{
    DbManager, HttpRemoteApi, SqliteCacheRepository, SqliteOperationQueue, WebSocketTransport,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Time allowed for background helpers to finish after cancellation.
const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// External collaborators the context talks to. Production wiring uses
/// [`Adapters::from_config`]; tests substitute fakes.
pub struct Adapters {
    pub commit: Arc<dyn RemoteCommitApi>,
    pub read: Arc<dyn RemoteReadApi>,
    pub transport: Arc<dyn RealtimeTransport>,
    pub clock: Arc<dyn Clock>,
}

impl Adapters {
    /// HTTP remote and WebSocket transport built from `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let remote = Arc::new(HttpRemoteApi::new(&config.remote)?);
        Ok(Self {
            commit: remote.clone(),
            read: remote,
            transport: Arc::new(WebSocketTransport::new(&config.realtime.url)?),
            clock: Arc::new(SystemClock),
        })
    }
}

/// Application context - holds all services and dependencies
pub struct AppContext {
    pub config: Config,
    pub db: Arc<DbManager>,
    pub queue: Arc<dyn OperationQueue>,
    pub cache: Arc<CacheStore>,
    pub engine: Arc<SyncEngine>,
    pub channel: Arc<RealtimeChannel>,
    pub reconciler: Arc<Reconciler>,
    pub overlay: SharedOverlay,

    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("db", &self.db)
            .field("started", &self.started.load(Ordering::SeqCst))
            .field("shut_down", &self.shut_down.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl AppContext {
    /// Build the context with production adapters.
    pub async fn new(config: Config) -> Result<Self> {
        let adapters = Adapters::from_config(&config)?;
        Self::with_adapters(config, adapters).await
    }

    /// Build the context around caller-supplied adapters.
    ///
    /// Opens the database, applies the schema and loads the persisted cache.
    /// No background work starts until [`start`](Self::start).
    #[instrument(skip_all, fields(db_path = %config.database.path.display()))]
    pub async fn with_adapters(config: Config, adapters: Adapters) -> Result<Self> {
        config.validate()?;

        let db = Arc::new(DbManager::from_config(&config.database)?);

        let queue: Arc<dyn OperationQueue> = Arc::new(SqliteOperationQueue::with_capacity(
            Arc::clone(&db),
            config.sync.max_pending,
        ));

        let cache = Arc::new(
            CacheStore::open(
                Arc::new(SqliteCacheRepository::new(Arc::clone(&db))),
                Arc::clone(&adapters.clock),
                CacheStoreConfig::from(&config.cache),
            )
            .await?,
        );

        let channel = Arc::new(RealtimeChannel::new(
            adapters.transport,
            RealtimeChannelConfig::from_config(&config.realtime)?,
        ));

        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&queue),
            adapters.commit,
            SyncEngineConfig::from_config(&config.sync)?,
        ));
        if config.realtime.enabled {
            engine.set_connectivity(channel.watch());
        }

        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&cache),
            adapters.read,
            Arc::clone(&queue),
            channel.watch(),
            ReconcilerConfig::from(&config.cache),
        ));

        info!(cached_entries = cache.len(), "Application context created");

        Ok(Self {
            config,
            db,
            queue,
            cache,
            engine,
            channel,
            reconciler,
            overlay: SharedOverlay::default(),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Start background work: overlay folding of sync events and entity
    /// refreshes, cache sweeping, the reconciler,
    /// the sync worker (if enabled) and the realtime channel (if enabled).
    #[instrument(skip_all)]
    pub async fn start(&self) -> Result<()> {
        self.ensure_open()?;
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TallySyncError::InvalidInput("application context already started".into()));
        }

        // operations left over from a previous run show up as pending
        let leftover = self.queue.peek_batch(usize::MAX).await?;
        if !leftover.is_empty() {
            info!(count = leftover.len(), "Resuming unsynced operations");
        }
        self.overlay.seed(leftover);

        {
            let mut tasks = self.tasks.lock();
            tasks.push(self.overlay.follow(self.engine.subscribe(), self.cancel.child_token()));
            tasks.push(
                self.overlay
                    .follow_refreshes(self.reconciler.subscribe(), self.cancel.child_token()),
            );
            tasks.push(self.cache.spawn_sweeper(self.cancel.child_token()));
        }

        self.reconciler.start(self.channel.subscribe())?;
        if self.config.sync.enabled {
            self.engine.start()?;
        }
        if self.config.realtime.enabled {
            self.channel.connect()?;
        }

        info!(
            sync_enabled = self.config.sync.enabled,
            realtime_enabled = self.config.realtime.enabled,
            "Application context started"
        );
        Ok(())
    }

    /// Stop every component and flush the cache. Safe to call more than once.
    ///
    /// In-flight commits are abandoned; their operations stay queued and are
    /// resent on the next start.
    #[instrument(skip_all)]
    pub async fn shutdown(&self) -> Result<()> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("shutdown called on AppContext");

        self.cancel.cancel();
        let mut first_error = None;

        if let Err(e) = self.engine.stop().await {
            warn!(error = %e, "Sync engine did not stop cleanly");
            first_error.get_or_insert(e);
        }
        if let Err(e) = self.reconciler.stop().await {
            warn!(error = %e, "Reconciler did not stop cleanly");
            first_error.get_or_insert(e);
        }
        if let Err(e) = self.channel.disconnect().await {
            warn!(error = %e, "Realtime channel did not disconnect cleanly");
            first_error.get_or_insert(e);
        }

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if tokio::time::timeout(TASK_JOIN_TIMEOUT, task).await.is_err() {
                warn!("Background task did not finish within the join timeout");
            }
        }

        if let Err(e) = self.cache.flush().await {
            warn!(error = %e, "Final cache flush failed");
            first_error.get_or_insert(e);
        }

        info!("Application context shut down");
        first_error.map_or(Ok(()), Err)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// `ShuttingDown` once [`shutdown`](Self::shutdown) began.
    pub fn ensure_open(&self) -> Result<()> {
        if self.is_shut_down() {
            return Err(TallySyncError::ShuttingDown);
        }
        Ok(())
    }
}
