//! Cache store with freshness tracking and ordered write-behind persistence.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use tallysync_common::Clock;
use tallysync_domain::{CacheConfig, CacheEntry, CacheKey, Result, TallySyncError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::ports::CacheRepository;

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// Within its TTL and not invalidated.
    Fresh(Value),
    /// Expired or invalidated; usable as fallback while a refresh runs.
    Stale(Value),
    /// Never stored, removed, or swept.
    Miss,
}

impl CacheLookup {
    /// The cached value, fresh or stale.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Fresh(value) | Self::Stale(value) => Some(value),
            Self::Miss => None,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh(_))
    }
}

/// Timing knobs for the cache store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStoreConfig {
    /// TTL applied when `put` is given none.
    pub default_ttl: Duration,
    /// How long a stale entry survives before the sweep drops it.
    pub stale_retention: Duration,
    /// Period of the background sweep.
    pub sweep_interval: Duration,
}

impl Default for CacheStoreConfig {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

impl From<&CacheConfig> for CacheStoreConfig {
    fn from(config: &CacheConfig) -> Self {
        Self {
            default_ttl: config.default_ttl(),
            stale_retention: config.stale_retention(),
            sweep_interval: config.sweep_interval(),
        }
    }
}

enum WriteCommand {
    Upsert(CacheEntry),
    Delete(CacheKey),
    Flush(oneshot::Sender<()>),
}

/// Key/value cache of remote reads.
///
/// Mutations of one key are serialized by the map's shard lock, and the
/// matching persistence command is queued while that lock is held, so the
/// single writer applies them in mutation order.
pub struct CacheStore {
    entries: DashMap<CacheKey, CacheEntry>,
    clock: Arc<dyn Clock>,
    config: CacheStoreConfig,
    writer: Option<mpsc::UnboundedSender<WriteCommand>>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("entries", &self.entries.len())
            .field("config", &self.config)
            .field("persistent", &self.writer.is_some())
            .finish()
    }
}

impl CacheStore {
    /// Volatile store without a backing repository.
    pub fn in_memory(clock: Arc<dyn Clock>, config: CacheStoreConfig) -> Self {
        Self { entries: DashMap::new(), clock, config, writer: None }
    }

    /// Load persisted entries and start the writer task.
    #[instrument(skip_all)]
    pub async fn open(
        repository: Arc<dyn CacheRepository>,
        clock: Arc<dyn Clock>,
        config: CacheStoreConfig,
    ) -> Result<Self> {
        let loaded = repository.load_all().await?;
        let entries = DashMap::with_capacity(loaded.len());
        for entry in loaded {
            entries.insert(entry.key.clone(), entry);
        }
        info!(entries = entries.len(), "Cache store loaded");

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(repository, rx));

        Ok(Self { entries, clock, config, writer: Some(tx) })
    }

    pub fn config(&self) -> &CacheStoreConfig {
        &self.config
    }

    fn now_ms(&self) -> u64 {
        self.clock.millis_since_epoch()
    }

    fn persist(&self, command: WriteCommand) {
        if let Some(writer) = &self.writer {
            if writer.send(command).is_err() {
                warn!("Cache writer stopped; change kept in memory only");
            }
        }
    }

    /// Look up `key` and classify it against the clock.
    pub fn get(&self, key: &CacheKey) -> CacheLookup {
        let now = self.now_ms();
        match self.entries.get(key) {
            Some(entry) if entry.is_fresh(now) => CacheLookup::Fresh(entry.value.clone()),
            Some(entry) => CacheLookup::Stale(entry.value.clone()),
            None => CacheLookup::Miss,
        }
    }

    /// Raw entry with its timestamps, regardless of freshness.
    pub fn get_entry(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.get(key).map(|entry| entry.clone())
    }

    /// Store `value` under `key`, fresh for `ttl` (or the default TTL).
    pub fn put(&self, key: CacheKey, value: Value, ttl: Option<Duration>) {
        let entry =
            CacheEntry::new(key.clone(), value, self.now_ms(), ttl.unwrap_or(self.config.default_ttl));
        let guard = self.entries.entry(key).insert(entry.clone());
        self.persist(WriteCommand::Upsert(entry));
        drop(guard);
    }

    /// Mark `key` stale, keeping its value. Returns `false` on a miss.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let now = self.now_ms();
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.invalidate(now);
                self.persist(WriteCommand::Upsert(entry.clone()));
                true
            }
            None => false,
        }
    }

    /// Mark every entry stale. Returns how many entries were touched.
    pub fn invalidate_all(&self) -> usize {
        let now = self.now_ms();
        let mut touched = 0;
        for mut entry in self.entries.iter_mut() {
            entry.invalidate(now);
            self.persist(WriteCommand::Upsert(entry.clone()));
            touched += 1;
        }
        debug!(touched, "Invalidated all cache entries");
        touched
    }

    /// Delete `key` outright. Returns `false` on a miss.
    pub fn remove(&self, key: &CacheKey) -> bool {
        match self.entries.entry(key.clone()) {
            Entry::Occupied(occupied) => {
                self.persist(WriteCommand::Delete(key.clone()));
                occupied.remove();
                true
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Drop entries that have been stale for longer than the retention window.
    pub fn sweep(&self) -> usize {
        let now = self.now_ms();
        let retention = u64::try_from(self.config.stale_retention.as_millis()).unwrap_or(u64::MAX);
        let expired = |entry: &CacheEntry| {
            !entry.is_fresh(now) && now.saturating_sub(entry.stale_since_ms()) >= retention
        };

        let candidates: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|entry| expired(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for key in candidates {
            if let Entry::Occupied(occupied) = self.entries.entry(key) {
                if expired(occupied.get()) {
                    self.persist(WriteCommand::Delete(occupied.key().clone()));
                    occupied.remove();
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            debug!(removed, "Swept stale cache entries");
        }
        removed
    }

    pub fn keys(&self) -> Vec<CacheKey> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Wait until every change made so far reached the repository.
    pub async fn flush(&self) -> Result<()> {
        let Some(writer) = &self.writer else {
            return Ok(());
        };
        let (tx, rx) = oneshot::channel();
        writer
            .send(WriteCommand::Flush(tx))
            .map_err(|_| TallySyncError::Internal("cache writer stopped".into()))?;
        rx.await.map_err(|_| TallySyncError::Internal("cache writer stopped".into()))
    }

    /// Run [`sweep`](Self::sweep) every `sweep_interval` until cancelled.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(store.config.sweep_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        store.sweep();
                    }
                }
            }
            debug!("Cache sweeper stopped");
        })
    }
}

async fn run_writer(
    repository: Arc<dyn CacheRepository>,
    mut commands: mpsc::UnboundedReceiver<WriteCommand>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            WriteCommand::Upsert(entry) => {
                if let Err(e) = repository.upsert(&entry).await {
                    warn!(key = %entry.key, error = %e, "Failed to persist cache entry");
                }
            }
            WriteCommand::Delete(key) => {
                if let Err(e) = repository.delete(&key).await {
                    warn!(key = %key, error = %e, "Failed to delete cache entry");
                }
            }
            WriteCommand::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    debug!("Cache writer stopped");
}
