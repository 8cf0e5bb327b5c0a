//! Drain loop over the durable queue.
//!
//! The engine owns one background task that waits on four triggers: a wake
//! from `submit`/`skip`/`retry`, the periodic poll timer, the scheduled retry
//! deadline and (when wired) the realtime channel entering a new connected
//! session. `drain_now` runs a pass directly. Passes never overlap.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use tallysync_core::{InMemoryOperationQueue, RemoteCommitApi, SyncEngine, SyncEngineConfig};
//! use tallysync_domain::OperationKind;
//!
//! # async fn example(remote: Arc<dyn RemoteCommitApi>) -> tallysync_domain::Result<()> {
//! let queue = Arc::new(InMemoryOperationQueue::new());
//! let engine = SyncEngine::new(queue, remote, SyncEngineConfig::default());
//!
//! engine.start()?;
//! engine.submit(OperationKind::Expense, json!({"amount": 120.0})).await?;
//! // ... application runs ...
//! engine.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tallysync_common::error::ErrorClassification;
use tallysync_common::{Backoff, BackoffPolicy, EventBus, Subscription};
use tallysync_domain::constants::RETRY_BUDGET_EXHAUSTED;
use tallysync_domain::{
    CommittedRecord, ConnectionStatus, NewOperation, OperationId, OperationKind, PendingOperation,
    Result, SyncConfig, TallySyncError,
};
use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::events::{DrainOutcome, DrainReport, DrainTrigger, SyncEvent};
use super::ports::{CommitRequest, RemoteCommitApi, RemoteError};
use crate::queue::OperationQueue;

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncEngineConfig {
    /// Maximum number of operations read from the queue per page
    pub batch_size: usize,
    /// Interval between periodic drain attempts
    pub poll_interval: Duration,
    /// Upper bound on a single remote commit
    pub commit_timeout: Duration,
    /// Transient failures tolerated before an operation is dead-lettered
    pub max_attempts: Option<u32>,
    /// Delay schedule after transient failures
    pub backoff: BackoffPolicy,
    /// Join timeout when stopping
    pub join_timeout: Duration,
}

impl Default for SyncEngineConfig {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default()).unwrap_or_else(|_| Self {
            batch_size: 25,
            poll_interval: Duration::from_secs(30),
            commit_timeout: Duration::from_secs(10),
            max_attempts: None,
            backoff: BackoffPolicy::default(),
            join_timeout: Duration::from_secs(5),
        })
    }
}

impl SyncEngineConfig {
    /// Build from the `sync` configuration section.
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let backoff = BackoffPolicy::custom(
            config.backoff.base_delay(),
            config.backoff.multiplier,
            config.backoff.max_delay(),
            config.backoff.jitter,
        )
        .map_err(|e| TallySyncError::Config(format!("sync.backoff: {e}")))?;

        Ok(Self {
            batch_size: config.batch_size.max(1),
            poll_interval: config.poll_interval(),
            commit_timeout: config.commit_timeout(),
            max_attempts: config.max_attempts,
            backoff,
            join_timeout: Duration::from_secs(5),
        })
    }
}

struct RetryState {
    backoff: Backoff,
    retry_at: Option<Instant>,
}

impl RetryState {
    fn remaining(&self, now: Instant) -> Option<Duration> {
        self.retry_at.filter(|at| *at > now).map(|at| at - now)
    }
}

struct EngineShared {
    queue: Arc<dyn OperationQueue>,
    remote: Arc<dyn RemoteCommitApi>,
    config: SyncEngineConfig,
    events: EventBus<SyncEvent>,
    retry: Mutex<RetryState>,
    drain_lock: tokio::sync::Mutex<()>,
    wake: Notify,
    /// Signals the worker to re-read `retry_at`.
    reschedule: Notify,
    connectivity: RwLock<Option<watch::Receiver<ConnectionStatus>>>,
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Drives queued operations to the remote commit API.
pub struct SyncEngine {
    shared: Arc<EngineShared>,
    worker: Mutex<Option<Worker>>,
}

impl SyncEngine {
    /// Create a new engine. Nothing runs until [`start`](Self::start).
    pub fn new(
        queue: Arc<dyn OperationQueue>,
        remote: Arc<dyn RemoteCommitApi>,
        config: SyncEngineConfig,
    ) -> Self {
        let backoff = Backoff::new(config.backoff.clone());
        Self {
            shared: Arc::new(EngineShared {
                queue,
                remote,
                config,
                events: EventBus::new("sync"),
                retry: Mutex::new(RetryState { backoff, retry_at: None }),
                drain_lock: tokio::sync::Mutex::new(()),
                wake: Notify::new(),
                reschedule: Notify::new(),
                connectivity: RwLock::new(None),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Only drain while `status` reports a connected session.
    ///
    /// Must be called before [`start`](Self::start) for the worker to react
    /// to reconnects.
    pub fn set_connectivity(&self, status: watch::Receiver<ConnectionStatus>) {
        *self.shared.connectivity.write() = Some(status);
    }

    /// Bus carrying [`SyncEvent`]s.
    pub fn events(&self) -> EventBus<SyncEvent> {
        self.shared.events.clone()
    }

    /// Receive events published after this call.
    pub fn subscribe(&self) -> Subscription<SyncEvent> {
        self.shared.events.subscribe()
    }

    /// The durable queue this engine drains.
    pub fn queue(&self) -> &Arc<dyn OperationQueue> {
        &self.shared.queue
    }

    /// Queue a new mutation with a fresh idempotency token and wake the worker.
    #[instrument(skip(self, payload))]
    pub async fn submit(&self, kind: OperationKind, payload: Value) -> Result<PendingOperation> {
        let op = NewOperation::new(kind, payload);
        let id = self.shared.queue.enqueue(op.clone()).await?;
        let pending = PendingOperation::from_new(id, op);

        info!(operation_id = %id, "Operation enqueued");
        self.shared.events.publish(SyncEvent::Enqueued(pending.clone()));
        self.shared.wake.notify_one();
        Ok(pending)
    }

    /// Run one drain pass now, bypassing any scheduled backoff.
    pub async fn drain_now(&self) -> Result<DrainReport> {
        self.shared.drain(DrainTrigger::Explicit).await
    }

    /// Drop a dead-lettered operation, unblocking its kind.
    #[instrument(skip(self))]
    pub async fn skip(&self, id: OperationId) -> Result<PendingOperation> {
        let op = self.shared.queue.evict(id).await?;
        info!(operation_id = %id, kind = %op.kind, "Dead letter skipped");
        self.shared.events.publish(SyncEvent::Evicted { id, kind: op.kind });
        self.shared.wake.notify_one();
        Ok(op)
    }

    /// Return a dead-lettered operation to the live queue.
    #[instrument(skip(self))]
    pub async fn retry(&self, id: OperationId) -> Result<PendingOperation> {
        let op = self.shared.queue.requeue(id).await?;
        info!(operation_id = %id, kind = %op.kind, "Dead letter requeued");
        self.shared.events.publish(SyncEvent::Requeued(op.clone()));
        self.shared.wake.notify_one();
        Ok(op)
    }

    /// Operations not yet synced, dead letters excluded.
    pub async fn pending_count(&self) -> Result<usize> {
        self.shared.queue.pending_count().await
    }

    /// Operations parked after a permanent failure or too many retries.
    pub async fn dead_letters(&self) -> Result<Vec<PendingOperation>> {
        self.shared.queue.dead_letters().await
    }

    /// Time left before the scheduled retry, if one is pending.
    pub fn backoff_remaining(&self) -> Option<Duration> {
        self.shared.retry.lock().remaining(Instant::now())
    }

    /// Start the background drain loop.
    #[instrument(skip(self))]
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(TallySyncError::InvalidInput("sync engine already running".into()));
        }

        let runtime = Handle::try_current()
            .map_err(|_| TallySyncError::Internal("sync engine requires a Tokio runtime".into()))?;

        let cancel = CancellationToken::new();
        let shared = Arc::clone(&self.shared);
        let handle = runtime.spawn(shared.run(cancel.clone()));
        *worker = Some(Worker { cancel, handle });

        info!("Sync engine started");
        Ok(())
    }

    /// Stop the drain loop, aborting an in-flight pass.
    ///
    /// Operations whose acknowledgment was not recorded stay queued and are
    /// resent with the same idempotency token.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<()> {
        let Some(worker) = self.worker.lock().take() else {
            debug!("Sync engine not running");
            return Ok(());
        };

        info!("Stopping sync engine");
        worker.cancel.cancel();

        match tokio::time::timeout(self.shared.config.join_timeout, worker.handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(error = %e, "Sync worker task panicked");
                return Err(TallySyncError::Internal("sync worker task panicked".into()));
            }
            Err(_) => {
                warn!("Sync worker task did not complete within timeout");
                return Err(TallySyncError::Timeout("sync worker shutdown".into()));
            }
        }

        info!("Sync engine stopped");
        Ok(())
    }

    /// Whether the background worker is active.
    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }
}

impl EngineShared {
    fn is_online(&self) -> bool {
        self.connectivity.read().as_ref().map_or(true, |rx| rx.borrow().is_connected())
    }

    /// Background loop; runs until `cancel` fires.
    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut connectivity = self.connectivity.read().clone();
        let mut seen_session = connectivity.as_ref().map_or(0, |rx| rx.borrow().session);

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let retry_at = self.retry.lock().retry_at;
            let trigger = tokio::select! {
                () = cancel.cancelled() => {
                    debug!("Sync drain loop cancelled");
                    break;
                }
                () = self.wake.notified() => DrainTrigger::Submitted,
                () = self.reschedule.notified() => continue,
                _ = ticker.tick() => DrainTrigger::Periodic,
                () = sleep_until(retry_at) => {
                    self.retry.lock().retry_at = None;
                    DrainTrigger::BackoffElapsed
                }
                regained = connectivity_regained(&mut connectivity, &mut seen_session) => {
                    if !regained {
                        continue;
                    }
                    DrainTrigger::ConnectivityRegained
                }
            };

            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("Drain pass aborted by shutdown");
                    break;
                }
                result = self.drain(trigger) => {
                    if let Err(e) = result {
                        error!(error = %e, trigger = ?trigger, "Drain pass failed");
                    }
                }
            }
        }
    }

    #[instrument(skip(self))]
    async fn drain(&self, trigger: DrainTrigger) -> Result<DrainReport> {
        let mut report = DrainReport::new(trigger);

        if !self.is_online() {
            debug!("Skipping drain while offline");
            report.outcome = DrainOutcome::Offline;
            return Ok(report);
        }
        if trigger.respects_backoff() {
            if let Some(remaining) = self.retry.lock().remaining(Instant::now()) {
                debug!(remaining_ms = remaining.as_millis(), "Skipping drain during backoff");
                report.outcome = DrainOutcome::BackingOff { remaining };
                return Ok(report);
            }
        }

        let _pass = self.drain_lock.lock().await;
        let mut blocked: HashSet<OperationKind> = HashSet::new();
        let mut cursor = None;

        'pages: loop {
            let batch = self.queue.peek_batch_after(cursor, self.config.batch_size).await?;
            if batch.is_empty() {
                break;
            }

            for op in batch {
                cursor = Some(op.id);

                if op.terminal {
                    blocked.insert(op.kind);
                    continue;
                }
                if blocked.contains(&op.kind) {
                    report.blocked += 1;
                    continue;
                }
                if !self.is_online() {
                    report.outcome = DrainOutcome::Offline;
                    break 'pages;
                }

                match self.commit(&op).await {
                    Ok(record) => {
                        self.on_committed(&op, record).await?;
                        report.committed += 1;
                    }
                    Err(err) if err.is_retryable() => {
                        if let Some(retry_in) = self.on_transient(&op, &err).await? {
                            report.outcome = DrainOutcome::Halted { retry_in };
                            break 'pages;
                        }
                        blocked.insert(op.kind);
                        report.dead_lettered += 1;
                    }
                    Err(err) => {
                        self.dead_letter(&op, &err.to_string()).await?;
                        blocked.insert(op.kind);
                        report.dead_lettered += 1;
                    }
                }
            }
        }

        if report.committed > 0 || report.dead_lettered > 0 {
            info!(
                committed = report.committed,
                dead_lettered = report.dead_lettered,
                blocked = report.blocked,
                outcome = ?report.outcome,
                "Drain pass finished"
            );
        }
        self.events.publish(SyncEvent::DrainCompleted(report.clone()));
        Ok(report)
    }

    async fn commit(&self, op: &PendingOperation) -> std::result::Result<CommittedRecord, RemoteError> {
        let request = CommitRequest::from(op);
        match tokio::time::timeout(self.config.commit_timeout, self.remote.commit(&request)).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(format!(
                "no response within {}ms",
                self.config.commit_timeout.as_millis()
            ))),
        }
    }

    async fn on_committed(&self, op: &PendingOperation, record: CommittedRecord) -> Result<()> {
        self.queue.mark_synced(op.id).await?;
        {
            let mut retry = self.retry.lock();
            retry.backoff.reset();
            retry.retry_at = None;
        }

        debug!(operation_id = %op.id, server_id = %record.server_id, "Operation committed");
        self.events.publish(SyncEvent::Committed { id: op.id, record });
        Ok(())
    }

    /// Record a transient failure. Returns the retry delay, or `None` when the
    /// retry budget is spent and the operation was dead-lettered instead.
    async fn on_transient(&self, op: &PendingOperation, err: &RemoteError) -> Result<Option<Duration>> {
        let attempt = op.attempt_count.saturating_add(1);
        if self.config.max_attempts.is_some_and(|max| attempt >= max) {
            self.dead_letter(op, &format!("{RETRY_BUDGET_EXHAUSTED}: {err}")).await?;
            return Ok(None);
        }

        self.queue.mark_failed(op.id, &err.to_string(), false).await?;

        let delay = {
            let mut retry = self.retry.lock();
            let mut delay = retry.backoff.next_delay();
            if let Some(hint) = err.retry_after() {
                delay = delay.max(hint);
            }
            retry.retry_at = Some(Instant::now() + delay);
            delay
        };
        // the worker may be parked without a deadline, e.g. after `drain_now`
        self.reschedule.notify_one();

        warn!(
            operation_id = %op.id,
            kind = %op.kind,
            attempt,
            delay_ms = delay.as_millis(),
            error = %err,
            "Transient commit failure, retry scheduled"
        );
        self.events.publish(SyncEvent::RetryScheduled {
            id: op.id,
            kind: op.kind,
            attempt,
            delay,
            error: err.to_string(),
        });
        Ok(Some(delay))
    }

    async fn dead_letter(&self, op: &PendingOperation, reason: &str) -> Result<()> {
        let updated = self.queue.mark_failed(op.id, reason, true).await?;
        let error = updated.last_error.unwrap_or_else(|| reason.to_owned());

        warn!(operation_id = %op.id, kind = %op.kind, error = %error, "Operation dead-lettered");
        self.events.publish(SyncEvent::DeadLettered { id: op.id, kind: op.kind, error });
        Ok(())
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Resolves `true` when the watched status enters a connected session not
/// seen before. Never resolves without a receiver.
async fn connectivity_regained(
    connectivity: &mut Option<watch::Receiver<ConnectionStatus>>,
    seen_session: &mut u64,
) -> bool {
    let Some(receiver) = connectivity.as_mut() else {
        return std::future::pending().await;
    };
    if receiver.changed().await.is_err() {
        *connectivity = None;
        return false;
    }

    let status = receiver.borrow_and_update().clone();
    if status.is_connected() && status.session != *seen_session {
        *seen_session = status.session;
        return true;
    }
    false
}
