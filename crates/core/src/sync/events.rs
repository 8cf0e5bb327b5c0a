//! Events published by the sync engine

use std::time::Duration;

use tallysync_domain::{CommittedRecord, OperationId, OperationKind, PendingOperation};

/// What started a drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainTrigger {
    /// `drain_now` from the command surface.
    Explicit,
    /// A new operation was submitted or a dead letter was resolved.
    Submitted,
    /// The realtime channel entered a new connected session.
    ConnectivityRegained,
    /// The periodic poll timer fired.
    Periodic,
    /// The scheduled retry delay elapsed.
    BackoffElapsed,
}

impl DrainTrigger {
    /// Explicit and connectivity triggers retry immediately; the rest wait
    /// for a scheduled backoff to elapse.
    pub fn respects_backoff(self) -> bool {
        matches!(self, Self::Submitted | Self::Periodic)
    }
}

/// How a drain pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every sendable operation was attempted.
    Completed,
    /// A transient failure stopped the pass; the next attempt is scheduled.
    Halted { retry_in: Duration },
    /// Not connected, nothing was sent.
    Offline,
    /// A scheduled retry has not elapsed yet, nothing was sent.
    BackingOff { remaining: Duration },
}

/// Summary of one drain pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport {
    pub trigger: DrainTrigger,
    pub outcome: DrainOutcome,
    pub committed: usize,
    pub dead_lettered: usize,
    /// Operations held back behind a dead letter of the same kind.
    pub blocked: usize,
}

impl DrainReport {
    pub(crate) fn new(trigger: DrainTrigger) -> Self {
        Self { trigger, outcome: DrainOutcome::Completed, committed: 0, dead_lettered: 0, blocked: 0 }
    }
}

/// Sync lifecycle notifications, delivered on the engine's bus.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Enqueued(PendingOperation),
    Committed { id: OperationId, record: CommittedRecord },
    RetryScheduled { id: OperationId, kind: OperationKind, attempt: u32, delay: Duration, error: String },
    DeadLettered { id: OperationId, kind: OperationKind, error: String },
    Evicted { id: OperationId, kind: OperationKind },
    Requeued(PendingOperation),
    DrainCompleted(DrainReport),
}
