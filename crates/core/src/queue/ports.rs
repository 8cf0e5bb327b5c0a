//! Port interface for the durable operation queue

use async_trait::async_trait;
use tallysync_domain::{NewOperation, OperationId, PendingOperation, Result};

/// Queue of mutations awaiting remote acknowledgment.
///
/// Every method is atomic per operation id. An operation leaves the queue only
/// through [`mark_synced`](Self::mark_synced) or, once dead-lettered, through
/// [`evict`](Self::evict).
#[async_trait]
pub trait OperationQueue: Send + Sync {
    /// Persist a new operation and assign it the next id.
    ///
    /// Fails with `StorageFull` when the medium or configured capacity is exhausted.
    async fn enqueue(&self, op: NewOperation) -> Result<OperationId>;

    /// Unsynced operations with an id greater than `after`, in creation order.
    ///
    /// Dead-lettered operations are included so callers can tell which kinds
    /// are blocked.
    async fn peek_batch_after(
        &self,
        after: Option<OperationId>,
        max: usize,
    ) -> Result<Vec<PendingOperation>>;

    /// First `max` unsynced operations in creation order.
    async fn peek_batch(&self, max: usize) -> Result<Vec<PendingOperation>> {
        self.peek_batch_after(None, max).await
    }

    /// Look up one operation.
    async fn get(&self, id: OperationId) -> Result<Option<PendingOperation>>;

    /// Remove an acknowledged operation. `NotFound` if it is not queued.
    async fn mark_synced(&self, id: OperationId) -> Result<()>;

    /// Record a failed attempt and return the updated operation.
    ///
    /// Increments `attempt_count`; `terminal` dead-letters the operation.
    async fn mark_failed(
        &self,
        id: OperationId,
        error: &str,
        terminal: bool,
    ) -> Result<PendingOperation>;

    /// Remove a dead-lettered operation. `InvalidInput` if it is not terminal.
    async fn evict(&self, id: OperationId) -> Result<PendingOperation>;

    /// Return a dead-lettered operation to the live queue.
    async fn requeue(&self, id: OperationId) -> Result<PendingOperation>;

    /// Number of unsynced operations that will still be sent.
    async fn pending_count(&self) -> Result<usize>;

    /// Operations the remote rejected, oldest first.
    async fn dead_letters(&self) -> Result<Vec<PendingOperation>>;
}
