//! Volatile queue for tests and ephemeral sessions

use std::collections::BTreeMap;
use std::ops::Bound;

use async_trait::async_trait;
use parking_lot::Mutex;
use tallysync_domain::{
    truncate_error_message, NewOperation, OperationId, PendingOperation, Result, TallySyncError,
};

use super::ports::OperationQueue;

#[derive(Debug, Default)]
struct QueueState {
    next_id: u64,
    entries: BTreeMap<OperationId, PendingOperation>,
}

/// In-memory [`OperationQueue`]. Loses its contents when dropped.
#[derive(Debug, Default)]
pub struct InMemoryOperationQueue {
    state: Mutex<QueueState>,
    capacity: Option<usize>,
}

impl InMemoryOperationQueue {
    /// Unbounded empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue that rejects enqueues past `capacity` entries with `StorageFull`.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { state: Mutex::new(QueueState::default()), capacity: Some(capacity) }
    }

    /// Every queued operation, synced ones excluded.
    pub fn snapshot(&self) -> Vec<PendingOperation> {
        self.state.lock().entries.values().cloned().collect()
    }
}

fn not_found(id: OperationId) -> TallySyncError {
    TallySyncError::NotFound(format!("operation {id}"))
}

#[async_trait]
impl OperationQueue for InMemoryOperationQueue {
    async fn enqueue(&self, op: NewOperation) -> Result<OperationId> {
        let mut state = self.state.lock();
        if let Some(capacity) = self.capacity {
            if state.entries.len() >= capacity {
                return Err(TallySyncError::StorageFull(format!(
                    "queue holds {capacity} operations"
                )));
            }
        }
        state.next_id += 1;
        let id = OperationId(state.next_id);
        state.entries.insert(id, PendingOperation::from_new(id, op));
        Ok(id)
    }

    async fn peek_batch_after(
        &self,
        after: Option<OperationId>,
        max: usize,
    ) -> Result<Vec<PendingOperation>> {
        let state = self.state.lock();
        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
        Ok(state.entries.range((lower, Bound::Unbounded)).take(max).map(|(_, op)| op.clone()).collect())
    }

    async fn get(&self, id: OperationId) -> Result<Option<PendingOperation>> {
        Ok(self.state.lock().entries.get(&id).cloned())
    }

    async fn mark_synced(&self, id: OperationId) -> Result<()> {
        self.state.lock().entries.remove(&id).map(|_| ()).ok_or_else(|| not_found(id))
    }

    async fn mark_failed(
        &self,
        id: OperationId,
        error: &str,
        terminal: bool,
    ) -> Result<PendingOperation> {
        let mut state = self.state.lock();
        let op = state.entries.get_mut(&id).ok_or_else(|| not_found(id))?;
        op.attempt_count = op.attempt_count.saturating_add(1);
        op.last_error = Some(truncate_error_message(error));
        op.terminal = op.terminal || terminal;
        Ok(op.clone())
    }

    async fn evict(&self, id: OperationId) -> Result<PendingOperation> {
        let mut state = self.state.lock();
        match state.entries.get(&id) {
            None => Err(not_found(id)),
            Some(op) if !op.terminal => Err(TallySyncError::InvalidInput(format!(
                "operation {id} is not dead-lettered"
            ))),
            Some(_) => state.entries.remove(&id).ok_or_else(|| not_found(id)),
        }
    }

    async fn requeue(&self, id: OperationId) -> Result<PendingOperation> {
        let mut state = self.state.lock();
        let op = state.entries.get_mut(&id).ok_or_else(|| not_found(id))?;
        if !op.terminal {
            return Err(TallySyncError::InvalidInput(format!(
                "operation {id} is not dead-lettered"
            )));
        }
        op.terminal = false;
        op.last_error = None;
        op.attempt_count = 0;
        Ok(op.clone())
    }

    async fn pending_count(&self) -> Result<usize> {
        Ok(self.state.lock().entries.values().filter(|op| !op.terminal).count())
    }

    async fn dead_letters(&self) -> Result<Vec<PendingOperation>> {
        Ok(self.state.lock().entries.values().filter(|op| op.terminal).cloned().collect())
    }
}
