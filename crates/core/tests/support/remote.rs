use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tallysync_core::{CommitRequest, RemoteCommitApi, RemoteError, RemoteReadApi};
use tallysync_domain::{CacheKey, CommittedRecord, OperationKind};
use tokio::sync::Notify;

/// In-memory remote service.
///
/// Commits are deduplicated by idempotency token, so a replay returns the
/// original record without a second effect.
#[derive(Default)]
pub struct FakeRemote {
    committed: Mutex<HashMap<String, CommittedRecord>>,
    effects: Mutex<Vec<CommittedRecord>>,
    commit_failures: Mutex<VecDeque<RemoteError>>,
    rejected_kinds: Mutex<HashSet<OperationKind>>,
    commit_calls: AtomicUsize,
    views: Mutex<HashMap<String, Value>>,
    read_calls: AtomicUsize,
    read_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next commit with `error`.
    pub fn fail_next_commit(&self, error: RemoteError) {
        self.commit_failures.lock().push_back(error);
    }

    /// Reject every commit of `kind` until [`accept_kind`](Self::accept_kind).
    pub fn reject_kind(&self, kind: OperationKind) {
        self.rejected_kinds.lock().insert(kind);
    }

    pub fn accept_kind(&self, kind: OperationKind) {
        self.rejected_kinds.lock().remove(&kind);
    }

    pub fn effects(&self) -> Vec<CommittedRecord> {
        self.effects.lock().clone()
    }

    pub fn commit_calls(&self) -> usize {
        self.commit_calls.load(Ordering::SeqCst)
    }

    pub fn set_view(&self, key: &str, value: Value) {
        self.views.lock().insert(key.to_owned(), value);
    }

    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    /// Hold every read until the returned gate is notified.
    pub fn gate_reads(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.read_gate.lock() = Some(Arc::clone(&gate));
        gate
    }
}

#[async_trait]
impl RemoteCommitApi for FakeRemote {
    async fn commit(&self, request: &CommitRequest) -> Result<CommittedRecord, RemoteError> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = self.commit_failures.lock().pop_front() {
            return Err(error);
        }
        if self.rejected_kinds.lock().contains(&request.kind) {
            return Err(RemoteError::Rejected {
                status: Some(422),
                message: format!("{} failed validation", request.kind),
            });
        }

        let mut committed = self.committed.lock();
        if let Some(record) = committed.get(request.idempotency_token.as_str()) {
            return Ok(record.clone());
        }

        let mut effects = self.effects.lock();
        let record = CommittedRecord {
            server_id: format!("srv-{}", effects.len() + 1),
            kind: request.kind,
            payload: request.payload.clone(),
            idempotency_token: request.idempotency_token.clone(),
        };
        effects.push(record.clone());
        committed.insert(request.idempotency_token.as_str().to_owned(), record.clone());
        Ok(record)
    }
}

#[async_trait]
impl RemoteReadApi for FakeRemote {
    async fn fetch(&self, key: &CacheKey) -> Result<Value, RemoteError> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.read_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        self.views
            .lock()
            .get(key.as_str())
            .cloned()
            .ok_or_else(|| RemoteError::Unavailable {
                status: 404,
                message: format!("no view for {key}"),
                retry_after: None,
            })
    }
}
