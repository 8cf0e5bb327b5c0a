use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tallysync_common::Subscription;
use tallysync_domain::{CommittedRecord, OperationId, OperationKind, PendingOperation};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::reconciler::ReconcilerEvent;
use crate::sync::SyncEvent;

/// Where a displayed record stands with the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum RecordStatus {
    Confirmed,
    Pending,
    /// Waiting for a retry after a transient failure.
    Retrying { error: String },
    /// Dead-lettered; excluded from totals until retried.
    Rejected { error: String },
}

/// One row of the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayRecord {
    pub kind: OperationKind,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_id: Option<OperationId>,
    #[serde(flatten)]
    pub status: RecordStatus,
}

/// Folded view handed to the UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardView {
    pub records: Vec<DisplayRecord>,
    /// Sum of `amount` per kind over confirmed and live pending records.
    pub totals: BTreeMap<OperationKind, f64>,
    pub pending_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
struct Overlay {
    op: PendingOperation,
    status: RecordStatus,
}

/// Confirmed base plus pending overlays in creation order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlayState {
    base: Vec<CommittedRecord>,
    overlays: BTreeMap<OperationId, Overlay>,
}

impl OverlayState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the confirmed records of one kind with a remote listing.
    /// Records of other kinds in `records` are ignored.
    pub fn replace_base_kind(&mut self, kind: OperationKind, records: Vec<CommittedRecord>) {
        self.base.retain(|record| record.kind != kind);
        self.base.extend(records.into_iter().filter(|record| record.kind == kind));
    }

    /// Fold a reconciler refresh of an `entity:<kind>` listing into the base.
    /// Other keys and unreadable listings leave the state untouched.
    pub fn apply_refresh(&mut self, event: &ReconcilerEvent) {
        let ReconcilerEvent::Refreshed { key, value } = event else {
            return;
        };
        let Some(kind) = key.entity_kind() else {
            return;
        };
        match listed_records(value) {
            Ok(records) => self.replace_base_kind(kind, records),
            Err(e) => warn!(key = %key, error = %e, "Entity listing is not a record list"),
        }
    }

    /// Restore overlays for operations that survived a restart.
    pub fn seed(&mut self, ops: impl IntoIterator<Item = PendingOperation>) {
        for op in ops {
            self.insert(op);
        }
    }

    pub fn base(&self) -> &[CommittedRecord] {
        &self.base
    }

    pub fn pending_len(&self) -> usize {
        self.overlays.len()
    }

    fn insert(&mut self, op: PendingOperation) {
        let status = match (op.terminal, op.last_error.clone()) {
            (true, error) => RecordStatus::Rejected { error: error.unwrap_or_default() },
            (false, Some(error)) => RecordStatus::Retrying { error },
            (false, None) => RecordStatus::Pending,
        };
        self.overlays.insert(op.id, Overlay { op, status });
    }

    /// Fold one sync event into the state.
    pub fn apply(&mut self, event: &SyncEvent) {
        match event {
            SyncEvent::Enqueued(op) | SyncEvent::Requeued(op) => self.insert(op.clone()),
            SyncEvent::Committed { id, record } => {
                self.overlays.remove(id);
                match self.base.iter_mut().find(|r| r.server_id == record.server_id) {
                    Some(existing) => *existing = record.clone(),
                    None => self.base.push(record.clone()),
                }
            }
            SyncEvent::RetryScheduled { id, error, .. } => {
                if let Some(overlay) = self.overlays.get_mut(id) {
                    overlay.status = RecordStatus::Retrying { error: error.clone() };
                }
            }
            SyncEvent::DeadLettered { id, error, .. } => {
                if let Some(overlay) = self.overlays.get_mut(id) {
                    overlay.status = RecordStatus::Rejected { error: error.clone() };
                }
            }
            SyncEvent::Evicted { id, .. } => {
                self.overlays.remove(id);
            }
            SyncEvent::DrainCompleted(_) => {}
        }
    }

    /// Displayed state: base records first, then overlays in creation order.
    pub fn view(&self) -> DashboardView {
        let mut totals: BTreeMap<OperationKind, f64> = BTreeMap::new();
        let mut records = Vec::with_capacity(self.base.len() + self.overlays.len());

        for record in &self.base {
            *totals.entry(record.kind).or_default() += record.amount().unwrap_or_default();
            records.push(DisplayRecord {
                kind: record.kind,
                payload: record.payload.clone(),
                server_id: Some(record.server_id.clone()),
                local_id: None,
                status: RecordStatus::Confirmed,
            });
        }

        let mut pending_count = 0;
        for overlay in self.overlays.values() {
            if !matches!(overlay.status, RecordStatus::Rejected { .. }) {
                pending_count += 1;
                *totals.entry(overlay.op.kind).or_default() += overlay.op.amount().unwrap_or_default();
            }
            records.push(DisplayRecord {
                kind: overlay.op.kind,
                payload: overlay.op.payload.clone(),
                server_id: None,
                local_id: Some(overlay.op.id),
                status: overlay.status.clone(),
            });
        }

        DashboardView { records, totals, pending_count }
    }
}

/// Entity listings come back as a bare array or as `{ "records": [...] }`.
fn listed_records(value: &Value) -> serde_json::Result<Vec<CommittedRecord>> {
    let list = value.get("records").unwrap_or(value);
    Vec::<CommittedRecord>::deserialize(list)
}

/// Thread-safe overlay state that can follow a sync event bus.
#[derive(Debug, Clone, Default)]
pub struct SharedOverlay {
    state: Arc<RwLock<OverlayState>>,
}

impl SharedOverlay {
    pub fn new(state: OverlayState) -> Self {
        Self { state: Arc::new(RwLock::new(state)) }
    }

    pub fn view(&self) -> DashboardView {
        self.state.read().view()
    }

    pub fn apply(&self, event: &SyncEvent) {
        self.state.write().apply(event);
    }

    pub fn seed(&self, ops: Vec<PendingOperation>) {
        self.state.write().seed(ops);
    }

    /// Replace base records from refreshed entity listings until the bus
    /// closes or `cancel` fires.
    pub fn follow_refreshes(
        &self,
        mut events: Subscription<ReconcilerEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let overlay = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => overlay.state.write().apply_refresh(&event),
                        None => break,
                    },
                }
            }
            debug!("Overlay refresh follower stopped");
        })
    }

    /// Apply events from `events` until the bus closes or `cancel` fires.
    pub fn follow(&self, mut events: Subscription<SyncEvent>, cancel: CancellationToken) -> JoinHandle<()> {
        let overlay = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => {
                            trace!(event = ?event, "Folding sync event into overlay");
                            overlay.apply(&event);
                        }
                        None => break,
                    },
                }
            }
            debug!("Overlay follower stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tallysync_domain::{CacheKey, NewOperation};

    use super::*;

    fn pending(id: u64, kind: OperationKind, amount: f64) -> PendingOperation {
        PendingOperation::from_new(OperationId(id), NewOperation::new(kind, json!({"amount": amount})))
    }

    fn committed(op: &PendingOperation, server_id: &str) -> SyncEvent {
        SyncEvent::Committed {
            id: op.id,
            record: CommittedRecord {
                server_id: server_id.into(),
                kind: op.kind,
                payload: op.payload.clone(),
                idempotency_token: op.idempotency_token.clone(),
            },
        }
    }

    #[test]
    fn pending_overlays_count_toward_totals() {
        let mut state = OverlayState::new();
        state.apply(&SyncEvent::Enqueued(pending(1, OperationKind::Expense, 40.0)));
        state.apply(&SyncEvent::Enqueued(pending(2, OperationKind::Expense, 2.5)));

        let view = state.view();
        assert_eq!(view.totals[&OperationKind::Expense], 42.5);
        assert_eq!(view.pending_count, 2);
        assert!(view.records.iter().all(|r| r.status == RecordStatus::Pending));
    }

    #[test]
    fn commit_folds_overlay_into_base() {
        let mut state = OverlayState::new();
        let op = pending(1, OperationKind::VehicleTransaction, 900.0);
        state.apply(&SyncEvent::Enqueued(op.clone()));
        state.apply(&committed(&op, "srv-1"));

        let view = state.view();
        assert_eq!(view.pending_count, 0);
        assert_eq!(view.records.len(), 1);
        assert_eq!(view.records[0].server_id.as_deref(), Some("srv-1"));
        assert_eq!(view.records[0].status, RecordStatus::Confirmed);
        assert_eq!(view.totals[&OperationKind::VehicleTransaction], 900.0);
    }

    #[test]
    fn duplicate_commit_does_not_double_count() {
        let mut state = OverlayState::new();
        let op = pending(1, OperationKind::Payment, 10.0);
        state.apply(&committed(&op, "srv-9"));
        state.apply(&committed(&op, "srv-9"));
        assert_eq!(state.view().totals[&OperationKind::Payment], 10.0);
    }

    fn listed(server_id: &str, kind: OperationKind, amount: f64) -> Value {
        json!({
            "serverId": server_id,
            "kind": kind,
            "payload": {"amount": amount},
            "idempotencyToken": format!("tok-{server_id}"),
        })
    }

    fn refreshed(kind: OperationKind, value: Value) -> ReconcilerEvent {
        ReconcilerEvent::Refreshed { key: CacheKey::for_kind(kind), value }
    }

    #[test]
    fn entity_refresh_replaces_base_of_that_kind() {
        let mut state = OverlayState::new();
        state.apply(&committed(&pending(1, OperationKind::Expense, 5.0), "srv-1"));
        state.apply(&committed(&pending(2, OperationKind::Payment, 7.0), "srv-2"));

        state.apply_refresh(&refreshed(
            OperationKind::Expense,
            json!([
                listed("srv-1", OperationKind::Expense, 5.0),
                listed("srv-3", OperationKind::Expense, 1.0),
            ]),
        ));

        let view = state.view();
        assert_eq!(state.base().len(), 3);
        assert_eq!(view.totals[&OperationKind::Expense], 6.0);
        assert_eq!(view.totals[&OperationKind::Payment], 7.0);
    }

    #[test]
    fn repeated_commits_stay_bounded_by_listing() {
        let mut state = OverlayState::new();
        for id in 0..50 {
            let op = pending(id, OperationKind::Expense, 1.0);
            state.apply(&committed(&op, &format!("srv-{id}")));
        }
        assert_eq!(state.base().len(), 50);

        // the server listing is the source of truth once it arrives
        state.apply_refresh(&refreshed(
            OperationKind::Expense,
            json!({"records": [listed("srv-49", OperationKind::Expense, 1.0)]}),
        ));
        assert_eq!(state.base().len(), 1);
    }

    #[test]
    fn unreadable_or_unrelated_refreshes_are_ignored() {
        let mut state = OverlayState::new();
        state.apply(&committed(&pending(1, OperationKind::Expense, 5.0), "srv-1"));
        let before = state.clone();

        state.apply_refresh(&refreshed(OperationKind::Expense, json!({"total": 5})));
        state.apply_refresh(&ReconcilerEvent::Refreshed { key: CacheKey::summary(), value: json!([]) });
        state.apply_refresh(&ReconcilerEvent::RefreshFailed {
            key: CacheKey::for_kind(OperationKind::Expense),
            error: "offline".into(),
        });

        assert_eq!(state, before);
    }

    #[tokio::test]
    async fn shared_overlay_follows_reconciler_refreshes() {
        let bus = tallysync_common::EventBus::new("reconciler");
        let overlay = SharedOverlay::default();
        let cancel = CancellationToken::new();
        let task = overlay.follow_refreshes(bus.subscribe(), cancel.clone());

        let listing = json!([listed("srv-8", OperationKind::Payment, 12.0)]);
        bus.publish(refreshed(OperationKind::Payment, listing));
        for _ in 0..100 {
            if overlay.view().records.len() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(overlay.view().totals[&OperationKind::Payment], 12.0);
    }

    #[test]
    fn rejected_overlays_are_shown_but_not_summed() {
        let mut state = OverlayState::new();
        let op = pending(3, OperationKind::ScrapTransaction, 75.0);
        state.apply(&SyncEvent::Enqueued(op.clone()));
        state.apply(&SyncEvent::DeadLettered { id: op.id, kind: op.kind, error: "weight".into() });

        let view = state.view();
        assert_eq!(view.pending_count, 0);
        assert_eq!(view.totals.get(&OperationKind::ScrapTransaction).copied().unwrap_or_default(), 0.0);
        assert_eq!(view.records[0].status, RecordStatus::Rejected { error: "weight".into() });

        state.apply(&SyncEvent::Evicted { id: op.id, kind: op.kind });
        assert!(state.view().records.is_empty());
    }

    #[test]
    fn seeded_dead_letters_come_back_rejected() {
        let mut op = pending(4, OperationKind::Expense, 1.0);
        op.terminal = true;
        op.last_error = Some("duplicate bill".into());

        let mut state = OverlayState::new();
        state.seed(vec![op]);
        assert_eq!(
            state.view().records[0].status,
            RecordStatus::Rejected { error: "duplicate bill".into() }
        );
    }
}
