//! Submitting mutations and forcing a drain

use serde::Serialize;
use serde_json::Value;
use tallysync_core::sync::{DrainOutcome, DrainReport};
use tallysync_domain::{OperationKind, PendingOperation, Result as DomainResult, TallySyncError};

use crate::context::AppContext;
use crate::utils::command_helpers::execute_command;

/// Queue a mutation for delivery. It appears in the dashboard immediately as
/// pending and is sent as soon as the engine is connected.
///
/// `kind` is the wire name (`"vehicle-transaction"`, `"expense"`, ...);
/// `payload` must be a JSON object.
pub async fn submit_mutation(
    ctx: &AppContext,
    kind: &str,
    payload: Value,
) -> DomainResult<PendingOperation> {
    execute_command("mutations::submit_mutation", || async {
        ctx.ensure_open()?;
        let kind: OperationKind = kind.parse().map_err(TallySyncError::InvalidInput)?;
        if !payload.is_object() {
            return Err(TallySyncError::InvalidInput("payload must be a JSON object".into()));
        }
        ctx.engine.submit(kind, payload).await
    })
    .await
}

/// Result of a drain pass as shown to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainSummary {
    pub committed: usize,
    pub dead_lettered: usize,
    pub blocked: usize,
    /// `completed`, `halted`, `offline` or `backing-off`.
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_in_ms: Option<u64>,
}

impl From<DrainReport> for DrainSummary {
    fn from(report: DrainReport) -> Self {
        let (outcome, retry_in) = match report.outcome {
            DrainOutcome::Completed => ("completed", None),
            DrainOutcome::Halted { retry_in } => ("halted", Some(retry_in)),
            DrainOutcome::Offline => ("offline", None),
            DrainOutcome::BackingOff { remaining } => ("backing-off", Some(remaining)),
        };
        Self {
            committed: report.committed,
            dead_lettered: report.dead_lettered,
            blocked: report.blocked,
            outcome,
            retry_in_ms: retry_in.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        }
    }
}

/// Drain the queue now instead of waiting for the next trigger.
pub async fn drain_now(ctx: &AppContext) -> DomainResult<DrainSummary> {
    execute_command("mutations::drain_now", || async {
        ctx.ensure_open()?;
        ctx.engine.drain_now().await.map(DrainSummary::from)
    })
    .await
}
