//! Resolving operations the remote rejected

use tallysync_domain::{OperationId, PendingOperation, Result as DomainResult};

use crate::context::AppContext;
use crate::utils::command_helpers::execute_command;

/// Rejected operations, oldest first.
pub async fn list_dead_letters(ctx: &AppContext) -> DomainResult<Vec<PendingOperation>> {
    execute_command("dead_letters::list_dead_letters", || ctx.engine.dead_letters()).await
}

/// Discard a rejected operation. Later operations of its kind become sendable.
pub async fn skip_dead_letter(ctx: &AppContext, id: u64) -> DomainResult<PendingOperation> {
    execute_command("dead_letters::skip_dead_letter", || async {
        ctx.ensure_open()?;
        ctx.engine.skip(OperationId(id)).await
    })
    .await
}

/// Send a rejected operation again, ahead of later operations of its kind.
pub async fn retry_dead_letter(ctx: &AppContext, id: u64) -> DomainResult<PendingOperation> {
    execute_command("dead_letters::retry_dead_letter", || async {
        ctx.ensure_open()?;
        ctx.engine.retry(OperationId(id)).await
    })
    .await
}
