//! Command execution helpers
//!
//! Every command goes through [`execute_command`] so timing and outcome
//! logging look the same across the surface.

use std::future::Future;
use std::time::Instant;

use tallysync_domain::Result as DomainResult;

use crate::utils::logging::{error_label, log_command_execution};

/// Run `command_fn`, then log its duration and outcome under `command_name`.
///
/// # Example
///
/// ```rust,ignore
/// pub async fn sync_status(ctx: &AppContext) -> DomainResult<SyncStatus> {
///     execute_command("views::sync_status", || ctx.reconciler.status()).await
/// }
/// ```
pub async fn execute_command<F, Fut, T>(command_name: &str, command_fn: F) -> DomainResult<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = DomainResult<T>>,
{
    let start = Instant::now();
    let result = command_fn().await;

    let error_type = result.as_ref().err().map(error_label);
    log_command_execution(command_name, start.elapsed(), result.is_ok(), error_type);

    result
}
