//! Read-side commands

use serde_json::Value;
use tallysync_core::DashboardView;
use tallysync_domain::{CacheKey, Result as DomainResult, SyncStatus, TallySyncError};

use crate::context::AppContext;
use crate::utils::command_helpers::execute_command;

/// Confirmed records folded with pending overlays, plus per-kind totals.
pub async fn dashboard_view(ctx: &AppContext) -> DomainResult<DashboardView> {
    execute_command("views::dashboard_view", || async { Ok(ctx.overlay.view()) }).await
}

/// Cached remote view for `key`, refreshed in the background when stale.
pub async fn read_view(ctx: &AppContext, key: &str) -> DomainResult<Value> {
    execute_command("views::read_view", || async {
        ctx.ensure_open()?;
        let key = key.trim();
        if key.is_empty() {
            return Err(TallySyncError::InvalidInput("view key must not be empty".into()));
        }
        ctx.reconciler.read(&CacheKey::new(key)).await
    })
    .await
}

/// Connection state plus pending and dead-letter counts.
pub async fn sync_status(ctx: &AppContext) -> DomainResult<SyncStatus> {
    execute_command("views::sync_status", || ctx.reconciler.status()).await
}
