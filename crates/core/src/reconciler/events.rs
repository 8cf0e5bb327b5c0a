use serde::Serialize;
use serde_json::Value;
use tallysync_domain::CacheKey;

/// Published after the reconciler changes what readers will see.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ReconcilerEvent {
    /// `key` now holds a fresh value from the remote.
    Refreshed { key: CacheKey, value: Value },
    /// The remote read failed; any stale value stays in place.
    RefreshFailed { key: CacheKey, error: String },
    /// The whole cache was invalidated and `keys` are being reloaded.
    FullRefresh { reason: String, keys: Vec<CacheKey> },
}
