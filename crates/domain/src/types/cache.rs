//! Cached remote-read results

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{ENTITY_CACHE_KEY_PREFIX, SUMMARY_CACHE_KEY};
use crate::types::OperationKind;

/// Opaque cache key. Well-known keys are `summary` and `entity:<kind>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn summary() -> Self {
        Self(SUMMARY_CACHE_KEY.to_owned())
    }

    /// Key for the listing of one entity type, e.g. `entity:payment`.
    pub fn entity(entity: impl fmt::Display) -> Self {
        Self(format!("{ENTITY_CACHE_KEY_PREFIX}{entity}"))
    }

    pub fn for_kind(kind: OperationKind) -> Self {
        Self::entity(kind)
    }

    /// The operation kind listed under an `entity:<kind>` key.
    pub fn entity_kind(&self) -> Option<OperationKind> {
        self.0.strip_prefix(ENTITY_CACHE_KEY_PREFIX)?.parse().ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Cached value with its freshness metadata. Times are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub value: Value,
    pub stored_at_ms: u64,
    pub ttl_ms: u64,
    /// Set when the entry was invalidated ahead of its TTL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalidated_at_ms: Option<u64>,
}

impl CacheEntry {
    pub fn new(key: CacheKey, value: Value, stored_at_ms: u64, ttl: Duration) -> Self {
        Self {
            key,
            value,
            stored_at_ms,
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
            invalidated_at_ms: None,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated_at_ms.is_some()
    }

    /// Fresh iff `now - stored_at < ttl` and not invalidated.
    pub fn is_fresh(&self, now_ms: u64) -> bool {
        !self.is_invalidated() && now_ms.saturating_sub(self.stored_at_ms) < self.ttl_ms
    }

    /// Moment the entry stopped being fresh.
    pub fn stale_since_ms(&self) -> u64 {
        let expiry = self.stored_at_ms.saturating_add(self.ttl_ms);
        self.invalidated_at_ms.map_or(expiry, |at| at.min(expiry))
    }

    /// Mark stale while keeping the value as fallback. Keeps the earliest mark.
    pub fn invalidate(&mut self, now_ms: u64) {
        if self.invalidated_at_ms.is_none() {
            self.invalidated_at_ms = Some(now_ms);
        }
    }
}
