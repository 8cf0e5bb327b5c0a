//! Port interface for cache persistence

use async_trait::async_trait;
use tallysync_domain::{CacheEntry, CacheKey, Result};

/// Backing store for cache entries. Writes arrive from a single task in
/// mutation order.
#[async_trait]
pub trait CacheRepository: Send + Sync {
    /// Every persisted entry, used to warm the cache at startup.
    async fn load_all(&self) -> Result<Vec<CacheEntry>>;

    /// Insert or replace the entry for `entry.key`.
    async fn upsert(&self, entry: &CacheEntry) -> Result<()>;

    /// Delete the entry for `key`, if any.
    async fn delete(&self, key: &CacheKey) -> Result<()>;
}
