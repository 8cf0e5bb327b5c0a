//! Port interface for the remote read API

use async_trait::async_trait;
use serde_json::Value;
use tallysync_domain::CacheKey;

use crate::sync::ports::RemoteError;

/// Fetches the current server-side value behind a cache key.
#[async_trait]
pub trait RemoteReadApi: Send + Sync {
    async fn fetch(&self, key: &CacheKey) -> Result<Value, RemoteError>;
}
