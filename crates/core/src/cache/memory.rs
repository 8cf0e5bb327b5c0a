//! Volatile cache repository

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tallysync_domain::{CacheEntry, CacheKey, Result};

use super::ports::CacheRepository;

/// In-memory [`CacheRepository`], mostly useful to observe what the store
/// writes.
#[derive(Debug, Default)]
pub struct InMemoryCacheRepository {
    entries: Mutex<BTreeMap<CacheKey, CacheEntry>>,
}

impl InMemoryCacheRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Repository pre-populated with `entries`.
    pub fn with_entries(entries: impl IntoIterator<Item = CacheEntry>) -> Self {
        Self {
            entries: Mutex::new(entries.into_iter().map(|e| (e.key.clone(), e)).collect()),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl CacheRepository for InMemoryCacheRepository {
    async fn load_all(&self) -> Result<Vec<CacheEntry>> {
        Ok(self.entries.lock().values().cloned().collect())
    }

    async fn upsert(&self, entry: &CacheEntry) -> Result<()> {
        self.entries.lock().insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}
