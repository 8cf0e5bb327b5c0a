//! SQLite persistence for cache entries.

use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{params, Row};
use tallysync_core::CacheRepository;
use tallysync_domain::{CacheEntry, CacheKey, Result};
use tokio::task;

use super::manager::{map_join_error, map_sql_error, DbManager};

const LOAD_ALL_SQL: &str =
    "SELECT key, value, stored_at_ms, ttl_ms, invalidated_at_ms FROM cache_entries ORDER BY key";

const UPSERT_SQL: &str = "INSERT INTO cache_entries (key, value, stored_at_ms, ttl_ms, invalidated_at_ms)
    VALUES (?1, ?2, ?3, ?4, ?5)
    ON CONFLICT(key) DO UPDATE SET
        value = excluded.value,
        stored_at_ms = excluded.stored_at_ms,
        ttl_ms = excluded.ttl_ms,
        invalidated_at_ms = excluded.invalidated_at_ms";

const DELETE_SQL: &str = "DELETE FROM cache_entries WHERE key = ?1";

/// Cache entries stored one row per key.
pub struct SqliteCacheRepository {
    db: Arc<DbManager>,
}

impl SqliteCacheRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CacheRepository for SqliteCacheRepository {
    async fn load_all(&self) -> Result<Vec<CacheEntry>> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let conn = db.get_connection()?;
            let mut stmt = conn.prepare(LOAD_ALL_SQL).map_err(map_sql_error)?;
            let rows = stmt.query_map([], map_entry_row).map_err(map_sql_error)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn upsert(&self, entry: &CacheEntry) -> Result<()> {
        let db = Arc::clone(&self.db);
        let value = entry.value.to_string();
        let key = entry.key.as_str().to_owned();
        let stored_at = to_sql_millis(entry.stored_at_ms);
        let ttl = to_sql_millis(entry.ttl_ms);
        let invalidated_at = entry.invalidated_at_ms.map(to_sql_millis);

        task::spawn_blocking(move || {
            let conn = db.get_connection()?;
            conn.execute(UPSERT_SQL, params![key, value, stored_at, ttl, invalidated_at])
                .map_err(map_sql_error)?;
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }

    async fn delete(&self, key: &CacheKey) -> Result<()> {
        let db = Arc::clone(&self.db);
        let key = key.as_str().to_owned();
        task::spawn_blocking(move || {
            let conn = db.get_connection()?;
            conn.execute(DELETE_SQL, params![key]).map_err(map_sql_error)?;
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }
}

fn map_entry_row(row: &Row<'_>) -> rusqlite::Result<CacheEntry> {
    let key: String = row.get(0)?;
    let raw: String = row.get(1)?;
    let value = serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;
    let invalidated_at: Option<i64> = row.get(4)?;

    Ok(CacheEntry {
        key: CacheKey::new(key),
        value,
        stored_at_ms: from_sql_millis(row.get(2)?),
        ttl_ms: from_sql_millis(row.get(3)?),
        invalidated_at_ms: invalidated_at.map(from_sql_millis),
    })
}

fn to_sql_millis(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

fn from_sql_millis(ms: i64) -> u64 {
    u64::try_from(ms).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    fn repository() -> (SqliteCacheRepository, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = DbManager::new(dir.path().join("cache.db"), 2).unwrap();
        db.run_migrations().unwrap();
        (SqliteCacheRepository::new(Arc::new(db)), dir)
    }

    #[tokio::test]
    async fn upsert_replaces_existing_row() {
        let (repo, _dir) = repository();
        let key = CacheKey::summary();
        let mut entry = CacheEntry::new(key.clone(), json!({"total": 1}), 1_000, Duration::from_secs(30));
        repo.upsert(&entry).await.unwrap();

        entry.value = json!({"total": 2});
        entry.invalidate(1_500);
        repo.upsert(&entry).await.unwrap();

        let loaded = repo.load_all().await.unwrap();
        assert_eq!(loaded, vec![entry]);
    }

    #[tokio::test]
    async fn delete_is_quiet_for_missing_keys() {
        let (repo, _dir) = repository();
        let entry = CacheEntry::new(CacheKey::new("entity:expense"), json!([]), 5, Duration::from_secs(1));
        repo.upsert(&entry).await.unwrap();

        repo.delete(&entry.key).await.unwrap();
        repo.delete(&entry.key).await.unwrap();

        assert!(repo.load_all().await.unwrap().is_empty());
    }
}
