//! SQLite-backed implementation of the operation queue port.
//!
//! Every mutation is a single statement or a short transaction on one row, so
//! concurrent callers never interleave changes to the same operation. Rows
//! are deleted only by `mark_synced` and `evict`; anything else survives a
//! restart and is returned again by `peek_batch`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use serde_json::Value;
use tallysync_core::OperationQueue;
use tallysync_domain::{
    truncate_error_message, IdempotencyToken, NewOperation, OperationId, OperationKind,
    PendingOperation, Result, TallySyncError,
};
use tokio::task;
use tracing::debug;

use super::manager::{map_join_error, map_sql_error, DbManager, SqliteConnection};

/// Durable operation queue.
pub struct SqliteOperationQueue {
    db: Arc<DbManager>,
    capacity: Option<usize>,
}

impl SqliteOperationQueue {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db, capacity: None }
    }

    /// Reject enqueues once `capacity` operations are stored.
    pub fn with_capacity(db: Arc<DbManager>, capacity: Option<usize>) -> Self {
        Self { db, capacity }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let mut conn = db.get_connection()?;
            f(&mut conn)
        })
        .await
        .map_err(map_join_error)?
    }
}

#[async_trait]
impl OperationQueue for SqliteOperationQueue {
    async fn enqueue(&self, op: NewOperation) -> Result<OperationId> {
        let capacity = self.capacity;
        let payload = serde_json::to_string(&op.payload)
            .map_err(|e| TallySyncError::InvalidInput(format!("payload is not serializable: {e}")))?;

        self.with_conn(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(map_sql_error)?;

            if let Some(capacity) = capacity {
                let stored: i64 = tx
                    .query_row(COUNT_ALL_SQL, [], |row| row.get(0))
                    .map_err(map_sql_error)?;
                if usize::try_from(stored).unwrap_or(usize::MAX) >= capacity {
                    return Err(TallySyncError::StorageFull(format!(
                        "queue holds {capacity} operations"
                    )));
                }
            }

            tx.execute(
                INSERT_SQL,
                params![
                    op.kind.to_string(),
                    payload,
                    op.idempotency_token.as_str(),
                    op.created_at.timestamp_millis(),
                ],
            )
            .map_err(map_sql_error)?;
            let id = tx.last_insert_rowid();
            tx.commit().map_err(map_sql_error)?;

            debug!(operation_id = id, "Operation persisted");
            Ok(OperationId(u64::try_from(id).unwrap_or_default()))
        })
        .await
    }

    async fn peek_batch_after(
        &self,
        after: Option<OperationId>,
        max: usize,
    ) -> Result<Vec<PendingOperation>> {
        if max == 0 {
            return Ok(Vec::new());
        }
        let after = after.map_or(0, |id| to_sql_id(id));
        let limit = i64::try_from(max).unwrap_or(i64::MAX);

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(PEEK_AFTER_SQL).map_err(map_sql_error)?;
            let rows = stmt.query_map(params![after, limit], map_operation_row).map_err(map_sql_error)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sql_error)
        })
        .await
    }

    async fn get(&self, id: OperationId) -> Result<Option<PendingOperation>> {
        self.with_conn(move |conn| select_one(conn, id)).await
    }

    async fn mark_synced(&self, id: OperationId) -> Result<()> {
        self.with_conn(move |conn| {
            let deleted =
                conn.execute(DELETE_SQL, params![to_sql_id(id)]).map_err(map_sql_error)?;
            if deleted == 0 {
                return Err(not_found(id));
            }
            Ok(())
        })
        .await
    }

    async fn mark_failed(
        &self,
        id: OperationId,
        error: &str,
        terminal: bool,
    ) -> Result<PendingOperation> {
        let error = truncate_error_message(error);
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(map_sql_error)?;
            let updated = tx
                .execute(MARK_FAILED_SQL, params![error, i64::from(terminal), to_sql_id(id)])
                .map_err(map_sql_error)?;
            if updated == 0 {
                return Err(not_found(id));
            }
            let op = select_one(&tx, id)?.ok_or_else(|| not_found(id))?;
            tx.commit().map_err(map_sql_error)?;
            Ok(op)
        })
        .await
    }

    async fn evict(&self, id: OperationId) -> Result<PendingOperation> {
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(map_sql_error)?;
            let op = select_one(&tx, id)?.ok_or_else(|| not_found(id))?;
            if !op.terminal {
                return Err(not_dead_lettered(id));
            }
            tx.execute(DELETE_SQL, params![to_sql_id(id)]).map_err(map_sql_error)?;
            tx.commit().map_err(map_sql_error)?;
            Ok(op)
        })
        .await
    }

    async fn requeue(&self, id: OperationId) -> Result<PendingOperation> {
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(map_sql_error)?;
            let updated = tx.execute(REQUEUE_SQL, params![to_sql_id(id)]).map_err(map_sql_error)?;
            let op = select_one(&tx, id)?.ok_or_else(|| not_found(id))?;
            if updated == 0 {
                return Err(not_dead_lettered(id));
            }
            tx.commit().map_err(map_sql_error)?;
            Ok(op)
        })
        .await
    }

    async fn pending_count(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 =
                conn.query_row(COUNT_LIVE_SQL, [], |row| row.get(0)).map_err(map_sql_error)?;
            Ok(usize::try_from(count).unwrap_or_default())
        })
        .await
    }

    async fn dead_letters(&self) -> Result<Vec<PendingOperation>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(DEAD_LETTERS_SQL).map_err(map_sql_error)?;
            let rows = stmt.query_map([], map_operation_row).map_err(map_sql_error)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sql_error)
        })
        .await
    }
}

const COLUMNS: &str =
    "id, kind, payload, idempotency_token, created_at_ms, attempt_count, last_error, terminal";

const INSERT_SQL: &str = "INSERT INTO pending_operations (kind, payload, idempotency_token, created_at_ms)
    VALUES (?1, ?2, ?3, ?4)";

const PEEK_AFTER_SQL: &str = "SELECT id, kind, payload, idempotency_token, created_at_ms,
        attempt_count, last_error, terminal
    FROM pending_operations
    WHERE id > ?1
    ORDER BY id ASC
    LIMIT ?2";

const DEAD_LETTERS_SQL: &str = "SELECT id, kind, payload, idempotency_token, created_at_ms,
        attempt_count, last_error, terminal
    FROM pending_operations
    WHERE terminal = 1
    ORDER BY id ASC";

const DELETE_SQL: &str = "DELETE FROM pending_operations WHERE id = ?1";

const MARK_FAILED_SQL: &str = "UPDATE pending_operations
    SET attempt_count = attempt_count + 1,
        last_error = ?1,
        terminal = MAX(terminal, ?2)
    WHERE id = ?3";

const REQUEUE_SQL: &str = "UPDATE pending_operations
    SET terminal = 0, last_error = NULL, attempt_count = 0
    WHERE id = ?1 AND terminal = 1";

const COUNT_ALL_SQL: &str = "SELECT COUNT(*) FROM pending_operations";

const COUNT_LIVE_SQL: &str = "SELECT COUNT(*) FROM pending_operations WHERE terminal = 0";

fn select_one(conn: &rusqlite::Connection, id: OperationId) -> Result<Option<PendingOperation>> {
    let sql = format!("SELECT {COLUMNS} FROM pending_operations WHERE id = ?1");
    conn.query_row(&sql, params![to_sql_id(id)], map_operation_row)
        .optional()
        .map_err(map_sql_error)
}

fn map_operation_row(row: &Row<'_>) -> rusqlite::Result<PendingOperation> {
    let id: i64 = row.get(0)?;
    let kind_raw: String = row.get(1)?;
    let kind = kind_raw
        .parse::<OperationKind>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, e.into()))?;
    let payload_raw: String = row.get(2)?;
    let payload: Value = serde_json::from_str(&payload_raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
    let token: String = row.get(3)?;
    let created_at_ms: i64 = row.get(4)?;
    let created_at = DateTime::<Utc>::from_timestamp_millis(created_at_ms).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            Type::Integer,
            format!("timestamp out of range: {created_at_ms}").into(),
        )
    })?;
    let attempt_count: i64 = row.get(5)?;
    let terminal: i64 = row.get(7)?;

    Ok(PendingOperation {
        id: OperationId(u64::try_from(id).unwrap_or_default()),
        kind,
        payload,
        idempotency_token: IdempotencyToken::from(token),
        created_at,
        attempt_count: u32::try_from(attempt_count).unwrap_or(u32::MAX),
        last_error: row.get(6)?,
        terminal: terminal != 0,
    })
}

fn to_sql_id(id: OperationId) -> i64 {
    i64::try_from(id.get()).unwrap_or(i64::MAX)
}

fn not_found(id: OperationId) -> TallySyncError {
    TallySyncError::NotFound(format!("operation {id}"))
}

fn not_dead_lettered(id: OperationId) -> TallySyncError {
    TallySyncError::InvalidInput(format!("operation {id} is not dead-lettered"))
}
