//! SQLite-backed sync message store
//!
//! Owns the guarantees the processor depends on: a claim succeeds for
//! exactly one worker, only that worker may write the terminal status of an
//! `in_progress` row, and a failed write increments `retry_count` and
//! escalates to `dead_letter` atomically once the ceiling is crossed.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dualsync_core::MessageStore;
use dualsync_domain::constants::MAX_RETRY_BACKOFF_SECS;
use dualsync_domain::{
    DualSyncError, MessageStoreConfig, Result as DomainResult, StatusCounts, StatusUpdate,
    SyncMessage, SyncStatus,
};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use tokio::task;
use tracing::{debug, warn};

use super::manager::DbManager;
use super::pool::SqliteConnection;
use crate::errors::conversions::{map_join_error, map_sql_error};

/// Retry ceiling and backoff applied when a message is marked failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// A message is dead-lettered once `retry_count` exceeds this.
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &MessageStoreConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: Duration::from_secs(config.retry_backoff_secs),
        }
    }

    /// Delay before attempt `retry_count + 1`: `backoff * 2^(retry_count - 1)`,
    /// capped at [`MAX_RETRY_BACKOFF_SECS`].
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1);
        let factor = 1_u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let secs = self.backoff.as_secs().saturating_mul(factor).min(MAX_RETRY_BACKOFF_SECS);
        Duration::from_secs(secs)
    }
}

/// SQLite implementation of [`MessageStore`].
pub struct SqliteMessageStore {
    db: Arc<DbManager>,
    policy: RetryPolicy,
}

impl SqliteMessageStore {
    pub fn new(db: Arc<DbManager>, policy: RetryPolicy) -> Self {
        Self { db, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Queue depth per status.
    pub async fn status_counts(&self) -> DomainResult<StatusCounts> {
        self.with_connection(|conn| query_status_counts(conn)).await
    }

    /// Dead-lettered messages, most recently failed first.
    pub async fn list_dead_letters(&self, limit: usize) -> DomainResult<Vec<SyncMessage>> {
        self.with_connection(move |conn| query_dead_letters(conn, limit)).await
    }

    /// Put a dead-lettered message back in the queue with a fresh retry budget.
    pub async fn requeue_dead_letter(&self, id: &str) -> DomainResult<()> {
        let id = id.to_string();
        self.with_connection(move |conn| requeue(conn, &id, now_millis())).await
    }

    /// Delete successful messages last touched before `now - older_than`.
    pub async fn purge_completed(&self, older_than: chrono::Duration) -> DomainResult<u64> {
        let cutoff = now_millis() - older_than.num_milliseconds();
        self.with_connection(move |conn| delete_completed_before(conn, cutoff)).await
    }

    async fn with_connection<T, F>(&self, op: F) -> DomainResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> DomainResult<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> DomainResult<T> {
            let mut conn = db.get_connection()?;
            op(&mut conn)
        })
        .await
        .map_err(map_join_error)?
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn enqueue(&self, message: &SyncMessage) -> DomainResult<()> {
        let message = message.clone();
        self.with_connection(move |conn| insert_message(conn, &message)).await
    }

    async fn get_pending_messages(&self, limit: usize) -> DomainResult<Vec<SyncMessage>> {
        self.with_connection(move |conn| query_pending(conn, limit)).await
    }

    async fn get_retryable_messages(&self, limit: usize) -> DomainResult<Vec<SyncMessage>> {
        let max_retries = self.policy.max_retries;
        self.with_connection(move |conn| query_retryable(conn, limit, max_retries, now_millis()))
            .await
    }

    async fn get_message_by_id(&self, id: &str) -> DomainResult<Option<SyncMessage>> {
        let id = id.to_string();
        self.with_connection(move |conn| query_by_id(conn, &id)).await
    }

    async fn update_message_status(&self, id: &str, update: &StatusUpdate) -> DomainResult<()> {
        let id = id.to_string();
        let update = update.clone();
        let policy = self.policy;
        self.with_connection(move |conn| apply_status_update(conn, &id, &update, policy, now_millis()))
            .await
    }

    /// A worker that dies between claim and terminal write leaves its message
    /// in progress; this releases claims older than `older_than`.
    async fn release_stale_claims(&self, older_than: chrono::Duration) -> DomainResult<u64> {
        let cutoff = now_millis().saturating_sub(older_than.num_milliseconds());
        self.with_connection(move |conn| release_claims_before(conn, cutoff)).await
    }
}

// ============================================================================
// SQL Operations (synchronous)
// ============================================================================

const SELECT_COLUMNS: &str = "id, sync_direction, operation_type, source_table, target_table,
    record_identifier, payload, status, retry_count, created_at, updated_at, processed_by,
    error_message, error_details, sync_latency_ms, processing_duration_ms, rows_affected";

fn insert_message(conn: &SqliteConnection, message: &SyncMessage) -> DomainResult<()> {
    let identifier = to_json_text(&message.record_identifier)?;
    let payload = to_json_text(&message.payload)?;
    let details = message.error_details.as_ref().map(to_json_text).transpose()?;

    conn.execute(
        "INSERT INTO sync_messages (id, sync_direction, operation_type, source_table, target_table,
                                    record_identifier, payload, status, retry_count, created_at,
                                    processed_by, error_message, error_details)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            message.id,
            message.sync_direction,
            message.operation_type,
            message.source_table,
            message.target_table,
            identifier,
            payload,
            message.status.as_str(),
            message.retry_count,
            message.created_at.timestamp_millis(),
            message.processed_by,
            message.error_message,
            details,
        ],
    )
    .map_err(map_sql_error)?;

    debug!(message_id = %message.id, direction = %message.sync_direction, "Sync message enqueued");
    Ok(())
}

fn query_pending(conn: &SqliteConnection, limit: usize) -> DomainResult<Vec<SyncMessage>> {
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM sync_messages
         WHERE status = 'pending'
         ORDER BY created_at ASC, id ASC
         LIMIT ?1"
    );
    query_messages(conn, &sql, params![to_limit(limit)])
}

fn query_retryable(
    conn: &SqliteConnection,
    limit: usize,
    max_retries: u32,
    now_ms: i64,
) -> DomainResult<Vec<SyncMessage>> {
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM sync_messages
         WHERE status = 'failed'
           AND retry_count <= ?1
           AND (next_retry_at IS NULL OR next_retry_at <= ?2)
         ORDER BY COALESCE(next_retry_at, created_at) ASC, id ASC
         LIMIT ?3"
    );
    query_messages(conn, &sql, params![max_retries, now_ms, to_limit(limit)])
}

fn query_by_id(conn: &SqliteConnection, id: &str) -> DomainResult<Option<SyncMessage>> {
    let sql = format!("SELECT {SELECT_COLUMNS} FROM sync_messages WHERE id = ?1");
    conn.query_row(&sql, params![id], map_message_row).optional().map_err(map_sql_error)
}

fn query_dead_letters(conn: &SqliteConnection, limit: usize) -> DomainResult<Vec<SyncMessage>> {
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM sync_messages
         WHERE status = 'dead_letter'
         ORDER BY updated_at DESC, id ASC
         LIMIT ?1"
    );
    query_messages(conn, &sql, params![to_limit(limit)])
}

fn query_messages(
    conn: &SqliteConnection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> DomainResult<Vec<SyncMessage>> {
    let mut stmt = conn.prepare(sql).map_err(map_sql_error)?;
    let rows = stmt.query_map(params, map_message_row).map_err(map_sql_error)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(map_sql_error)
}

fn query_status_counts(conn: &SqliteConnection) -> DomainResult<StatusCounts> {
    let mut stmt = conn
        .prepare("SELECT status, COUNT(*) FROM sync_messages GROUP BY status")
        .map_err(map_sql_error)?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
        .map_err(map_sql_error)?;

    let mut counts = StatusCounts::default();
    for row in rows {
        let (status, count) = row.map_err(map_sql_error)?;
        counts.add(SyncStatus::from_str(&status)?, u64::try_from(count).unwrap_or(0));
    }
    Ok(counts)
}

fn apply_status_update(
    conn: &mut SqliteConnection,
    id: &str,
    update: &StatusUpdate,
    policy: RetryPolicy,
    now_ms: i64,
) -> DomainResult<()> {
    match update.status {
        SyncStatus::InProgress => claim(conn, id, update, now_ms),
        SyncStatus::Failed => record_failure(conn, id, update, policy, now_ms),
        SyncStatus::Success | SyncStatus::PartialSuccess => record_completion(conn, id, update, now_ms),
        SyncStatus::Pending | SyncStatus::DeadLetter => {
            let changed = conn
                .execute(
                    "UPDATE sync_messages
                     SET status = ?2, processed_by = COALESCE(?3, processed_by),
                         error_message = COALESCE(?4, error_message), next_retry_at = NULL,
                         updated_at = ?5
                     WHERE id = ?1",
                    params![id, update.status.as_str(), update.processed_by, update.error_message, now_ms],
                )
                .map_err(map_sql_error)?;
            if changed == 0 {
                return Err(DualSyncError::NotFound(format!("sync message {id}")));
            }
            Ok(())
        }
    }
}

/// Conditional claim; only one worker can move a row out of a claimable state.
fn claim(conn: &SqliteConnection, id: &str, update: &StatusUpdate, now_ms: i64) -> DomainResult<()> {
    let changed = conn
        .execute(
            "UPDATE sync_messages
             SET status = 'in_progress', processed_by = ?2, updated_at = ?3
             WHERE id = ?1 AND status IN ('pending', 'failed')",
            params![id, update.processed_by, now_ms],
        )
        .map_err(map_sql_error)?;

    if changed == 1 {
        return Ok(());
    }
    Err(transition_rejected(conn, id, "claim")?)
}

fn record_completion(
    conn: &SqliteConnection,
    id: &str,
    update: &StatusUpdate,
    now_ms: i64,
) -> DomainResult<()> {
    let changed = conn
        .execute(
            "UPDATE sync_messages
             SET status = ?2, processed_by = COALESCE(?3, processed_by),
                 sync_latency_ms = ?4, processing_duration_ms = ?5, rows_affected = ?6,
                 error_message = NULL, error_details = NULL, next_retry_at = NULL,
                 updated_at = ?7
             WHERE id = ?1 AND status = 'in_progress' AND processed_by = ?3",
            params![
                id,
                update.status.as_str(),
                update.processed_by,
                update.sync_latency_ms,
                update.processing_duration_ms,
                update.rows_affected,
                now_ms,
            ],
        )
        .map_err(map_sql_error)?;

    if changed == 1 {
        return Ok(());
    }
    Err(transition_rejected(conn, id, "complete")?)
}

/// Increment `retry_count` and pick `failed` or `dead_letter` in one
/// transaction.
fn record_failure(
    conn: &mut SqliteConnection,
    id: &str,
    update: &StatusUpdate,
    policy: RetryPolicy,
    now_ms: i64,
) -> DomainResult<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate).map_err(map_sql_error)?;

    let current: Option<(String, u32, Option<String>)> = tx
        .query_row(
            "SELECT status, retry_count, processed_by FROM sync_messages WHERE id = ?1",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()
        .map_err(map_sql_error)?;

    let Some((status, retry_count, holder)) = current else {
        return Err(DualSyncError::NotFound(format!("sync message {id}")));
    };
    let status = SyncStatus::from_str(&status)?;
    if status.is_terminal() {
        return Err(DualSyncError::Conflict(format!(
            "sync message {id} is already {status}; refusing to mark failed"
        )));
    }
    if status == SyncStatus::InProgress && holder != update.processed_by {
        return Err(DualSyncError::Conflict(format!(
            "sync message {id} is held by {}; refusing to mark failed",
            holder.as_deref().unwrap_or("unknown worker")
        )));
    }

    let new_count = retry_count.saturating_add(1);
    let dead_letter = new_count > policy.max_retries;
    let (new_status, next_retry_at) = if dead_letter {
        (SyncStatus::DeadLetter, None)
    } else {
        let delay_ms = i64::try_from(policy.delay_for(new_count).as_millis()).unwrap_or(i64::MAX);
        (SyncStatus::Failed, Some(now_ms.saturating_add(delay_ms)))
    };
    let details = update.error_details.as_ref().map(to_json_text).transpose()?;

    tx.execute(
        "UPDATE sync_messages
         SET status = ?2, retry_count = ?3, next_retry_at = ?4,
             processed_by = COALESCE(?5, processed_by), error_message = ?6, error_details = ?7,
             sync_latency_ms = COALESCE(?8, sync_latency_ms),
             processing_duration_ms = COALESCE(?9, processing_duration_ms),
             updated_at = ?10
         WHERE id = ?1",
        params![
            id,
            new_status.as_str(),
            new_count,
            next_retry_at,
            update.processed_by,
            update.error_message,
            details,
            update.sync_latency_ms,
            update.processing_duration_ms,
            now_ms,
        ],
    )
    .map_err(map_sql_error)?;
    tx.commit().map_err(map_sql_error)?;

    if dead_letter {
        warn!(
            message_id = %id,
            retry_count = new_count,
            max_retries = policy.max_retries,
            "Sync message moved to dead letter"
        );
    }
    Ok(())
}

fn requeue(conn: &SqliteConnection, id: &str, now_ms: i64) -> DomainResult<()> {
    let changed = conn
        .execute(
            "UPDATE sync_messages
             SET status = 'pending', retry_count = 0, next_retry_at = NULL, processed_by = NULL,
                 error_message = NULL, error_details = NULL, updated_at = ?2
             WHERE id = ?1 AND status = 'dead_letter'",
            params![id, now_ms],
        )
        .map_err(map_sql_error)?;

    if changed == 1 {
        return Ok(());
    }
    Err(transition_rejected(conn, id, "requeue")?)
}

fn delete_completed_before(conn: &SqliteConnection, cutoff_ms: i64) -> DomainResult<u64> {
    let deleted = conn
        .execute(
            "DELETE FROM sync_messages
             WHERE status IN ('success', 'partial_success')
               AND COALESCE(updated_at, created_at) < ?1",
            params![cutoff_ms],
        )
        .map_err(map_sql_error)?;
    Ok(deleted as u64)
}

fn release_claims_before(conn: &SqliteConnection, cutoff_ms: i64) -> DomainResult<u64> {
    let released = conn
        .execute(
            "UPDATE sync_messages
             SET status = 'pending', processed_by = NULL
             WHERE status = 'in_progress' AND COALESCE(updated_at, created_at) < ?1",
            params![cutoff_ms],
        )
        .map_err(map_sql_error)?;
    if released > 0 {
        warn!(released, "Released stale in-progress claims");
    }
    Ok(released as u64)
}

/// Builds the error for a conditional update that matched no row.
fn transition_rejected(conn: &SqliteConnection, id: &str, action: &str) -> DomainResult<DualSyncError> {
    let status: Option<String> = conn
        .query_row("SELECT status FROM sync_messages WHERE id = ?1", params![id], |row| row.get(0))
        .optional()
        .map_err(map_sql_error)?;

    Ok(match status {
        None => DualSyncError::NotFound(format!("sync message {id}")),
        Some(status) => DualSyncError::Conflict(format!("cannot {action} sync message {id} in status {status}")),
    })
}

fn map_message_row(row: &Row<'_>) -> rusqlite::Result<SyncMessage> {
    let status_text: String = row.get(7)?;
    let status = SyncStatus::from_str(&status_text).map_err(|e| conversion_error(7, e))?;

    let identifier_text: String = row.get(5)?;
    let record_identifier =
        serde_json::from_str(&identifier_text).map_err(|e| conversion_error(5, e))?;
    let payload_text: String = row.get(6)?;
    let payload = serde_json::from_str(&payload_text).map_err(|e| conversion_error(6, e))?;
    let details_text: Option<String> = row.get(13)?;
    let error_details = details_text
        .map(|text| serde_json::from_str(&text))
        .transpose()
        .map_err(|e| conversion_error(13, e))?;

    let updated_at: Option<i64> = row.get(10)?;

    Ok(SyncMessage {
        id: row.get(0)?,
        sync_direction: row.get(1)?,
        operation_type: row.get(2)?,
        source_table: row.get(3)?,
        target_table: row.get(4)?,
        record_identifier,
        payload,
        status,
        retry_count: row.get(8)?,
        created_at: millis_to_datetime(9, row.get(9)?)?,
        updated_at: updated_at.map(|ms| millis_to_datetime(10, ms)).transpose()?,
        processed_by: row.get(11)?,
        error_message: row.get(12)?,
        error_details,
        sync_latency_ms: row.get(14)?,
        processing_duration_ms: row.get(15)?,
        rows_affected: row.get(16)?,
    })
}

fn millis_to_datetime(idx: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms).ok_or_else(|| {
        conversion_error(idx, DualSyncError::Database(format!("timestamp out of range: {ms}")))
    })
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn to_json_text<T: serde::Serialize>(value: &T) -> DomainResult<String> {
    serde_json::to_string(value)
        .map_err(|e| DualSyncError::InvalidInput(format!("value is not serializable: {e}")))
}

fn to_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// ============================================================================
// Tests
// ============================================================================
