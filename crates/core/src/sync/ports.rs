//! Port interfaces for sync operations

use async_trait::async_trait;
use dualsync_domain::{RecordKey, Result, StatusUpdate, SyncMessage};
use serde_json::Value;

/// Durable, queue-like store of sync messages.
///
/// Implementations own the atomicity guarantees the processor relies on:
/// - a transition to `in_progress` succeeds for exactly one worker and
///   fails with [`dualsync_domain::DualSyncError::Conflict`] for the others;
/// - while a row is `in_progress`, only the worker named in `processed_by`
///   may write its terminal status; anyone else gets `Conflict`;
/// - a `failed` write increments `retry_count` and, once the count exceeds
///   the configured ceiling, escalates to `dead_letter` in the same write.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Enqueue a new message (producer side)
    async fn enqueue(&self, message: &SyncMessage) -> Result<()>;

    /// Fetch up to `limit` pending messages
    async fn get_pending_messages(&self, limit: usize) -> Result<Vec<SyncMessage>>;

    /// Fetch up to `limit` failed messages that are due for another attempt
    async fn get_retryable_messages(&self, limit: usize) -> Result<Vec<SyncMessage>>;

    /// Look up a single message
    async fn get_message_by_id(&self, id: &str) -> Result<Option<SyncMessage>>;

    /// Apply a status transition and its telemetry
    async fn update_message_status(&self, id: &str, update: &StatusUpdate) -> Result<()>;

    /// Return `in_progress` claims untouched for longer than `older_than` to
    /// `pending`; returns how many were released.
    async fn release_stale_claims(&self, older_than: chrono::Duration) -> Result<u64>;
}

/// Versioned time-series store (side A).
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// Write `data` as the newest version of `key` in `library`; returns the
    /// version number written.
    async fn write(&self, library: &str, key: &RecordKey, data: &Value) -> Result<u64>;

    /// Read the newest version of `key`.
    async fn read(&self, library: &str, key: &RecordKey) -> Result<Option<Value>>;

    /// Remove every version of `key`; returns how many were removed.
    async fn delete(&self, library: &str, key: &RecordKey) -> Result<u64>;
}

/// Relational store (side B).
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Insert or fully overwrite the row identified by `key`.
    async fn upsert(&self, table: &str, key: &RecordKey, data: &Value) -> Result<()>;

    /// Read the row identified by `key`.
    async fn fetch(&self, table: &str, key: &RecordKey) -> Result<Option<Value>>;

    /// Delete the row identified by `key`; returns rows removed.
    async fn delete(&self, table: &str, key: &RecordKey) -> Result<u64>;
}
