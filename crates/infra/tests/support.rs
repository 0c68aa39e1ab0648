#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dualsync_core::{ProcessorSettings, RelationalStore, SyncExecutor, SyncProcessor};
use dualsync_domain::{
    DualSyncError, OperationType, RecordIdentifier, RecordKey, Result as DomainResult,
    SyncDirection, SyncMessage,
};
use dualsync_infra::database::{DbManager, RetryPolicy, SqliteMessageStore, SqliteTimeSeriesStore};
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::Mutex as TokioMutex;

/// Temporary message and time-series databases that stay alive for the
/// duration of a test run.
pub struct TestDatabase {
    pub messages: Arc<DbManager>,
    pub timeseries: Arc<DbManager>,
    _temp_dir: TempDir,
}

impl TestDatabase {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("temp dir should be created");

        let messages = DbManager::new(temp_dir.path().join("messages.db"), 4)
            .expect("message db manager should be created");
        messages.run_migrations().expect("message db migrations should run");

        let timeseries = DbManager::new(temp_dir.path().join("timeseries.db"), 4)
            .expect("time-series db manager should be created");
        timeseries.run_migrations().expect("time-series db migrations should run");

        Self { messages: Arc::new(messages), timeseries: Arc::new(timeseries), _temp_dir: temp_dir }
    }

    /// Execute a batch of SQL statements against the message database.
    pub fn execute_batch(&self, sql: &str) {
        let conn = self
            .messages
            .get_connection()
            .expect("connection should be available for execute_batch");
        conn.execute_batch(sql).expect("SQL batch execution should succeed");
    }
}

impl Default for TestDatabase {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory relational store keyed by `(table, key)`.
#[derive(Default)]
pub struct MemoryRelationalStore {
    pub rows: TokioMutex<HashMap<(String, RecordKey), Value>>,
    fail: AtomicBool,
}

impl MemoryRelationalStore {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub async fn row(&self, table: &str, key: &RecordKey) -> Option<Value> {
        self.rows.lock().await.get(&(table.to_string(), key.clone())).cloned()
    }
}

#[async_trait]
impl RelationalStore for MemoryRelationalStore {
    async fn upsert(&self, table: &str, key: &RecordKey, data: &Value) -> DomainResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DualSyncError::Network("relational store unreachable".into()));
        }
        self.rows.lock().await.insert((table.to_string(), key.clone()), data.clone());
        Ok(())
    }

    async fn fetch(&self, table: &str, key: &RecordKey) -> DomainResult<Option<Value>> {
        Ok(self.row(table, key).await)
    }

    async fn delete(&self, table: &str, key: &RecordKey) -> DomainResult<u64> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DualSyncError::Network("relational store unreachable".into()));
        }
        let removed = self.rows.lock().await.remove(&(table.to_string(), key.clone()));
        Ok(u64::from(removed.is_some()))
    }
}

/// Message store, time-series store and relational mock wired into a
/// processor, all sharing one [`TestDatabase`].
pub struct Pipeline {
    pub db: TestDatabase,
    pub messages: Arc<SqliteMessageStore>,
    pub timeseries: Arc<SqliteTimeSeriesStore>,
    pub relational: Arc<MemoryRelationalStore>,
}

impl Pipeline {
    /// `backoff_secs = 0` makes failed messages retryable immediately.
    pub fn new(max_retries: u32, backoff_secs: u64) -> Self {
        let db = TestDatabase::new();
        let policy = RetryPolicy {
            max_retries,
            backoff: std::time::Duration::from_secs(backoff_secs),
        };
        let messages = Arc::new(SqliteMessageStore::new(Arc::clone(&db.messages), policy));
        let timeseries = Arc::new(SqliteTimeSeriesStore::new(Arc::clone(&db.timeseries)));
        Self { db, messages, timeseries, relational: Arc::new(MemoryRelationalStore::default()) }
    }

    pub fn processor(&self, worker_id: &str) -> Arc<SyncProcessor> {
        let executor = Arc::new(SyncExecutor::new(
            Arc::clone(&self.timeseries) as _,
            Arc::clone(&self.relational) as _,
        ));
        let settings = ProcessorSettings {
            worker_id: worker_id.to_string(),
            batch_size: 50,
            retry_batch_size: 50,
        };
        Arc::new(SyncProcessor::new(Arc::clone(&self.messages) as _, executor, settings))
    }
}

pub fn identifier(symbol: &str) -> RecordIdentifier {
    RecordIdentifier::new().with("symbol", symbol).with("kind", "quote").with("granularity", "1d")
}

pub fn record_key(symbol: &str) -> RecordKey {
    RecordKey::new(symbol, "quote", "1d")
}

pub fn make_message(
    direction: SyncDirection,
    operation: OperationType,
    symbol: &str,
    payload: Value,
) -> SyncMessage {
    SyncMessage::new(direction, operation, "quotes_ts", "quotes", identifier(symbol), payload)
}
