//! Shared test helpers for `dualsync-core` integration tests.
//!
//! In-memory mocks for the message store and the two data stores. The mock
//! message store enforces the same claim and escalation rules as the SQLite
//! store so processor behaviour can be exercised without a database.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dualsync_core::{ExecutionResult, MessageExecutor, MessageStore, RelationalStore, TimeSeriesStore};
use dualsync_domain::{
    DualSyncError, OperationType, RecordIdentifier, RecordKey, Result as DomainResult,
    StatusUpdate, SyncDirection, SyncMessage, SyncStatus,
};
use serde_json::Value;
use tokio::sync::Mutex as TokioMutex;

/// In-memory `MessageStore` with failure toggles.
pub struct MockMessageStore {
    messages: TokioMutex<HashMap<String, SyncMessage>>,
    order: TokioMutex<Vec<String>>,
    max_retries: u32,
    fail_fetch: AtomicBool,
    fail_terminal_writes: AtomicBool,
    fail_all_writes: AtomicBool,
    /// Every status write attempted, in order.
    pub updates: TokioMutex<Vec<(String, StatusUpdate)>>,
    pub claim_attempts: AtomicUsize,
}

impl MockMessageStore {
    pub fn new(max_retries: u32) -> Self {
        Self {
            messages: TokioMutex::new(HashMap::new()),
            order: TokioMutex::new(Vec::new()),
            max_retries,
            fail_fetch: AtomicBool::new(false),
            fail_terminal_writes: AtomicBool::new(false),
            fail_all_writes: AtomicBool::new(false),
            updates: TokioMutex::new(Vec::new()),
            claim_attempts: AtomicUsize::new(0),
        }
    }

    pub fn with_fail_fetch(self) -> Self {
        self.fail_fetch.store(true, Ordering::SeqCst);
        self
    }

    /// Claims succeed but success/failed writes are rejected.
    pub fn with_fail_terminal_writes(self) -> Self {
        self.fail_terminal_writes.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_fail_all_writes(self) -> Self {
        self.fail_all_writes.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_fail_terminal_writes(&self, fail: bool) {
        self.fail_terminal_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn insert(&self, message: SyncMessage) {
        self.order.lock().await.push(message.id.clone());
        self.messages.lock().await.insert(message.id.clone(), message);
    }

    pub async fn get(&self, id: &str) -> SyncMessage {
        self.messages.lock().await.get(id).cloned().expect("message exists")
    }

    /// Status write a concurrent worker would have made.
    pub async fn claim_by_other_worker(&self, id: &str, worker_id: &str) {
        let mut messages = self.messages.lock().await;
        let message = messages.get_mut(id).expect("message exists");
        message.status = SyncStatus::InProgress;
        message.processed_by = Some(worker_id.to_string());
    }

    async fn select(&self, limit: usize, predicate: impl Fn(&SyncMessage) -> bool) -> Vec<SyncMessage> {
        let order = self.order.lock().await;
        let messages = self.messages.lock().await;
        order
            .iter()
            .filter_map(|id| messages.get(id))
            .filter(|message| predicate(message))
            .take(limit)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MessageStore for MockMessageStore {
    async fn enqueue(&self, message: &SyncMessage) -> DomainResult<()> {
        self.insert(message.clone()).await;
        Ok(())
    }

    async fn get_pending_messages(&self, limit: usize) -> DomainResult<Vec<SyncMessage>> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(DualSyncError::Database("queue unavailable".into()));
        }
        Ok(self.select(limit, |m| m.status == SyncStatus::Pending).await)
    }

    async fn get_retryable_messages(&self, limit: usize) -> DomainResult<Vec<SyncMessage>> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(DualSyncError::Database("queue unavailable".into()));
        }
        let max_retries = self.max_retries;
        Ok(self
            .select(limit, |m| m.status == SyncStatus::Failed && m.retry_count <= max_retries)
            .await)
    }

    async fn get_message_by_id(&self, id: &str) -> DomainResult<Option<SyncMessage>> {
        Ok(self.messages.lock().await.get(id).cloned())
    }

    async fn update_message_status(&self, id: &str, update: &StatusUpdate) -> DomainResult<()> {
        self.updates.lock().await.push((id.to_string(), update.clone()));

        if self.fail_all_writes.load(Ordering::SeqCst) {
            return Err(DualSyncError::Database("store unreachable".into()));
        }

        let mut messages = self.messages.lock().await;
        let message =
            messages.get_mut(id).ok_or_else(|| DualSyncError::NotFound(format!("message {id}")))?;

        match update.status {
            SyncStatus::InProgress => {
                self.claim_attempts.fetch_add(1, Ordering::SeqCst);
                if !message.status.is_claimable() {
                    return Err(DualSyncError::Conflict(format!(
                        "message {id} is {}",
                        message.status
                    )));
                }
            }
            _ if message.status == SyncStatus::InProgress
                && message.processed_by != update.processed_by =>
            {
                return Err(DualSyncError::Conflict(format!(
                    "message {id} is held by {:?}",
                    message.processed_by
                )));
            }
            _ if self.fail_terminal_writes.load(Ordering::SeqCst) => {
                return Err(DualSyncError::Database("write rejected".into()));
            }
            SyncStatus::Failed => {
                message.retry_count += 1;
                message.error_message = update.error_message.clone();
                message.error_details = update.error_details.clone();
                message.status = if message.retry_count > self.max_retries {
                    SyncStatus::DeadLetter
                } else {
                    SyncStatus::Failed
                };
                message.processed_by = update.processed_by.clone();
                message.updated_at = Some(Utc::now());
                return Ok(());
            }
            _ => {}
        }

        message.status = update.status;
        message.processed_by = update.processed_by.clone();
        message.updated_at = Some(Utc::now());
        if update.sync_latency_ms.is_some() {
            message.sync_latency_ms = update.sync_latency_ms;
            message.processing_duration_ms = update.processing_duration_ms;
            message.rows_affected = update.rows_affected;
        }
        Ok(())
    }

    async fn release_stale_claims(&self, older_than: chrono::Duration) -> DomainResult<u64> {
        let cutoff = Utc::now() - older_than;
        let mut released = 0;
        for message in self.messages.lock().await.values_mut() {
            let touched = message.updated_at.unwrap_or(message.created_at);
            if message.status == SyncStatus::InProgress && touched < cutoff {
                message.status = SyncStatus::Pending;
                message.processed_by = None;
                released += 1;
            }
        }
        Ok(released)
    }
}

/// In-memory versioned time-series store.
#[derive(Default)]
pub struct MockTimeSeriesStore {
    pub libraries: TokioMutex<HashMap<(String, RecordKey), Vec<Value>>>,
    fail: AtomicBool,
}

impl MockTimeSeriesStore {
    pub fn failing() -> Self {
        Self { fail: AtomicBool::new(true), ..Default::default() }
    }
}

#[async_trait]
impl TimeSeriesStore for MockTimeSeriesStore {
    async fn write(&self, library: &str, key: &RecordKey, data: &Value) -> DomainResult<u64> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DualSyncError::Network("time-series store unreachable".into()));
        }
        let mut libraries = self.libraries.lock().await;
        let versions = libraries.entry((library.to_string(), key.clone())).or_default();
        versions.push(data.clone());
        Ok(versions.len() as u64)
    }

    async fn read(&self, library: &str, key: &RecordKey) -> DomainResult<Option<Value>> {
        let libraries = self.libraries.lock().await;
        Ok(libraries.get(&(library.to_string(), key.clone())).and_then(|v| v.last().cloned()))
    }

    async fn delete(&self, library: &str, key: &RecordKey) -> DomainResult<u64> {
        let mut libraries = self.libraries.lock().await;
        Ok(libraries.remove(&(library.to_string(), key.clone())).map_or(0, |v| v.len() as u64))
    }
}

/// In-memory relational store keyed by table and record key.
#[derive(Default)]
pub struct MockRelationalStore {
    pub rows: TokioMutex<HashMap<(String, RecordKey), Value>>,
    fail: AtomicBool,
}

impl MockRelationalStore {
    pub fn failing() -> Self {
        Self { fail: AtomicBool::new(true), ..Default::default() }
    }
}

#[async_trait]
impl RelationalStore for MockRelationalStore {
    async fn upsert(&self, table: &str, key: &RecordKey, data: &Value) -> DomainResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DualSyncError::Database("relational store unreachable".into()));
        }
        self.rows.lock().await.insert((table.to_string(), key.clone()), data.clone());
        Ok(())
    }

    async fn fetch(&self, table: &str, key: &RecordKey) -> DomainResult<Option<Value>> {
        Ok(self.rows.lock().await.get(&(table.to_string(), key.clone())).cloned())
    }

    async fn delete(&self, table: &str, key: &RecordKey) -> DomainResult<u64> {
        Ok(u64::from(self.rows.lock().await.remove(&(table.to_string(), key.clone())).is_some()))
    }
}

/// Executor that returns a canned result and counts calls.
pub struct StubExecutor {
    result: ExecutionResult,
    pub calls: AtomicUsize,
}

impl StubExecutor {
    pub fn succeeding(rows: u64) -> Arc<Self> {
        Arc::new(Self {
            result: ExecutionResult {
                success: true,
                error: None,
                failure_kind: None,
                duration_ms: 3,
                rows_affected: rows,
                skipped: 0,
            },
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(error: &str) -> Arc<Self> {
        Arc::new(Self {
            result: ExecutionResult {
                success: false,
                error: Some(error.to_string()),
                failure_kind: None,
                duration_ms: 2,
                rows_affected: 0,
                skipped: 0,
            },
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl MessageExecutor for StubExecutor {
    async fn execute(&self, _message: &SyncMessage) -> ExecutionResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

/// Executor that takes `delay` per message and then succeeds.
pub struct SlowExecutor {
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl SlowExecutor {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self { delay, calls: AtomicUsize::new(0) })
    }
}

#[async_trait]
impl MessageExecutor for SlowExecutor {
    async fn execute(&self, _message: &SyncMessage) -> ExecutionResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        ExecutionResult {
            success: true,
            error: None,
            failure_kind: None,
            duration_ms: u64::try_from(self.delay.as_millis()).unwrap_or(u64::MAX),
            rows_affected: 1,
            skipped: 0,
        }
    }
}

pub fn full_identifier() -> RecordIdentifier {
    RecordIdentifier::new().with("symbol", "AAA").with("kind", "quote").with("granularity", "1d")
}

pub fn quote_insert() -> SyncMessage {
    SyncMessage::new(
        SyncDirection::TimeseriesToRelational,
        OperationType::Insert,
        "ts_quotes",
        "quotes",
        full_identifier(),
        serde_json::json!({"symbol": "AAA", "kind": "quote", "granularity": "1d", "close": 10.0}),
    )
}
