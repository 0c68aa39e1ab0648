//! Sync executor: performs one message's cross-store operation.
//!
//! The executor never touches message status. It dispatches first on the
//! message direction and then on the operation, writes to the destination
//! store of each leg, and folds every outcome (including invalid input and
//! unknown categories) into an [`ExecutionResult`]. Errors never escape
//! [`SyncExecutor::execute`].

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dualsync_domain::{
    DualSyncError, OperationType, RecordKey, SyncDirection, SyncMessage,
};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::sync::ports::{RelationalStore, TimeSeriesStore};

/// Store a leg writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreSide {
    /// Store A, addressed by library name
    TimeSeries,
    /// Store B, addressed by table name
    Relational,
}

impl std::fmt::Display for StoreSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TimeSeries => f.write_str("time-series store"),
            Self::Relational => f.write_str("relational store"),
        }
    }
}

/// Coarse failure category recorded in `error_details`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Rejected before any write
    InvalidInput,
    /// Unrecognized direction or operation
    UnsupportedCategory,
    /// A store write failed; retry-eligible
    Store,
}

dualsync_domain::impl_domain_status_conversions!(FailureKind {
    InvalidInput => "invalid_input",
    UnsupportedCategory => "unsupported_category",
    Store => "store",
});

/// Errors raised inside the executor boundary.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("unknown sync direction: {0}")]
    UnknownDirection(String),

    #[error("unknown operation type: {0}")]
    UnknownOperation(String),

    #[error("missing required fields: {}", .0.join(", "))]
    MissingRequiredFields(Vec<&'static str>),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("bulk insert had no valid elements ({skipped} skipped)")]
    NoValidElements { skipped: u64 },

    #[error("bulk insert wrote {written} element(s), {failed} write(s) failed: {first_error}")]
    BulkWriteFailures { written: u64, failed: u64, first_error: String },

    #[error("{side} write failed: {source}")]
    Store {
        side: StoreSide,
        #[source]
        source: DualSyncError,
    },
}

impl ExecutorError {
    /// Category recorded in `error_details.kind`.
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::UnknownDirection(_) | Self::UnknownOperation(_) => {
                FailureKind::UnsupportedCategory
            }
            Self::MissingRequiredFields(_)
            | Self::InvalidPayload(_)
            | Self::NoValidElements { .. } => FailureKind::InvalidInput,
            Self::BulkWriteFailures { .. } | Self::Store { .. } => FailureKind::Store,
        }
    }
}

/// Outcome of one message. Always produced, success or failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// True when every leg succeeded.
    pub success: bool,
    /// First failure encountered, if any.
    pub error: Option<String>,
    pub failure_kind: Option<FailureKind>,
    /// Wall time spent inside the executor.
    pub duration_ms: u64,
    /// Rows (or versions) written or removed, summed across legs.
    pub rows_affected: u64,
    /// Bulk-insert elements skipped because they failed validation.
    pub skipped: u64,
}

impl ExecutionResult {
    /// Succeeded, but some bulk elements were dropped as invalid.
    pub const fn is_partial(&self) -> bool {
        self.success && self.skipped > 0
    }
}

/// Seam between the processor and the executor.
#[async_trait]
pub trait MessageExecutor: Send + Sync {
    async fn execute(&self, message: &SyncMessage) -> ExecutionResult;
}

/// One-way half of a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leg {
    TimeseriesToRelational,
    RelationalToTimeseries,
}

impl Leg {
    const fn destination(self) -> StoreSide {
        match self {
            Self::TimeseriesToRelational => StoreSide::Relational,
            Self::RelationalToTimeseries => StoreSide::TimeSeries,
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::TimeseriesToRelational => "timeseries_to_relational",
            Self::RelationalToTimeseries => "relational_to_timeseries",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Applied {
    rows: u64,
    skipped: u64,
}

impl Applied {
    const fn plus(self, other: Self) -> Self {
        Self { rows: self.rows + other.rows, skipped: self.skipped + other.skipped }
    }
}

/// Error plus whatever was applied before it occurred.
#[derive(Debug)]
struct Failure {
    error: ExecutorError,
    applied: Applied,
}

impl From<ExecutorError> for Failure {
    fn from(error: ExecutorError) -> Self {
        Self { error, applied: Applied::default() }
    }
}

type LegResult = Result<Applied, Failure>;

/// Executes sync messages against the two stores.
pub struct SyncExecutor {
    timeseries: Arc<dyn TimeSeriesStore>,
    relational: Arc<dyn RelationalStore>,
}

impl SyncExecutor {
    pub fn new(timeseries: Arc<dyn TimeSeriesStore>, relational: Arc<dyn RelationalStore>) -> Self {
        Self { timeseries, relational }
    }

    /// Perform `message`'s operation and report the outcome.
    pub async fn execute(&self, message: &SyncMessage) -> ExecutionResult {
        let started = Instant::now();
        let outcome = self.dispatch(message).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match outcome {
            Ok(applied) => ExecutionResult {
                success: true,
                error: None,
                failure_kind: None,
                duration_ms,
                rows_affected: applied.rows,
                skipped: applied.skipped,
            },
            Err(failure) => {
                warn!(
                    message_id = %message.id,
                    kind = %failure.error.kind(),
                    error = %failure.error,
                    duration_ms,
                    "Sync execution failed"
                );
                ExecutionResult {
                    success: false,
                    error: Some(failure.error.to_string()),
                    failure_kind: Some(failure.error.kind()),
                    duration_ms,
                    rows_affected: failure.applied.rows,
                    skipped: failure.applied.skipped,
                }
            }
        }
    }

    async fn dispatch(&self, message: &SyncMessage) -> LegResult {
        let direction = message
            .direction()
            .map_err(|_| ExecutorError::UnknownDirection(message.sync_direction.clone()))?;
        let operation = message
            .operation()
            .map_err(|_| ExecutorError::UnknownOperation(message.operation_type.clone()))?;

        match direction {
            SyncDirection::TimeseriesToRelational => {
                self.run_leg(Leg::TimeseriesToRelational, operation, message).await
            }
            SyncDirection::RelationalToTimeseries => {
                self.run_leg(Leg::RelationalToTimeseries, operation, message).await
            }
            SyncDirection::Bidirectional => {
                let forward = self.run_leg(Leg::TimeseriesToRelational, operation, message).await;
                let backward = self.run_leg(Leg::RelationalToTimeseries, operation, message).await;
                combine_legs(forward, backward)
            }
        }
    }

    async fn run_leg(&self, leg: Leg, operation: OperationType, message: &SyncMessage) -> LegResult {
        let side = leg.destination();
        let table = match side {
            StoreSide::TimeSeries => message.timeseries_table(),
            StoreSide::Relational => message.relational_table(),
        };

        debug!(
            message_id = %message.id,
            leg = leg.label(),
            operation = %operation,
            table,
            "Running sync leg"
        );

        match operation {
            OperationType::Insert | OperationType::Update => {
                let key = resolve_key(message)?;
                let data = single_record(&message.payload)?;
                self.write(side, table, &key, data).await?;
                Ok(Applied { rows: 1, skipped: 0 })
            }
            OperationType::Delete => {
                let key = resolve_key(message)?;
                let rows = self.remove(side, table, &key).await?;
                Ok(Applied { rows, skipped: 0 })
            }
            OperationType::BulkInsert => self.bulk_insert(side, table, message).await,
        }
    }

    async fn bulk_insert(&self, side: StoreSide, table: &str, message: &SyncMessage) -> LegResult {
        let elements = message.payload.as_array().ok_or_else(|| {
            ExecutorError::InvalidPayload("bulk_insert payload must be an array".to_string())
        })?;
        if elements.is_empty() {
            return Err(ExecutorError::MissingRequiredFields(vec!["payload"]).into());
        }

        let mut applied = Applied::default();
        let mut write_failures = 0_u64;
        let mut first_error: Option<String> = None;

        for (index, element) in elements.iter().enumerate() {
            let key = match message.record_identifier.merged_with_element(element).to_record_key()
            {
                Ok(key) => key,
                Err(missing) => {
                    warn!(
                        message_id = %message.id,
                        index,
                        missing = ?missing,
                        "Skipping bulk element with incomplete identifier"
                    );
                    applied.skipped += 1;
                    continue;
                }
            };
            let Ok(data) = single_record(element) else {
                warn!(message_id = %message.id, index, "Skipping empty bulk element");
                applied.skipped += 1;
                continue;
            };

            match self.write(side, table, &key, data).await {
                Ok(()) => applied.rows += 1,
                Err(err) => {
                    warn!(message_id = %message.id, index, error = %err, "Bulk element write failed");
                    write_failures += 1;
                    first_error.get_or_insert_with(|| err.to_string());
                }
            }
        }

        if let Some(first_error) = first_error {
            return Err(Failure {
                error: ExecutorError::BulkWriteFailures {
                    written: applied.rows,
                    failed: write_failures,
                    first_error,
                },
                applied,
            });
        }
        if applied.rows == 0 {
            return Err(Failure {
                error: ExecutorError::NoValidElements { skipped: applied.skipped },
                applied,
            });
        }
        Ok(applied)
    }

    async fn write(
        &self,
        side: StoreSide,
        table: &str,
        key: &RecordKey,
        data: &Value,
    ) -> Result<(), ExecutorError> {
        let result = match side {
            StoreSide::TimeSeries => self.timeseries.write(table, key, data).await.map(|_| ()),
            StoreSide::Relational => self.relational.upsert(table, key, data).await,
        };
        result.map_err(|source| ExecutorError::Store { side, source })
    }

    async fn remove(&self, side: StoreSide, table: &str, key: &RecordKey) -> Result<u64, ExecutorError> {
        let result = match side {
            StoreSide::TimeSeries => self.timeseries.delete(table, key).await,
            StoreSide::Relational => self.relational.delete(table, key).await,
        };
        result.map_err(|source| ExecutorError::Store { side, source })
    }
}

#[async_trait]
impl MessageExecutor for SyncExecutor {
    async fn execute(&self, message: &SyncMessage) -> ExecutionResult {
        Self::execute(self, message).await
    }
}

fn resolve_key(message: &SyncMessage) -> Result<RecordKey, ExecutorError> {
    message.record_identifier.to_record_key().map_err(ExecutorError::MissingRequiredFields)
}

/// A single record must be a non-empty JSON object.
fn single_record(payload: &Value) -> Result<&Value, ExecutorError> {
    match payload {
        Value::Object(map) if !map.is_empty() => Ok(payload),
        Value::Null | Value::Object(_) => Err(ExecutorError::MissingRequiredFields(vec!["payload"])),
        _ => Err(ExecutorError::InvalidPayload("expected a JSON object".to_string())),
    }
}

/// Both legs count toward `rows`; the first failure wins.
fn combine_legs(forward: LegResult, backward: LegResult) -> LegResult {
    match (forward, backward) {
        (Ok(a), Ok(b)) => Ok(a.plus(b)),
        (Ok(a), Err(failure)) | (Err(failure), Ok(a)) => {
            Err(Failure { applied: failure.applied.plus(a), error: failure.error })
        }
        (Err(first), Err(second)) => {
            Err(Failure { applied: first.applied.plus(second.applied), error: first.error })
        }
    }
}
