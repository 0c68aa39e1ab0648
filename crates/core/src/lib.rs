//! # DualSync Core
//!
//! Pure sync logic - no infrastructure dependencies.
//!
//! This crate contains:
//! - Port interfaces (traits) for the message store and both target stores
//! - The sync executor (one message, one cross-store operation)
//! - The sync processor (batching, status bookkeeping, retry/DLQ reporting)
//!
//! ## Architecture Principles
//! - Only depends on `dualsync-domain`
//! - No database, HTTP, or platform code
//! - All external dependencies via traits

pub mod sync;

pub use sync::executor::{
    ExecutionResult, ExecutorError, FailureKind, MessageExecutor, StoreSide, SyncExecutor,
};
pub use sync::ports::{MessageStore, RelationalStore, TimeSeriesStore};
pub use sync::processor::{
    BatchSummary, MessageOutcome, ProcessorSettings, ProcessorStats, RetrySummary, SyncProcessor,
};
