//! # DualSync Infrastructure
//!
//! Infrastructure implementations of core sync ports.
//!
//! This crate contains:
//! - The SQLite message store and versioned time-series store
//! - The PostgreSQL relational store
//! - The background sync worker and its lifecycle errors
//! - Configuration loading, tracing setup and worker metrics
//!
//! ## Architecture
//! - Implements traits defined in `dualsync-core`
//! - Depends on `dualsync-domain` and `dualsync-core`
//! - Contains all "impure" code (I/O, network, timers)

pub mod config;
pub mod database;
pub mod errors;
pub mod observability;
pub mod relational;
pub mod scheduling;
pub mod sync;

// Re-export commonly used items
pub use database::{DbManager, RetryPolicy, SqliteMessageStore, SqliteTimeSeriesStore};
pub use errors::InfraError;
pub use relational::PostgresRelationalStore;
pub use sync::{SyncWorker, SyncWorkerConfig};
