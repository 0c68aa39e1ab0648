//! Background synchronization services
//!
//! - SyncWorker: drives the sync processor on pending and retry cadences
//! - SyncError: classification of failed worker passes with retry hints
//!
//! Workers use explicit lifecycle management, join handle tracking, and
//! cancellation support.

mod errors;
pub mod worker;

pub use errors::{SyncError, SyncErrorCategory};
pub use worker::{SyncWorker, SyncWorkerConfig};
