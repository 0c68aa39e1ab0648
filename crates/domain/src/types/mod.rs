//! Domain types and models
//!
//! - [`message`]: the sync message, its categories and record identifiers
//! - [`status`]: message lifecycle states and the status update written back
//!   to the message store

pub mod message;
pub mod status;

pub use message::{OperationType, RecordIdentifier, RecordKey, SyncDirection, SyncMessage};
pub use status::{StatusCounts, StatusUpdate, SyncStatus};
