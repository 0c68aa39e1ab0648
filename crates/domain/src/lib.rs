//! # DualSync Domain
//!
//! Domain types shared by every DualSync crate.
//!
//! This crate contains:
//! - The sync message model and its closed category enums
//! - Status update and telemetry types written back to the message store
//! - Domain error types and Result definitions
//! - Configuration structures
//!
//! ## Architecture
//! - No dependencies on other DualSync crates
//! - Only external dependencies allowed
//! - Pure domain models and data structures

pub mod config;
pub mod constants;
pub mod errors;
pub mod macros;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
