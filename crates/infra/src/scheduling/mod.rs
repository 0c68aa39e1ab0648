//! Lifecycle primitives shared by background workers
//!
//! Workers follow the same runtime rules:
//! - Explicit lifecycle management (start/stop)
//! - Join handles for spawned tasks
//! - Cancellation token support
//! - Bounded joins on stop; work is bounded between units, never mid-unit

pub mod error;

pub use error::{SchedulerError, SchedulerResult};
