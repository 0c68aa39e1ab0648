//! Dual-store synchronization
//!
//! - [`ports`]: message store and target store traits
//! - [`executor`]: performs one message's cross-store operation
//! - [`processor`]: drives the message store toward a converged state

pub mod executor;
pub mod ports;
pub mod processor;
