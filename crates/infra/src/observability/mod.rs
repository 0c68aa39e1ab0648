//! Observability infrastructure: worker metrics and tracing setup
//!
//! ## Design Principles
//!
//! 1. **Poison Recovery**: mutex locks recover the inner data and log a
//!    warning instead of panicking.
//! 2. **Result Returns**: record methods return `MetricsResult<()>` so a
//!    failing metric is logged by the caller and never interrupts sync work.
//! 3. **Ring Buffers**: `VecDeque` with O(1) eviction for duration samples.

pub mod logging;
pub mod metrics;

pub use logging::init_tracing;

/// Metrics error type
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Empty data set - cannot calculate aggregate metric
    #[error("Empty data: cannot calculate {metric}")]
    EmptyData {
        /// Metric name that failed (e.g., "P95", "P50")
        metric: &'static str,
    },

    /// Percentile outside `0.0..=1.0`
    #[error("Invalid percentile {value} for {metric}")]
    InvalidPercentile {
        /// Metric name
        metric: &'static str,
        /// Requested percentile
        value: f64,
    },
}

/// Result type for metrics operations
pub type MetricsResult<T> = Result<T, MetricsError>;
