//! Metrics collected by the background sync worker

pub mod worker;

pub use worker::{WorkerMetrics, WorkerMetricsSnapshot};
