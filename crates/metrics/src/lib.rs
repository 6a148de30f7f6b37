//! Resource metering for project containers.
//!
//! The collector samples cumulative CPU and memory counters for every running
//! project, turns them into percentages from the delta against the previous
//! sample, and persists the result with a rolling retention window.
//!
//! Metric names for the `metrics` facade live in [`definitions`]:
//!
//! ```rust,ignore
//! use kennel_metrics::{counter, provisioning, labels};
//!
//! counter!(provisioning::OUTCOMES_TOTAL, labels::OUTCOME => "running").increment(1);
//! ```

pub mod collector;
pub mod cpu;
mod definitions;
pub mod store;

pub use {
    collector::{CycleReport, MetricsCollector},
    cpu::{CpuTracker, cpu_percent},
    definitions::*,
    store::{MetricSample, MetricSampleStore, SqliteMetricSampleStore},
};

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
