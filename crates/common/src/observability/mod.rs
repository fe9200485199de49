//! Observability primitives
//!
//! - Job metrics collection, flushing and export ([`metrics`])

pub mod metrics;

pub use metrics::{MetricsCollector, MetricsConfig, MetricsError, MetricsResult, MetricsSnapshot};
