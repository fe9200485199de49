//! Publish job metrics
//!
//! Each worker owns one [`MetricsCollector`]. It keeps process-local counters
//! and bounded latency buffers, periodically flushes counter deltas into the
//! shared store so totals can be aggregated across workers, and renders a
//! Prometheus-style text exposition for pull-based scraping.

pub mod collector;
pub mod export;
pub mod snapshot;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use collector::MetricsCollector;
pub use snapshot::{AggregatedMetrics, FlushReport, LatencySummary, MetricsSnapshot, TimelinePoint};

use crate::resilience::{ConfigError, ConfigResult};
use crate::store::StoreError;
use crate::utils::serde::duration_millis;

/// Metrics operation errors
#[derive(Debug, Error)]
pub enum MetricsError {
    /// The shared store rejected or could not serve a flush/aggregate call
    #[error("Metrics store operation failed: {0}")]
    Store(#[from] StoreError),

    #[error("Metrics serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Metrics export failed: {0}")]
    Export(#[from] prometheus::Error),
}

/// Result type for metrics operations
pub type MetricsResult<T> = Result<T, MetricsError>;

/// Configuration for metrics collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// When false nothing is recorded and no flusher is started
    pub enabled: bool,
    #[serde(with = "duration_millis")]
    pub flush_interval: Duration,
    /// How long flushed timeline points are kept in the shared store
    #[serde(with = "duration_millis")]
    pub retention: Duration,
    /// Latency samples kept per outcome type
    pub max_samples: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            flush_interval: Duration::from_secs(60),
            retention: Duration::from_secs(24 * 60 * 60),
            max_samples: 1000,
        }
    }
}

impl MetricsConfig {
    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.flush_interval.is_zero() {
            return Err(ConfigError::invalid("flush_interval must be greater than zero"));
        }
        if self.retention.is_zero() {
            return Err(ConfigError::invalid("retention must be greater than zero"));
        }
        if self.max_samples == 0 {
            return Err(ConfigError::invalid("max_samples must be greater than 0"));
        }
        Ok(())
    }
}
