//! Metrics value types

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// Hash fields used for counters in `metrics:snapshot`
pub(crate) mod fields {
    pub const TOTAL_JOBS: &str = "total_jobs";
    pub const SUCCESSFUL_JOBS: &str = "successful_jobs";
    pub const FAILED_JOBS: &str = "failed_jobs";
    pub const RETRIED_JOBS: &str = "retried_jobs";
    pub const RATE_LIMIT_HITS: &str = "rate_limit_hits";
    pub const CIRCUIT_BREAKER_OPENS: &str = "circuit_breaker_opens";
    /// Prefix of per-category error counters (`errors:rate_limit`, ...)
    pub const ERROR_PREFIX: &str = "errors:";
}

/// Latency statistics in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LatencySummary {
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    pub max: u64,
    pub avg: f64,
    pub sum: u64,
    pub count: usize,
}

impl LatencySummary {
    /// Summarize a set of latency samples.
    ///
    /// Percentiles use the nearest-rank index `round(p * (n - 1))` over the
    /// sorted samples. No samples gives an all-zero summary.
    pub fn from_samples(mut samples: Vec<u64>) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        samples.sort_unstable();

        let count = samples.len();
        let sum = samples.iter().fold(0u64, |acc, v| acc.saturating_add(*v));
        Self {
            p50: percentile(&samples, 0.50),
            p95: percentile(&samples, 0.95),
            p99: percentile(&samples, 0.99),
            max: samples[count - 1],
            avg: sum as f64 / count as f64,
            sum,
            count,
        }
    }
}

fn percentile(sorted: &[u64], p: f64) -> u64 {
    let last = sorted.len().saturating_sub(1);
    let index = (p * last as f64).round() as usize;
    sorted.get(index.min(last)).copied().unwrap_or(0)
}

/// Point-in-time view of one collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_jobs: u64,
    pub successful_jobs: u64,
    pub failed_jobs: u64,
    pub retried_jobs: u64,
    pub rate_limit_hits: u64,
    pub circuit_breaker_opens: u64,
    /// `successful / (successful + failed)`, 0 when nothing has finished
    pub success_rate: f64,
    /// Latency over successful and failed jobs in the window
    pub latency: LatencySummary,
    pub success_latency: LatencySummary,
    pub failure_latency: LatencySummary,
    /// Failure counts keyed by category metric label
    pub errors_by_category: BTreeMap<String, u64>,
    /// Window the latency figures cover; `None` = every retained sample
    pub window_ms: Option<u64>,
    pub timestamp_ms: u64,
}

/// Totals merged across every worker that has flushed
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AggregatedMetrics {
    pub total_jobs: u64,
    pub successful_jobs: u64,
    pub failed_jobs: u64,
    pub retried_jobs: u64,
    pub rate_limit_hits: u64,
    pub circuit_breaker_opens: u64,
    pub errors_by_category: BTreeMap<String, u64>,
}

impl AggregatedMetrics {
    pub(crate) fn from_hash(hash: &HashMap<String, i64>) -> Self {
        let read = |field: &str| hash.get(field).map_or(0, |v| u64::try_from(*v).unwrap_or(0));
        let errors_by_category = hash
            .iter()
            .filter_map(|(field, value)| {
                field
                    .strip_prefix(fields::ERROR_PREFIX)
                    .map(|label| (label.to_string(), u64::try_from(*value).unwrap_or(0)))
            })
            .collect();

        Self {
            total_jobs: read(fields::TOTAL_JOBS),
            successful_jobs: read(fields::SUCCESSFUL_JOBS),
            failed_jobs: read(fields::FAILED_JOBS),
            retried_jobs: read(fields::RETRIED_JOBS),
            rate_limit_hits: read(fields::RATE_LIMIT_HITS),
            circuit_breaker_opens: read(fields::CIRCUIT_BREAKER_OPENS),
            errors_by_category,
        }
    }

    pub fn success_rate(&self) -> f64 {
        success_rate(self.successful_jobs, self.failed_jobs)
    }
}

/// One flushed point in `metrics:timeline`; counters are deltas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelinePoint {
    pub timestamp_ms: u64,
    pub instance: String,
    pub deltas: BTreeMap<String, u64>,
    pub p95_ms: u64,
}

/// What a successful flush wrote
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FlushReport {
    /// Counter deltas merged into the shared snapshot
    pub deltas: BTreeMap<String, u64>,
    /// Timeline points dropped for being older than the retention window
    pub trimmed: usize,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }
}

pub(crate) fn success_rate(successful: u64, failed: u64) -> f64 {
    let finished = successful.saturating_add(failed);
    if finished == 0 {
        0.0
    } else {
        successful as f64 / finished as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_summary_is_zero() {
        assert_eq!(LatencySummary::from_samples(Vec::new()), LatencySummary::default());
    }

    #[test]
    fn test_single_sample_fills_every_percentile() {
        let summary = LatencySummary::from_samples(vec![42]);
        assert_eq!((summary.p50, summary.p95, summary.p99, summary.max), (42, 42, 42, 42));
        assert_eq!(summary.avg, 42.0);
    }

    #[test]
    fn test_percentiles_use_rounded_index() {
        let samples: Vec<u64> = (1..=100).collect();
        let summary = LatencySummary::from_samples(samples);
        // round(0.5 * 99) = 50 -> value 51
        assert_eq!(summary.p50, 51);
        // round(0.95 * 99) = 94 -> value 95
        assert_eq!(summary.p95, 95);
        assert_eq!(summary.p99, 99);
        assert_eq!(summary.max, 100);
        assert_eq!(summary.sum, 5050);
    }

    #[test]
    fn test_aggregated_from_hash() {
        let hash = HashMap::from([
            ("total_jobs".to_string(), 10),
            ("successful_jobs".to_string(), 7),
            ("failed_jobs".to_string(), 3),
            ("errors:rate_limit".to_string(), 2),
            ("errors:server_error".to_string(), 1),
        ]);
        let aggregated = AggregatedMetrics::from_hash(&hash);
        assert_eq!(aggregated.total_jobs, 10);
        assert_eq!(aggregated.errors_by_category.get("rate_limit"), Some(&2));
        assert!((aggregated.success_rate() - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn test_success_rate_without_finished_jobs() {
        assert_eq!(success_rate(0, 0), 0.0);
        assert_eq!(success_rate(1, 0), 1.0);
    }
}
