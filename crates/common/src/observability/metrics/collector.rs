//! Per-worker job metrics collector

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::export::render_text;
use super::snapshot::{fields, success_rate, FlushReport, LatencySummary, MetricsSnapshot, TimelinePoint};
use super::{AggregatedMetrics, MetricsConfig, MetricsResult};
use crate::resilience::{Clock, ConfigResult, ErrorCategory, SystemClock};
use crate::store::keys::{METRICS_SNAPSHOT_KEY, METRICS_TIMELINE_KEY};
use crate::store::SharedStore;

#[derive(Debug, Clone, Copy)]
struct LatencySample {
    at_ms: u64,
    latency_ms: u64,
}

#[derive(Debug, Default)]
struct Counters {
    total_jobs: AtomicU64,
    successful_jobs: AtomicU64,
    failed_jobs: AtomicU64,
    retried_jobs: AtomicU64,
    rate_limit_hits: AtomicU64,
    circuit_breaker_opens: AtomicU64,
}

impl Counters {
    fn reset(&self) {
        for counter in [
            &self.total_jobs,
            &self.successful_jobs,
            &self.failed_jobs,
            &self.retried_jobs,
            &self.rate_limit_hits,
            &self.circuit_breaker_opens,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
    }
}

/// Collects job outcomes for one worker process
///
/// Counters are process totals. Latency samples live in two ring buffers
/// (successes and failures), each holding the newest `max_samples` entries.
/// When the config is disabled every `record_*` call is a no-op.
pub struct MetricsCollector<C: Clock = SystemClock> {
    config: MetricsConfig,
    clock: Arc<C>,
    instance_id: String,
    counters: Counters,
    success_samples: Mutex<VecDeque<LatencySample>>,
    failure_samples: Mutex<VecDeque<LatencySample>>,
    errors_by_category: Mutex<BTreeMap<ErrorCategory, u64>>,
    /// Counter totals already merged into the shared snapshot
    flushed: Mutex<BTreeMap<String, u64>>,
    /// Serializes flushes so one delta is never merged twice
    flush_guard: tokio::sync::Mutex<()>,
}

impl<C: Clock> fmt::Debug for MetricsCollector<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("instance_id", &self.instance_id)
            .field("config", &self.config)
            .finish()
    }
}

impl MetricsCollector<SystemClock> {
    pub fn new(config: MetricsConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> MetricsCollector<C> {
    pub fn with_clock(config: MetricsConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;
        let capacity = config.max_samples;
        Ok(Self {
            config,
            clock: Arc::new(clock),
            instance_id: format!("{:016x}", rand::random::<u64>()),
            counters: Counters::default(),
            success_samples: Mutex::new(VecDeque::with_capacity(capacity)),
            failure_samples: Mutex::new(VecDeque::with_capacity(capacity)),
            errors_by_category: Mutex::new(BTreeMap::new()),
            flushed: Mutex::new(BTreeMap::new()),
            flush_guard: tokio::sync::Mutex::new(()),
        })
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// Random identifier tagging this collector's timeline points
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn record_job_start(&self) {
        self.bump(&self.counters.total_jobs);
    }

    pub fn record_job_success(&self, latency: Duration) {
        if !self.config.enabled {
            return;
        }
        self.counters.successful_jobs.fetch_add(1, Ordering::SeqCst);
        self.push_sample(&self.success_samples, latency);
    }

    pub fn record_job_failure(&self, category: ErrorCategory, latency: Duration) {
        if !self.config.enabled {
            return;
        }
        self.counters.failed_jobs.fetch_add(1, Ordering::SeqCst);
        *self.errors_by_category.lock().entry(category).or_insert(0) += 1;
        self.push_sample(&self.failure_samples, latency);
    }

    pub fn record_rate_limit_hit(&self) {
        self.bump(&self.counters.rate_limit_hits);
    }

    pub fn record_circuit_breaker_open(&self) {
        self.bump(&self.counters.circuit_breaker_opens);
    }

    pub fn record_job_retry(&self) {
        self.bump(&self.counters.retried_jobs);
    }

    /// Current counters plus latency statistics.
    ///
    /// With `Some(window)` only samples recorded within the last `window`
    /// feed the percentiles; `None` uses every retained sample.
    pub fn get_metrics(&self, window: Option<Duration>) -> MetricsSnapshot {
        let now_ms = self.clock.millis_since_epoch();
        let cutoff_ms = window.map_or(0, |window| now_ms.saturating_sub(duration_ms(window)));

        let successes = collect_since(&self.success_samples.lock(), cutoff_ms);
        let failures = collect_since(&self.failure_samples.lock(), cutoff_ms);
        let combined: Vec<u64> = successes.iter().chain(failures.iter()).copied().collect();

        let successful_jobs = self.counters.successful_jobs.load(Ordering::SeqCst);
        let failed_jobs = self.counters.failed_jobs.load(Ordering::SeqCst);

        MetricsSnapshot {
            total_jobs: self.counters.total_jobs.load(Ordering::SeqCst),
            successful_jobs,
            failed_jobs,
            retried_jobs: self.counters.retried_jobs.load(Ordering::SeqCst),
            rate_limit_hits: self.counters.rate_limit_hits.load(Ordering::SeqCst),
            circuit_breaker_opens: self.counters.circuit_breaker_opens.load(Ordering::SeqCst),
            success_rate: success_rate(successful_jobs, failed_jobs),
            latency: LatencySummary::from_samples(combined),
            success_latency: LatencySummary::from_samples(successes),
            failure_latency: LatencySummary::from_samples(failures),
            errors_by_category: self
                .errors_by_category
                .lock()
                .iter()
                .map(|(category, count)| (category.metric_label().to_string(), *count))
                .collect(),
            window_ms: window.map(duration_ms),
            timestamp_ms: now_ms,
        }
    }

    /// Prometheus text exposition of every retained sample
    pub fn export_text_format(&self) -> MetricsResult<String> {
        Ok(render_text(&self.get_metrics(None))?)
    }

    /// Clear local counters, samples and flush bookkeeping.
    ///
    /// Totals already merged into the shared store are left alone. Waits for
    /// an in-progress flush so its baseline update cannot outlive the reset.
    pub async fn reset(&self) {
        let _guard = self.flush_guard.lock().await;
        self.counters.reset();
        self.success_samples.lock().clear();
        self.failure_samples.lock().clear();
        self.errors_by_category.lock().clear();
        self.flushed.lock().clear();
    }

    /// Merge counter deltas since the last successful flush into the shared
    /// snapshot, append a timeline point, and trim old timeline entries.
    ///
    /// Each field is marked flushed only after its increment succeeds, so a
    /// failing store leaves the remaining deltas for the next flush.
    pub async fn flush(&self, store: &dyn SharedStore) -> MetricsResult<FlushReport> {
        if !self.config.enabled {
            return Ok(FlushReport::default());
        }
        let _guard = self.flush_guard.lock().await;

        let pending = self.pending_deltas();
        let mut report = FlushReport::default();
        for (field, delta) in pending {
            let increment = i64::try_from(delta).unwrap_or(i64::MAX);
            store.hash_incr(METRICS_SNAPSHOT_KEY, &field, increment).await?;
            *self.flushed.lock().entry(field.clone()).or_insert(0) += delta;
            report.deltas.insert(field, delta);
        }

        let now_ms = self.clock.millis_since_epoch();
        let point = TimelinePoint {
            timestamp_ms: now_ms,
            instance: self.instance_id.clone(),
            deltas: report.deltas.clone(),
            p95_ms: self.get_metrics(Some(self.config.flush_interval)).latency.p95,
        };
        let score = i64::try_from(now_ms).unwrap_or(i64::MAX);
        store.sorted_add(METRICS_TIMELINE_KEY, score, serde_json::to_string(&point)?).await?;

        let horizon = now_ms.saturating_sub(duration_ms(self.config.retention));
        report.trimmed = store
            .sorted_remove_below(METRICS_TIMELINE_KEY, i64::try_from(horizon).unwrap_or(i64::MAX))
            .await?;

        debug!(
            instance = %self.instance_id,
            fields = report.deltas.len(),
            trimmed = report.trimmed,
            "Flushed metrics"
        );
        Ok(report)
    }

    /// Counter totals merged across every worker that has flushed
    pub async fn aggregated(&self, store: &dyn SharedStore) -> MetricsResult<AggregatedMetrics> {
        let hash = store.hash_get_all(METRICS_SNAPSHOT_KEY).await?;
        Ok(AggregatedMetrics::from_hash(&hash))
    }

    /// Timeline points from every worker flushed within the last `since`
    pub async fn timeline(
        &self,
        store: &dyn SharedStore,
        since: Duration,
    ) -> MetricsResult<Vec<TimelinePoint>> {
        let now_ms = self.clock.millis_since_epoch();
        let min = i64::try_from(now_ms.saturating_sub(duration_ms(since))).unwrap_or(i64::MAX);
        let entries = store.sorted_range(METRICS_TIMELINE_KEY, min, i64::MAX).await?;

        let mut points = Vec::with_capacity(entries.len());
        for (_, member) in entries {
            match serde_json::from_str(&member) {
                Ok(point) => points.push(point),
                Err(err) => warn!(error = %err, "Skipping malformed timeline entry"),
            }
        }
        Ok(points)
    }

    fn bump(&self, counter: &AtomicU64) {
        if self.config.enabled {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn push_sample(&self, buffer: &Mutex<VecDeque<LatencySample>>, latency: Duration) {
        let sample =
            LatencySample { at_ms: self.clock.millis_since_epoch(), latency_ms: duration_ms(latency) };
        let mut samples = buffer.lock();
        samples.push_back(sample);
        while samples.len() > self.config.max_samples {
            samples.pop_front();
        }
    }

    fn counter_totals(&self) -> BTreeMap<String, u64> {
        let mut totals = BTreeMap::from([
            (fields::TOTAL_JOBS.to_string(), self.counters.total_jobs.load(Ordering::SeqCst)),
            (fields::SUCCESSFUL_JOBS.to_string(), self.counters.successful_jobs.load(Ordering::SeqCst)),
            (fields::FAILED_JOBS.to_string(), self.counters.failed_jobs.load(Ordering::SeqCst)),
            (fields::RETRIED_JOBS.to_string(), self.counters.retried_jobs.load(Ordering::SeqCst)),
            (fields::RATE_LIMIT_HITS.to_string(), self.counters.rate_limit_hits.load(Ordering::SeqCst)),
            (
                fields::CIRCUIT_BREAKER_OPENS.to_string(),
                self.counters.circuit_breaker_opens.load(Ordering::SeqCst),
            ),
        ]);
        for (category, count) in self.errors_by_category.lock().iter() {
            totals.insert(format!("{}{}", fields::ERROR_PREFIX, category.metric_label()), *count);
        }
        totals
    }

    fn pending_deltas(&self) -> Vec<(String, u64)> {
        let totals = self.counter_totals();
        let flushed = self.flushed.lock();
        totals
            .into_iter()
            .filter_map(|(field, total)| {
                let delta = total.saturating_sub(flushed.get(&field).copied().unwrap_or(0));
                (delta > 0).then_some((field, delta))
            })
            .collect()
    }
}

fn collect_since(samples: &VecDeque<LatencySample>, cutoff_ms: u64) -> Vec<u64> {
    samples.iter().filter(|s| s.at_ms >= cutoff_ms).map(|s| s.latency_ms).collect()
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
