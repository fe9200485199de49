//! Prometheus text exposition

use prometheus::{Encoder, Gauge, GaugeVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use super::snapshot::MetricsSnapshot;

const LATENCY_METRIC: &str = "postgate_job_latency_ms";

/// Render a snapshot in the Prometheus text format.
///
/// A fresh registry is filled from the snapshot on every call, so the output
/// reflects exactly one snapshot. Counters are process totals; the latency
/// quantiles cover whatever window the snapshot was taken over.
pub fn render_text(snapshot: &MetricsSnapshot) -> prometheus::Result<String> {
    let registry = Registry::new();

    let counters = [
        ("postgate_jobs_total", "Publish jobs started", snapshot.total_jobs),
        ("postgate_jobs_succeeded_total", "Publish jobs that succeeded", snapshot.successful_jobs),
        ("postgate_jobs_failed_total", "Publish jobs that failed", snapshot.failed_jobs),
        ("postgate_jobs_retried_total", "Publish jobs scheduled for retry", snapshot.retried_jobs),
        (
            "postgate_rate_limit_hits_total",
            "Admissions deferred by the rate limiter",
            snapshot.rate_limit_hits,
        ),
        (
            "postgate_circuit_breaker_opens_total",
            "Circuit breaker open events",
            snapshot.circuit_breaker_opens,
        ),
    ];
    for (name, help, value) in counters {
        let counter = IntCounter::with_opts(Opts::new(name, help))?;
        counter.inc_by(value);
        registry.register(Box::new(counter))?;
    }

    let success_rate =
        Gauge::with_opts(Opts::new("postgate_success_rate", "Successful share of finished jobs"))?;
    success_rate.set(snapshot.success_rate);
    registry.register(Box::new(success_rate))?;

    let errors = IntCounterVec::new(
        Opts::new("postgate_errors_total", "Failed jobs by error category"),
        &["category"],
    )?;
    for (category, count) in &snapshot.errors_by_category {
        errors.with_label_values(&[category.as_str()]).inc_by(*count);
    }
    registry.register(Box::new(errors))?;

    let latency = &snapshot.latency;
    let quantiles =
        GaugeVec::new(Opts::new(LATENCY_METRIC, "Publish job latency in milliseconds"), &["quantile"])?;
    for (quantile, value) in [("0.5", latency.p50), ("0.95", latency.p95), ("0.99", latency.p99)] {
        quantiles.with_label_values(&[quantile]).set(value as f64);
    }
    registry.register(Box::new(quantiles))?;

    let sum = IntGauge::with_opts(Opts::new(
        format!("{LATENCY_METRIC}_sum"),
        "Sum of retained latency samples in milliseconds",
    ))?;
    sum.set(i64::try_from(latency.sum).unwrap_or(i64::MAX));
    registry.register(Box::new(sum))?;

    let count = IntGauge::with_opts(Opts::new(
        format!("{LATENCY_METRIC}_count"),
        "Number of retained latency samples",
    ))?;
    count.set(i64::try_from(latency.count).unwrap_or(i64::MAX));
    registry.register(Box::new(count))?;

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|err| prometheus::Error::Msg(err.to_string()))
}
