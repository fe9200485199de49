//! Store key schema

/// Hash of merged cross-worker metric counters
pub const METRICS_SNAPSHOT_KEY: &str = "metrics:snapshot";

/// Score-ordered set of flushed metric points, scored by epoch millis
pub const METRICS_TIMELINE_KEY: &str = "metrics:timeline";

/// Adaptive rate limit state for one principal
pub fn rate_limit_key(principal_id: &str) -> String {
    format!("rate_limit:{principal_id}:state")
}

/// Circuit breaker record for one endpoint key
pub fn circuit_key(endpoint_key: &str) -> String {
    format!("circuit:{endpoint_key}")
}
