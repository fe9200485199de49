//! Resilience coordination shared by Postgate publishing workers.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: error classification, retry policies, jitter, clock,
//!   serde helpers
//! - `runtime` (default): shared store, adaptive rate limiter, circuit
//!   breaker, metrics collector, testing utilities
//!
//! Every runtime component is an explicit instance built around an
//! `Arc<dyn SharedStore>` and a [`Clock`]; nothing here is a process-wide
//! singleton.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod error;
#[cfg(feature = "foundation")]
pub mod resilience;
#[cfg(feature = "foundation")]
pub mod utils;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod observability;
#[cfg(feature = "runtime")]
pub mod store;

// Testing utilities
// ---------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod testing;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "foundation")]
pub use error::{ErrorClassification, ErrorSeverity};
#[cfg(feature = "runtime")]
pub use observability::metrics::{
    AggregatedMetrics, LatencySummary, MetricsCollector, MetricsConfig, MetricsError,
    MetricsSnapshot,
};
#[cfg(feature = "foundation")]
pub use resilience::{
    apply_jitter, categorize, parse_retry_after, parse_retry_after_at, CategorizedError,
    Clock, ErrorCategory, MockClock, RawErrorContext, RetryPolicy, SystemClock,
};
#[cfg(feature = "runtime")]
pub use resilience::{
    AdaptiveRateLimiter, AdmissionDecision, CircuitBreaker, CircuitBreakerConfig,
    CircuitPhase, CircuitRecord, DenyReason, RateLimitState, RateLimiterConfig,
};
#[cfg(feature = "runtime")]
pub use store::{InMemoryStore, SharedStore, StoreError, StoreResult, Versioned};
#[cfg(feature = "foundation")]
pub use utils::serde::duration_millis;
