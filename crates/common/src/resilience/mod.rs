//! Resilience patterns for publishing against an unreliable, rate-limited API
//!
//! - **Categorizer**: maps a raw publish failure to an [`ErrorCategory`] and
//!   its fixed [`RetryPolicy`]
//! - **Backoff**: jitter and `Retry-After` parsing
//! - **Adaptive rate limiter**: per-principal minimum interval between
//!   requests, tightened on failures and loosened on sustained success
//! - **Circuit breaker**: per-endpoint three-phase breaker
//!
//! The limiter and the breaker keep their state in a [`SharedStore`] so that
//! independent worker processes observe the same decisions. When the store is
//! unreachable both fall back to a process-local [`InMemoryStore`] and keep
//! admitting work: they fail open, never closed.
//!
//! [`SharedStore`]: crate::store::SharedStore
//! [`InMemoryStore`]: crate::store::InMemoryStore

pub mod backoff;
pub mod categorizer;
pub mod clock;

#[cfg(feature = "runtime")]
pub mod circuit_breaker;
#[cfg(feature = "runtime")]
pub mod rate_limiter;

use thiserror::Error;

pub use backoff::{
    apply_jitter, apply_jitter_with, parse_retry_after, parse_retry_after_at, MIN_JITTERED_DELAY,
};
pub use categorizer::{categorize, CategorizedError, ErrorCategory, RawErrorContext, RetryPolicy};
#[cfg(feature = "runtime")]
pub use circuit_breaker::{
    BreakerDecision, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder,
    CircuitPhase, CircuitRecord,
};
pub use clock::{Clock, MockClock, SystemClock};
#[cfg(feature = "runtime")]
pub use rate_limiter::{
    AdaptiveRateLimiter, AdmissionDecision, DenyReason, RateLimitState, RateLimiterConfig,
    RateLimiterConfigBuilder,
};

/// Configuration validation error shared by the limiter and the breaker
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid { message: message.into() }
    }
}

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;
