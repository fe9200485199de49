//! Adaptive per-principal rate limiting
//!
//! The limiter enforces a minimum interval between requests made on behalf of
//! one principal. The interval starts at `base_delay`, doubles on every
//! reported failure (up to `max_delay`) and shrinks by 10% after every run of
//! consecutive successes. A `Retry-After` hint from the platform blocks the
//! principal outright until it elapses.
//!
//! State lives in the shared store under `rate_limit:{principal}:state`.
//! Admission is a single compare-and-set on the versioned record, so two
//! workers racing for the same slot cannot both be admitted.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::backoff::{apply_jitter, parse_retry_after_at};
use super::{Clock, ConfigError, ConfigResult, SystemClock};
use crate::store::keys::rate_limit_key;
use crate::store::{read_json, write_json, InMemoryStore, SharedStore, StoreResult};
use crate::utils::serde::duration_millis;

/// Configuration for the adaptive rate limiter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// When false every admission check passes and reports are ignored
    pub enabled: bool,
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
    pub success_decrease_factor: f64,
    pub failure_increase_factor: f64,
    /// Consecutive successes needed before the delay shrinks
    pub successes_before_decrease: u32,
    /// Fraction of the delay used as ± jitter on the required interval
    pub jitter_percent: f64,
    /// Inactivity TTL of the stored state, refreshed on each write
    #[serde(with = "duration_millis")]
    pub state_ttl: Duration,
    /// Bound on compare-and-set retries per operation
    pub max_cas_attempts: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            success_decrease_factor: 0.9,
            failure_increase_factor: 2.0,
            successes_before_decrease: 3,
            jitter_percent: 0.2,
            state_ttl: Duration::from_secs(3600),
            max_cas_attempts: 16,
        }
    }
}

impl RateLimiterConfig {
    pub fn builder() -> RateLimiterConfigBuilder {
        RateLimiterConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.base_delay.is_zero() {
            return Err(ConfigError::invalid("base_delay must be greater than zero"));
        }
        if self.max_delay < self.base_delay {
            return Err(ConfigError::invalid("max_delay must be at least base_delay"));
        }
        if !(self.success_decrease_factor > 0.0 && self.success_decrease_factor <= 1.0) {
            return Err(ConfigError::invalid("success_decrease_factor must be in (0, 1]"));
        }
        if !(self.failure_increase_factor >= 1.0) {
            return Err(ConfigError::invalid("failure_increase_factor must be at least 1"));
        }
        if self.successes_before_decrease == 0 {
            return Err(ConfigError::invalid("successes_before_decrease must be greater than 0"));
        }
        if !(0.0..=1.0).contains(&self.jitter_percent) {
            return Err(ConfigError::invalid("jitter_percent must be between 0 and 1"));
        }
        if self.state_ttl.is_zero() {
            return Err(ConfigError::invalid("state_ttl must be greater than zero"));
        }
        if self.max_cas_attempts == 0 {
            return Err(ConfigError::invalid("max_cas_attempts must be greater than 0"));
        }
        Ok(())
    }

    fn base_delay_ms(&self) -> u64 {
        u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX)
    }

    fn max_delay_ms(&self) -> u64 {
        u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Builder for RateLimiterConfig
#[derive(Debug)]
pub struct RateLimiterConfigBuilder {
    config: RateLimiterConfig,
}

impl Default for RateLimiterConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiterConfigBuilder {
    pub fn new() -> Self {
        Self { config: RateLimiterConfig::default() }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    pub fn success_decrease_factor(mut self, factor: f64) -> Self {
        self.config.success_decrease_factor = factor;
        self
    }

    pub fn failure_increase_factor(mut self, factor: f64) -> Self {
        self.config.failure_increase_factor = factor;
        self
    }

    pub fn successes_before_decrease(mut self, count: u32) -> Self {
        self.config.successes_before_decrease = count;
        self
    }

    pub fn jitter_percent(mut self, percent: f64) -> Self {
        self.config.jitter_percent = percent;
        self
    }

    pub fn state_ttl(mut self, ttl: Duration) -> Self {
        self.config.state_ttl = ttl;
        self
    }

    pub fn max_cas_attempts(mut self, attempts: u32) -> Self {
        self.config.max_cas_attempts = attempts;
        self
    }

    pub fn build(self) -> ConfigResult<RateLimiterConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Persisted limiter state for one principal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitState {
    /// Epoch millis before which the principal is blocked by `Retry-After`
    pub retry_after_until_ms: Option<u64>,
    /// Epoch millis of the last admitted request; `None` = never admitted
    pub last_request_ms: Option<u64>,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub current_delay_ms: u64,
}

impl RateLimitState {
    fn fresh(config: &RateLimiterConfig) -> Self {
        Self {
            retry_after_until_ms: None,
            last_request_ms: None,
            consecutive_successes: 0,
            consecutive_failures: 0,
            current_delay_ms: config.base_delay_ms(),
        }
    }

    fn clamp_delay(&mut self, config: &RateLimiterConfig) {
        self.current_delay_ms =
            self.current_delay_ms.clamp(config.base_delay_ms(), config.max_delay_ms());
    }

    /// The adaptive delay currently enforced between requests
    pub fn current_delay(&self) -> Duration {
        Duration::from_millis(self.current_delay_ms)
    }
}

/// Why an admission check was denied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// The platform asked us to back off via `Retry-After`
    RetryAfter,
    /// Not enough time has passed since the last admitted request
    AdaptiveDelay,
    /// The compare-and-set loop was exhausted by concurrent writers
    Contention,
}

impl DenyReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RetryAfter => "retry_after",
            Self::AdaptiveDelay => "adaptive_delay",
            Self::Contention => "contention",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`AdaptiveRateLimiter::check_admission`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionDecision {
    pub allowed: bool,
    /// How long to wait before asking again (denials only)
    pub wait: Option<Duration>,
    pub reason: Option<DenyReason>,
}

impl AdmissionDecision {
    pub const fn allow() -> Self {
        Self { allowed: true, wait: None, reason: None }
    }

    pub const fn deny(reason: DenyReason, wait: Duration) -> Self {
        Self { allowed: false, wait: Some(wait), reason: Some(reason) }
    }
}

/// Store-backed adaptive rate limiter
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
///
/// use postgate_common::{AdaptiveRateLimiter, InMemoryStore, RateLimiterConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let limiter = AdaptiveRateLimiter::new(RateLimiterConfig::default(), Arc::new(InMemoryStore::new()))?;
///
/// let decision = limiter.check_admission("principal-1").await;
/// if decision.allowed {
///     // call the platform, then report the outcome
///     limiter.report_success("principal-1").await;
/// }
/// # Ok(())
/// # }
/// ```
pub struct AdaptiveRateLimiter<C: Clock = SystemClock> {
    config: RateLimiterConfig,
    store: Arc<dyn SharedStore>,
    fallback: InMemoryStore<C>,
    clock: Arc<C>,
}

impl<C: Clock> fmt::Debug for AdaptiveRateLimiter<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdaptiveRateLimiter").field("config", &self.config).finish()
    }
}

impl AdaptiveRateLimiter<SystemClock> {
    pub fn new(config: RateLimiterConfig, store: Arc<dyn SharedStore>) -> ConfigResult<Self> {
        Self::with_clock(config, store, SystemClock)
    }
}

impl<C: Clock> AdaptiveRateLimiter<C> {
    /// Create a limiter with a custom clock (useful for testing)
    pub fn with_clock(
        config: RateLimiterConfig,
        store: Arc<dyn SharedStore>,
        clock: C,
    ) -> ConfigResult<Self> {
        config.validate()?;
        let clock = Arc::new(clock);
        Ok(Self {
            config,
            store,
            fallback: InMemoryStore::with_shared_clock(Arc::clone(&clock)),
            clock,
        })
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Ask whether a request for `principal` may proceed right now.
    ///
    /// An admitted check records the request time, so callers must only ask
    /// when they intend to send.
    pub async fn check_admission(&self, principal: &str) -> AdmissionDecision {
        if !self.config.enabled {
            return AdmissionDecision::allow();
        }

        match self.admit_in(self.store.as_ref(), principal).await {
            Ok(decision) => decision,
            Err(err) if err.is_unavailable() => {
                warn!(principal, error = %err, "Shared store unavailable, using local rate limit state");
                self.admit_in(&self.fallback, principal).await.unwrap_or_else(|err| {
                    warn!(principal, error = %err, "Local rate limit state failed, admitting");
                    AdmissionDecision::allow()
                })
            }
            Err(err) => {
                warn!(principal, error = %err, "Rate limit state unreadable, admitting");
                AdmissionDecision::allow()
            }
        }
    }

    /// Record a successful request for `principal`.
    pub async fn report_success(&self, principal: &str) {
        if !self.config.enabled {
            return;
        }

        let config = &self.config;
        self.mutate(principal, &|state: &mut RateLimitState, _now: u64| {
            state.consecutive_successes = state.consecutive_successes.saturating_add(1);
            state.consecutive_failures = 0;
            state.retry_after_until_ms = None;

            if state.consecutive_successes >= config.successes_before_decrease {
                let decreased = scale(state.current_delay_ms, config.success_decrease_factor);
                state.current_delay_ms = decreased.max(config.base_delay_ms());
                state.consecutive_successes = 0;
            }
        })
        .await;
    }

    /// Record a failed request for `principal`, honouring an optional
    /// `Retry-After` header value.
    pub async fn report_failure(&self, principal: &str, retry_after: Option<&str>) {
        if !self.config.enabled {
            return;
        }

        let retry_after_secs = retry_after.map_or(0, |value| self.parse_retry_after(value));
        let config = &self.config;
        self.mutate(principal, &|state: &mut RateLimitState, now: u64| {
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            state.consecutive_successes = 0;

            if retry_after_secs > 0 {
                state.retry_after_until_ms =
                    Some(now.saturating_add(retry_after_secs.saturating_mul(1_000)));
            }

            let increased = scale(state.current_delay_ms, config.failure_increase_factor);
            state.current_delay_ms = increased.min(config.max_delay_ms());
        })
        .await;

        if retry_after_secs > 0 {
            debug!(principal, retry_after_secs, "Honouring Retry-After");
        }
    }

    /// Seconds until the time described by a `Retry-After` value.
    pub fn parse_retry_after(&self, value: &str) -> u64 {
        parse_retry_after_at(value, self.clock.now_utc())
    }

    /// Current stored state for `principal`, if any.
    pub async fn state(&self, principal: &str) -> Option<RateLimitState> {
        let key = rate_limit_key(principal);
        let record = match read_json::<RateLimitState>(self.store.as_ref(), &key).await {
            Err(err) if err.is_unavailable() => read_json(&self.fallback, &key).await,
            other => other,
        };
        record.ok().and_then(|record| record.value)
    }

    async fn admit_in(
        &self,
        store: &dyn SharedStore,
        principal: &str,
    ) -> StoreResult<AdmissionDecision> {
        let key = rate_limit_key(principal);

        for _ in 0..self.config.max_cas_attempts {
            let now = self.clock.millis_since_epoch();
            let record = read_json::<RateLimitState>(store, &key).await?;
            let mut state = record.value.unwrap_or_else(|| RateLimitState::fresh(&self.config));
            state.clamp_delay(&self.config);

            if let Some(until) = state.retry_after_until_ms.filter(|until| *until > now) {
                let wait = Duration::from_millis(until - now);
                debug!(principal, wait_ms = until - now, "Denied by Retry-After");
                return Ok(AdmissionDecision::deny(DenyReason::RetryAfter, wait));
            }

            let required = apply_jitter(state.current_delay(), self.config.jitter_percent);
            let required_ms = u64::try_from(required.as_millis()).unwrap_or(u64::MAX);

            if let Some(last) = state.last_request_ms {
                let elapsed = now.saturating_sub(last);
                if elapsed < required_ms {
                    let wait = Duration::from_millis(required_ms - elapsed);
                    debug!(principal, elapsed_ms = elapsed, required_ms, "Denied by adaptive delay");
                    return Ok(AdmissionDecision::deny(DenyReason::AdaptiveDelay, wait));
                }
            }

            state.last_request_ms = Some(now);
            if write_json(store, &key, record.version, &state, Some(self.config.state_ttl)).await? {
                return Ok(AdmissionDecision::allow());
            }
            debug!(principal, "Rate limit state changed concurrently, re-evaluating");
        }

        warn!(
            principal,
            attempts = self.config.max_cas_attempts,
            "Rate limit admission contention, deferring"
        );
        Ok(AdmissionDecision::deny(DenyReason::Contention, self.config.base_delay))
    }

    async fn mutate(&self, principal: &str, update: &(dyn Fn(&mut RateLimitState, u64) + Sync)) {
        match self.mutate_in(self.store.as_ref(), principal, update).await {
            Ok(()) => {}
            Err(err) if err.is_unavailable() => {
                warn!(principal, error = %err, "Shared store unavailable, updating local rate limit state");
                if let Err(err) = self.mutate_in(&self.fallback, principal, update).await {
                    warn!(principal, error = %err, "Local rate limit update failed");
                }
            }
            Err(err) => warn!(principal, error = %err, "Rate limit update failed"),
        }
    }

    async fn mutate_in(
        &self,
        store: &dyn SharedStore,
        principal: &str,
        update: &(dyn Fn(&mut RateLimitState, u64) + Sync),
    ) -> StoreResult<()> {
        let key = rate_limit_key(principal);

        for _ in 0..self.config.max_cas_attempts {
            let now = self.clock.millis_since_epoch();
            let record = read_json::<RateLimitState>(store, &key).await?;
            let mut state = record.value.unwrap_or_else(|| RateLimitState::fresh(&self.config));
            state.clamp_delay(&self.config);

            update(&mut state, now);

            if write_json(store, &key, record.version, &state, Some(self.config.state_ttl)).await? {
                return Ok(());
            }
        }

        warn!(principal, "Rate limit update dropped after repeated contention");
        Ok(())
    }
}

fn scale(delay_ms: u64, factor: f64) -> u64 {
    let scaled = (delay_ms as f64 * factor).round();
    if scaled >= u64::MAX as f64 {
        u64::MAX
    } else {
        scaled.max(0.0) as u64
    }
}
