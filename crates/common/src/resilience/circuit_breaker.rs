//! Store-backed circuit breaker keyed by endpoint
//!
//! Each endpoint key has its own three-phase breaker persisted under
//! `circuit:{key}`, so a restarted worker sees the same phase as its peers.
//!
//! - **Closed**: requests flow; consecutive failures are counted and the
//!   circuit opens once they reach `failure_threshold`.
//! - **Open**: requests are rejected until `open_duration` has elapsed since
//!   the last failure. The first check after that flips the circuit to
//!   half-open and is allowed through.
//! - **HalfOpen**: up to `half_open_max_attempts` further probes are allowed.
//!   Any success closes the circuit; any failure reopens it.
//!
//! Records are written with a TTL of `open_duration + 60s` so abandoned keys
//! are reaped by the store. A few extra probes may leak through while workers
//! race on a transition; that is tolerated.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{Clock, ConfigError, ConfigResult, SystemClock};
use crate::store::keys::circuit_key;
use crate::store::{read_json, write_json, InMemoryStore, SharedStore, StoreResult};
use crate::utils::serde::duration_millis;

/// Extra lifetime given to stored records beyond the open duration
const RECORD_TTL_GRACE: Duration = Duration::from_secs(60);

/// Bound on read-modify-write retries per operation
const MAX_WRITE_ATTEMPTS: u32 = 8;

/// Circuit breaker phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitPhase {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitPhase::Closed => write!(f, "CLOSED"),
            CircuitPhase::Open => write!(f, "OPEN"),
            CircuitPhase::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// When false every check passes and records are ignored
    pub enabled: bool,
    /// Consecutive failures that open a closed circuit
    pub failure_threshold: u32,
    /// Time to wait after the last failure before probing again
    #[serde(with = "duration_millis")]
    pub open_duration: Duration,
    /// Probes allowed in half-open after the transition check
    pub half_open_max_attempts: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 3,
            open_duration: Duration::from_secs(300),
            half_open_max_attempts: 1,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold must be greater than 0"));
        }
        if self.open_duration.is_zero() {
            return Err(ConfigError::invalid("open_duration must be greater than zero"));
        }
        Ok(())
    }

    fn open_duration_ms(&self) -> u64 {
        u64::try_from(self.open_duration.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Builder for CircuitBreakerConfig
#[derive(Debug)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl Default for CircuitBreakerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn open_duration(mut self, duration: Duration) -> Self {
        self.config.open_duration = duration;
        self
    }

    pub fn half_open_max_attempts(mut self, attempts: u32) -> Self {
        self.config.half_open_max_attempts = attempts;
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Config values in force when a record was last written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub failure_threshold: u32,
    pub open_duration_ms: u64,
    pub half_open_max_attempts: u32,
}

impl From<&CircuitBreakerConfig> for ConfigSnapshot {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            open_duration_ms: config.open_duration_ms(),
            half_open_max_attempts: config.half_open_max_attempts,
        }
    }
}

/// Persisted breaker state for one endpoint key
///
/// `half_open_probes` is only nonzero while the phase is `HalfOpen`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitRecord {
    pub phase: CircuitPhase,
    pub consecutive_failures: u32,
    pub last_failure_ms: Option<u64>,
    pub half_open_probes: u32,
    pub config: ConfigSnapshot,
}

impl CircuitRecord {
    fn closed(config: &CircuitBreakerConfig) -> Self {
        Self {
            phase: CircuitPhase::Closed,
            consecutive_failures: 0,
            last_failure_ms: None,
            half_open_probes: 0,
            config: ConfigSnapshot::from(config),
        }
    }

    fn transition(&mut self, phase: CircuitPhase) {
        self.phase = phase;
        self.half_open_probes = 0;
    }
}

/// Outcome of [`CircuitBreaker::check`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerDecision {
    pub allowed: bool,
    /// Suggested wait before checking again (denials only)
    pub retry_in: Option<Duration>,
}

impl BreakerDecision {
    pub const ALLOW: Self = Self { allowed: true, retry_in: None };

    pub const fn deny(retry_in: Duration) -> Self {
        Self { allowed: false, retry_in: Some(retry_in) }
    }
}

/// Circuit breaker whose state lives in the shared store
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    store: Arc<dyn SharedStore>,
    fallback: InMemoryStore<C>,
    clock: Arc<C>,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker").field("config", &self.config).finish()
    }
}

impl CircuitBreaker<SystemClock> {
    pub fn new(config: CircuitBreakerConfig, store: Arc<dyn SharedStore>) -> ConfigResult<Self> {
        Self::with_clock(config, store, SystemClock)
    }
}

/// What a single read-modify-write cycle decided
struct Step<T> {
    output: T,
    /// `None` when the record does not need to be written
    next: Option<CircuitRecord>,
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a circuit breaker with a custom clock (useful for testing)
    pub fn with_clock(
        config: CircuitBreakerConfig,
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

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Whether a request to `key` may proceed.
    pub async fn should_allow(&self, key: &str) -> bool {
        self.check(key).await.allowed
    }

    /// Admission check with a suggested wait on denial.
    ///
    /// Open circuits report the time left until probing; a half-open circuit
    /// whose probes are used up reports the full open duration, since a
    /// failed probe reopens it for that long.
    pub async fn check(&self, key: &str) -> BreakerDecision {
        if !self.config.enabled {
            return BreakerDecision::ALLOW;
        }

        let open_ms = self.config.open_duration_ms();
        let max_probes = self.config.half_open_max_attempts;
        let decision = self
            .run(key, BreakerDecision::ALLOW, &|record: &CircuitRecord, now: u64| {
                admission_step(record, now, open_ms, max_probes)
            })
            .await;

        if !decision.allowed {
            debug!(key, retry_in = ?decision.retry_in, "Circuit breaker rejecting call");
        }
        decision
    }

    /// Record a successful call to `key`.
    pub async fn record_success(&self, key: &str) {
        if !self.config.enabled {
            return;
        }

        let closed = self
            .run(key, false, &|record: &CircuitRecord, _now: u64| success_step(record))
            .await;

        if closed {
            info!(key, "Circuit breaker closed after successful probe");
        }
    }

    /// Record a failed call to `key`. Returns true when this call opened the
    /// circuit.
    pub async fn record_failure(&self, key: &str) -> bool {
        if !self.config.enabled {
            return false;
        }

        let threshold = self.config.failure_threshold;
        let opened = self
            .run(key, false, &|record: &CircuitRecord, now: u64| {
                failure_step(record, now, threshold)
            })
            .await;

        if opened {
            warn!(key, threshold, "Circuit breaker opened");
        }
        opened
    }

    /// Current record for `key`; a closed record when none is stored.
    pub async fn state(&self, key: &str) -> CircuitRecord {
        let storage_key = circuit_key(key);
        let record = match read_json::<CircuitRecord>(self.store.as_ref(), &storage_key).await {
            Err(err) if err.is_unavailable() => read_json(&self.fallback, &storage_key).await,
            other => other,
        };
        record
            .ok()
            .and_then(|record| record.value)
            .unwrap_or_else(|| CircuitRecord::closed(&self.config))
    }

    /// Forget all state for `key`, closing the circuit.
    pub async fn reset(&self, key: &str) {
        let storage_key = circuit_key(key);
        if let Err(err) = self.store.delete(&storage_key).await {
            warn!(key, error = %err, "Failed to reset circuit in shared store");
        }
        if let Err(err) = self.fallback.delete(&storage_key).await {
            debug!(key, error = %err, "Failed to reset local circuit state");
        }
        info!(key, "Circuit breaker reset");
    }

    /// Run one read-modify-write against the shared store, falling back to
    /// local state when it is unavailable. `default` is returned if both fail.
    async fn run<T: Copy + Send>(
        &self,
        key: &str,
        default: T,
        step: &(dyn Fn(&CircuitRecord, u64) -> Step<T> + Sync),
    ) -> T {
        match self.run_in(self.store.as_ref(), key, default, step).await {
            Ok(output) => output,
            Err(err) if err.is_unavailable() => {
                warn!(key, error = %err, "Shared store unavailable, using local circuit state");
                self.run_in(&self.fallback, key, default, step).await.unwrap_or_else(|err| {
                    warn!(key, error = %err, "Local circuit state failed");
                    default
                })
            }
            Err(err) => {
                warn!(key, error = %err, "Circuit state update failed");
                default
            }
        }
    }

    async fn run_in<T: Copy + Send>(
        &self,
        store: &dyn SharedStore,
        key: &str,
        default: T,
        step: &(dyn Fn(&CircuitRecord, u64) -> Step<T> + Sync),
    ) -> StoreResult<T> {
        let storage_key = circuit_key(key);
        let ttl = self.config.open_duration.saturating_add(RECORD_TTL_GRACE);
        let mut last_output = default;

        for _ in 0..MAX_WRITE_ATTEMPTS {
            let now = self.clock.millis_since_epoch();
            let stored = read_json::<CircuitRecord>(store, &storage_key).await?;
            let mut record =
                stored.value.unwrap_or_else(|| CircuitRecord::closed(&self.config));
            record.config = ConfigSnapshot::from(&self.config);

            let Step { output, next } = step(&record, now);
            let Some(next) = next else {
                return Ok(output);
            };

            if record.phase != next.phase {
                debug!(key, from = %record.phase, to = %next.phase, "Circuit phase transition");
            }
            if write_json(store, &storage_key, stored.version, &next, Some(ttl)).await? {
                return Ok(output);
            }
            last_output = output;
        }

        warn!(key, "Circuit state write lost to concurrent updates");
        Ok(last_output)
    }
}

fn admission_step(
    record: &CircuitRecord,
    now: u64,
    open_ms: u64,
    max_probes: u32,
) -> Step<BreakerDecision> {
    match record.phase {
        CircuitPhase::Closed => Step { output: BreakerDecision::ALLOW, next: None },
        CircuitPhase::Open => {
            let since_failure =
                record.last_failure_ms.map_or(u64::MAX, |at| now.saturating_sub(at));
            if since_failure > open_ms {
                let mut next = record.clone();
                next.transition(CircuitPhase::HalfOpen);
                return Step { output: BreakerDecision::ALLOW, next: Some(next) };
            }
            let retry_in = Duration::from_millis((open_ms - since_failure).max(1));
            Step { output: BreakerDecision::deny(retry_in), next: None }
        }
        CircuitPhase::HalfOpen if record.half_open_probes < max_probes => {
            let mut next = record.clone();
            next.half_open_probes += 1;
            Step { output: BreakerDecision::ALLOW, next: Some(next) }
        }
        CircuitPhase::HalfOpen => {
            Step { output: BreakerDecision::deny(Duration::from_millis(open_ms)), next: None }
        }
    }
}

/// Output is whether the circuit closed.
fn success_step(record: &CircuitRecord) -> Step<bool> {
    let mut next = record.clone();
    next.consecutive_failures = 0;
    let closed = record.phase == CircuitPhase::HalfOpen;
    if closed {
        next.transition(CircuitPhase::Closed);
    }
    let changed = next != *record;
    Step { output: closed, next: changed.then_some(next) }
}

/// Output is whether the circuit opened.
fn failure_step(record: &CircuitRecord, now: u64, threshold: u32) -> Step<bool> {
    let mut next = record.clone();
    next.consecutive_failures = next.consecutive_failures.saturating_add(1);
    next.last_failure_ms = Some(now);

    let opened = match record.phase {
        CircuitPhase::Closed if next.consecutive_failures >= threshold => true,
        CircuitPhase::HalfOpen => true,
        CircuitPhase::Closed | CircuitPhase::Open => false,
    };
    if opened {
        next.transition(CircuitPhase::Open);
    }
    Step { output: opened, next: Some(next) }
}

#[cfg(test)]
mod tests {
    use super::super::MockClock;
    use super::*;

    fn breaker(clock: &MockClock) -> CircuitBreaker<MockClock> {
        let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
        CircuitBreaker::with_clock(CircuitBreakerConfig::default(), store, clock.clone()).unwrap()
    }

    #[tokio::test]
    async fn test_new_key_is_closed() {
        let clock = MockClock::new();
        let cb = breaker(&clock);
        assert!(cb.should_allow("x").await);
        assert_eq!(cb.state("x").await.phase, CircuitPhase::Closed);
    }

    #[tokio::test]
    async fn test_opens_at_threshold() {
        let clock = MockClock::new();
        let cb = breaker(&clock);

        assert!(!cb.record_failure("x").await);
        assert!(!cb.record_failure("x").await);
        assert!(cb.record_failure("x").await, "third failure should open");

        assert_eq!(cb.state("x").await.phase, CircuitPhase::Open);
        let decision = cb.check("x").await;
        assert!(!decision.allowed);
        assert_eq!(decision.retry_in, Some(Duration::from_secs(300)));
    }

    #[tokio::test]
    async fn test_failures_while_open_only_count() {
        let clock = MockClock::new();
        let cb = breaker(&clock);
        for _ in 0..3 {
            cb.record_failure("x").await;
        }

        assert!(!cb.record_failure("x").await);
        let record = cb.state("x").await;
        assert_eq!(record.phase, CircuitPhase::Open);
        assert_eq!(record.consecutive_failures, 4);
    }

    #[tokio::test]
    async fn test_half_open_transition_and_probe_limit() {
        let clock = MockClock::new();
        let cb = breaker(&clock);
        for _ in 0..3 {
            cb.record_failure("x").await;
        }

        clock.advance(Duration::from_secs(299));
        assert!(!cb.should_allow("x").await);

        clock.advance(Duration::from_secs(1));
        let decision = cb.check("x").await;
        assert!(!decision.allowed, "the open duration must be exceeded, not just reached");
        assert_eq!(decision.retry_in, Some(Duration::from_millis(1)));

        clock.advance(Duration::from_millis(1));
        assert!(cb.should_allow("x").await, "transition check is allowed");
        assert_eq!(cb.state("x").await.phase, CircuitPhase::HalfOpen);
        assert_eq!(cb.state("x").await.half_open_probes, 0);

        assert!(cb.should_allow("x").await, "one probe is allowed");
        assert_eq!(cb.state("x").await.half_open_probes, 1);
        assert!(!cb.should_allow("x").await);
    }

    #[tokio::test]
    async fn test_half_open_success_closes() {
        let clock = MockClock::new();
        let cb = breaker(&clock);
        for _ in 0..3 {
            cb.record_failure("x").await;
        }
        clock.advance(Duration::from_secs(301));
        assert!(cb.should_allow("x").await);

        cb.record_success("x").await;
        let record = cb.state("x").await;
        assert_eq!(record.phase, CircuitPhase::Closed);
        assert_eq!(record.consecutive_failures, 0);
        assert_eq!(record.half_open_probes, 0);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let clock = MockClock::new();
        let cb = breaker(&clock);
        for _ in 0..3 {
            cb.record_failure("x").await;
        }
        clock.advance(Duration::from_secs(301));
        assert!(cb.should_allow("x").await);
        assert!(cb.should_allow("x").await);

        assert!(cb.record_failure("x").await, "failed probe reopens");
        let record = cb.state("x").await;
        assert_eq!(record.phase, CircuitPhase::Open);
        assert_eq!(record.half_open_probes, 0);
        assert!(!cb.should_allow("x").await);
    }

    #[tokio::test]
    async fn test_success_in_closed_resets_failures() {
        let clock = MockClock::new();
        let cb = breaker(&clock);
        cb.record_failure("x").await;
        cb.record_failure("x").await;
        cb.record_success("x").await;
        cb.record_failure("x").await;
        assert_eq!(cb.state("x").await.phase, CircuitPhase::Closed);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let clock = MockClock::new();
        let cb = breaker(&clock);
        for _ in 0..3 {
            cb.record_failure("a").await;
        }
        assert!(!cb.should_allow("a").await);
        assert!(cb.should_allow("b").await);
    }

    #[tokio::test]
    async fn test_reset_closes() {
        let clock = MockClock::new();
        let cb = breaker(&clock);
        for _ in 0..3 {
            cb.record_failure("x").await;
        }
        cb.reset("x").await;
        assert!(cb.should_allow("x").await);
    }

    #[tokio::test]
    async fn test_disabled_breaker() {
        let clock = MockClock::new();
        let config = CircuitBreakerConfig::builder().enabled(false).build().unwrap();
        let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
        let cb = CircuitBreaker::with_clock(config, store, clock).unwrap();
        for _ in 0..10 {
            assert!(!cb.record_failure("x").await);
        }
        assert!(cb.should_allow("x").await);
    }

    #[tokio::test]
    async fn test_record_ttl_reaps_stale_state() {
        let clock = MockClock::new();
        let cb = breaker(&clock);
        for _ in 0..3 {
            cb.record_failure("x").await;
        }
        clock.advance(Duration::from_secs(361));
        assert_eq!(cb.state("x").await.phase, CircuitPhase::Closed);
    }

    #[test]
    fn test_config_validation() {
        assert!(CircuitBreakerConfig::builder().failure_threshold(0).build().is_err());
        assert!(CircuitBreakerConfig::builder().open_duration(Duration::ZERO).build().is_err());
        assert!(CircuitBreakerConfig::builder().half_open_max_attempts(0).build().is_ok());
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(CircuitPhase::HalfOpen.to_string(), "HALF_OPEN");
        assert_eq!(serde_json::to_string(&CircuitPhase::Open).unwrap(), "\"OPEN\"");
    }
}
