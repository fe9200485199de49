//! Publish orchestration service - core business logic

use std::sync::Arc;
use std::time::{Duration, Instant};

use postgate_common::resilience::ConfigResult;
use postgate_common::{
    apply_jitter, categorize, AdaptiveRateLimiter, CategorizedError, CircuitBreaker, Clock,
    ErrorCategory, MetricsCollector, SystemClock,
};
use postgate_domain::constants::{truncate_reason, PAUSE_REASON_CREDENTIALS_REVOKED};
use postgate_domain::{Credentials, PublishFailure, PublishJob, PublishReceipt};
use tracing::{debug, error, info, instrument, warn};

use super::ports::{
    CredentialNotifier, CredentialStore, PublishRecords, Publisher, RevocationNotice, WorkPauser,
};
use super::{DeferReason, OrchestratorConfig, PublishOutcome};

/// Collaborators the orchestrator calls out to
#[derive(Clone)]
pub struct PublishPorts {
    pub publisher: Arc<dyn Publisher>,
    pub credentials: Arc<dyn CredentialStore>,
    pub pauser: Arc<dyn WorkPauser>,
    pub notifier: Arc<dyn CredentialNotifier>,
    pub records: Arc<dyn PublishRecords>,
}

/// Where a failed attempt stopped
enum AttemptError {
    /// Credentials could not be loaded; the platform was never called
    Credentials(PublishFailure),
    Platform(PublishFailure),
}

/// Runs publish jobs through admission, the external call and retry policy
pub struct PublishOrchestrator<C: Clock = SystemClock> {
    config: OrchestratorConfig,
    ports: PublishPorts,
    limiter: Arc<AdaptiveRateLimiter<C>>,
    breaker: Arc<CircuitBreaker<C>>,
    metrics: Arc<MetricsCollector<C>>,
}

impl<C: Clock> std::fmt::Debug for PublishOrchestrator<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishOrchestrator").field("config", &self.config).finish()
    }
}

impl<C: Clock> PublishOrchestrator<C> {
    pub fn new(
        config: OrchestratorConfig,
        ports: PublishPorts,
        limiter: Arc<AdaptiveRateLimiter<C>>,
        breaker: Arc<CircuitBreaker<C>>,
        metrics: Arc<MetricsCollector<C>>,
    ) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self { config, ports, limiter, breaker, metrics })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector<C>> {
        &self.metrics
    }

    /// Run one attempt of `job`.
    #[instrument(
        skip_all,
        fields(
            job_id = %job.id,
            principal = %job.principal_id,
            endpoint = %job.endpoint_key,
            attempt = job.attempt,
        )
    )]
    pub async fn execute(&self, job: &PublishJob) -> PublishOutcome {
        let admission = self.limiter.check_admission(&job.principal_id).await;
        if !admission.allowed {
            self.metrics.record_rate_limit_hit();
            let delay = admission.wait.unwrap_or(self.limiter.config().base_delay);
            debug!(delay_ms = delay.as_millis() as u64, reason = ?admission.reason, "Deferred by rate limiter");
            return PublishOutcome::Deferred { delay, reason: DeferReason::RateLimited };
        }

        let breaker = self.breaker.check(&job.endpoint_key).await;
        if !breaker.allowed {
            self.metrics.record_circuit_breaker_open();
            let delay = breaker.retry_in.unwrap_or(self.breaker.config().open_duration);
            debug!(delay_ms = delay.as_millis() as u64, "Deferred by open circuit");
            return PublishOutcome::Deferred { delay, reason: DeferReason::CircuitOpen };
        }

        self.metrics.record_job_start();
        let started = Instant::now();

        match self.attempt(job).await {
            Ok(receipt) => self.on_success(job, receipt, started.elapsed()).await,
            Err(AttemptError::Credentials(failure)) => {
                self.on_failure(job, &failure, false, started.elapsed()).await
            }
            Err(AttemptError::Platform(failure)) => {
                self.on_failure(job, &failure, true, started.elapsed()).await
            }
        }
    }

    async fn attempt(&self, job: &PublishJob) -> Result<PublishReceipt, AttemptError> {
        let credentials: Credentials = self
            .ports
            .credentials
            .credentials(&job.principal_id)
            .await
            .map_err(AttemptError::Credentials)?;
        let timeout = self.config.publish_timeout;

        match tokio::time::timeout(timeout, self.ports.publisher.publish(&job.content, &credentials))
            .await
        {
            Ok(result) => result.map_err(AttemptError::Platform),
            Err(_) => Err(AttemptError::Platform(PublishFailure::timeout(timeout))),
        }
    }

    async fn on_success(
        &self,
        job: &PublishJob,
        receipt: PublishReceipt,
        latency: Duration,
    ) -> PublishOutcome {
        self.limiter.report_success(&job.principal_id).await;
        self.breaker.record_success(&job.endpoint_key).await;
        self.metrics.record_job_success(latency);

        if let Err(err) = self.ports.records.mark_published(job, &receipt).await {
            error!(error = %err, "Failed to mark content published");
        }
        info!(receipt_id = %receipt.id, latency_ms = latency.as_millis() as u64, "Published");
        PublishOutcome::Published { receipt }
    }

    /// `reached_platform` is false when the attempt failed before the
    /// publisher was called; the limiter and breaker only hear about
    /// platform failures.
    async fn on_failure(
        &self,
        job: &PublishJob,
        failure: &PublishFailure,
        reached_platform: bool,
        latency: Duration,
    ) -> PublishOutcome {
        let categorized = categorize(failure);
        let category = categorized.category;
        let policy = categorized.policy;

        if reached_platform {
            self.limiter.report_failure(&job.principal_id, failure.retry_after.as_deref()).await;
            if policy.use_circuit_breaker && self.breaker.record_failure(&job.endpoint_key).await {
                self.metrics.record_circuit_breaker_open();
            }
        } else {
            debug!("Credential lookup failed before the platform call");
        }
        self.metrics.record_job_failure(category, latency);

        warn!(
            category = %category,
            http_status = ?failure.http_status,
            error = %failure.message,
            "Publish attempt failed"
        );

        if category == ErrorCategory::CredentialRevoked {
            return self.revoke(job, &categorized).await;
        }

        if !policy.retryable || job.attempt >= policy.max_attempts || job.queue_budget_exhausted() {
            return self.fail(job, &categorized).await;
        }

        if policy.requires_credential_refresh {
            if let Err(refresh_failure) = self.ports.credentials.refresh(&job.principal_id).await {
                let refresh = categorize(&refresh_failure);
                if refresh.category == ErrorCategory::CredentialRevoked {
                    return self.revoke(job, &refresh).await;
                }
                warn!(category = %refresh.category, error = %refresh_failure.message, "Credential refresh failed");
            } else {
                debug!("Credentials refreshed");
            }
        }

        let index = usize::try_from(job.attempt.saturating_sub(1)).unwrap_or(usize::MAX);
        let delay = apply_jitter(policy.backoff_delay(index), self.config.retry_jitter_percent);
        self.metrics.record_job_retry();
        debug!(category = %category, delay_ms = delay.as_millis() as u64, "Retry scheduled");

        PublishOutcome::RetryScheduled { delay, category, next_attempt: job.attempt.saturating_add(1) }
    }

    async fn fail(&self, job: &PublishJob, categorized: &CategorizedError) -> PublishOutcome {
        let reason = truncate_reason(&categorized.to_string());
        if let Err(err) = self.ports.records.mark_failed(job, &reason).await {
            error!(error = %err, "Failed to mark content failed");
        }
        info!(category = %categorized.category, "Publish failed permanently");
        PublishOutcome::Failed { category: categorized.category, reason }
    }

    /// Stop everything scheduled for the principal and tell them once.
    async fn revoke(&self, job: &PublishJob, categorized: &CategorizedError) -> PublishOutcome {
        let principal = job.principal_id.as_str();

        let paused_jobs = match self
            .ports
            .pauser
            .pause_scheduled_work(principal, PAUSE_REASON_CREDENTIALS_REVOKED)
            .await
        {
            Ok(count) => count,
            Err(err) => {
                error!(error = %err, "Failed to pause scheduled work after revocation");
                0
            }
        };

        let notice = RevocationNotice {
            job_id: job.id.clone(),
            endpoint_key: job.endpoint_key.clone(),
            message: categorized.raw.message.clone(),
            paused_jobs,
        };
        if let Err(err) = self.ports.notifier.notify_credentials_expired(principal, &notice).await {
            error!(error = %err, "Failed to notify principal about revoked credentials");
        }

        let reason = truncate_reason(&categorized.to_string());
        if let Err(err) = self.ports.records.mark_failed(job, &reason).await {
            error!(error = %err, "Failed to mark content failed");
        }

        warn!(paused_jobs, "Credentials revoked, scheduled work paused");
        PublishOutcome::CredentialsRevoked { paused_jobs }
    }
}
