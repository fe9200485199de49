//! Shared helpers for `postgate-infra` integration tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use postgate_common::{
    AdaptiveRateLimiter, CircuitBreaker, CircuitBreakerConfig, InMemoryStore, MetricsCollector,
    MetricsConfig, RateLimiterConfig, SharedStore,
};
use postgate_core::ports::{
    CredentialNotifier, CredentialStore, PublishRecords, Publisher, RevocationNotice, WorkPauser,
};
use postgate_core::{JobQueue, OrchestratorConfig, PublishOrchestrator, PublishPorts};
use postgate_domain::{
    Credentials, PublishContent, PublishFailure, PublishJob, PublishReceipt, Result as DomainResult,
};
use tokio::sync::Mutex;

pub fn job(principal: &str) -> PublishJob {
    PublishJob::new(principal, "x:posts", PublishContent::new(format!("content-{principal}"), "Hi"))
}

/// Queue over a fixed list of jobs that records what the worker reports
#[derive(Default)]
pub struct MemoryQueue {
    pending: Mutex<VecDeque<PublishJob>>,
    pub completed: Mutex<Vec<String>>,
    pub rescheduled: Mutex<Vec<(PublishJob, Duration)>>,
    pub failed: Mutex<Vec<(String, String)>>,
}

impl MemoryQueue {
    pub fn with_jobs(jobs: Vec<PublishJob>) -> Self {
        Self { pending: Mutex::new(jobs.into()), ..Self::default() }
    }

    pub async fn reported(&self) -> usize {
        self.completed.lock().await.len()
            + self.rescheduled.lock().await.len()
            + self.failed.lock().await.len()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn next_job(&self) -> DomainResult<Option<PublishJob>> {
        Ok(self.pending.lock().await.pop_front())
    }

    async fn complete(&self, job: &PublishJob, _receipt: &PublishReceipt) -> DomainResult<()> {
        self.completed.lock().await.push(job.id.clone());
        Ok(())
    }

    async fn reschedule(&self, job: PublishJob, delay: Duration) -> DomainResult<()> {
        self.rescheduled.lock().await.push((job, delay));
        Ok(())
    }

    async fn fail(&self, job: &PublishJob, reason: &str) -> DomainResult<()> {
        self.failed.lock().await.push((job.id.clone(), reason.to_string()));
        Ok(())
    }
}

/// Publisher that answers after `delay` and tracks peak concurrency
pub struct GaugedPublisher {
    delay: Duration,
    failure: Option<PublishFailure>,
    in_flight: AtomicUsize,
    pub peak: AtomicUsize,
}

impl GaugedPublisher {
    pub fn succeeding(delay: Duration) -> Self {
        Self { delay, failure: None, in_flight: AtomicUsize::new(0), peak: AtomicUsize::new(0) }
    }

    pub fn failing(failure: PublishFailure) -> Self {
        Self { failure: Some(failure), ..Self::succeeding(Duration::ZERO) }
    }
}

#[async_trait]
impl Publisher for GaugedPublisher {
    async fn publish(
        &self,
        content: &PublishContent,
        _credentials: &Credentials,
    ) -> Result<PublishReceipt, PublishFailure> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match &self.failure {
            Some(failure) => Err(failure.clone()),
            None => Ok(PublishReceipt {
                id: content.content_id.clone(),
                url: format!("https://example.test/{}", content.content_id),
            }),
        }
    }
}

struct StaticCredentials;

#[async_trait]
impl CredentialStore for StaticCredentials {
    async fn credentials(&self, principal_id: &str) -> Result<Credentials, PublishFailure> {
        Ok(Credentials::new(principal_id, "token"))
    }

    async fn refresh(&self, principal_id: &str) -> Result<Credentials, PublishFailure> {
        Ok(Credentials::new(principal_id, "refreshed"))
    }
}

struct Noop;

#[async_trait]
impl WorkPauser for Noop {
    async fn pause_scheduled_work(&self, _principal_id: &str, _reason: &str) -> DomainResult<usize> {
        Ok(0)
    }
}

#[async_trait]
impl CredentialNotifier for Noop {
    async fn notify_credentials_expired(
        &self,
        _principal_id: &str,
        _notice: &RevocationNotice,
    ) -> DomainResult<()> {
        Ok(())
    }
}

#[async_trait]
impl PublishRecords for Noop {
    async fn mark_published(&self, _job: &PublishJob, _receipt: &PublishReceipt) -> DomainResult<()> {
        Ok(())
    }

    async fn mark_failed(&self, _job: &PublishJob, _reason: &str) -> DomainResult<()> {
        Ok(())
    }
}

/// Orchestrator over the system clock and an in-memory store
pub fn orchestrator(publisher: Arc<dyn Publisher>) -> Arc<PublishOrchestrator> {
    let store: Arc<dyn SharedStore> = Arc::new(InMemoryStore::new());
    let limiter_config = RateLimiterConfig::builder().jitter_percent(0.0).build().unwrap();
    let limiter = Arc::new(AdaptiveRateLimiter::new(limiter_config, Arc::clone(&store)).unwrap());
    let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default(), store).unwrap());
    let metrics = Arc::new(MetricsCollector::new(MetricsConfig::default()).unwrap());

    let noop = Arc::new(Noop);
    let ports = PublishPorts {
        publisher,
        credentials: Arc::new(StaticCredentials),
        pauser: noop.clone(),
        notifier: noop.clone(),
        records: noop,
    };
    let config = OrchestratorConfig { retry_jitter_percent: 0.0, ..OrchestratorConfig::default() };
    Arc::new(PublishOrchestrator::new(config, ports, limiter, breaker, metrics).unwrap())
}
