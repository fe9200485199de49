//! Shared test helpers for `postgate-core` integration tests.
//!
//! Every port has an in-memory mock that records its calls so tests can
//! assert on side effects, plus a [`Harness`] that wires them into an
//! orchestrator driven by a [`MockClock`].

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use postgate_common::{
    AdaptiveRateLimiter, CircuitBreaker, CircuitBreakerConfig, InMemoryStore, MetricsCollector,
    MetricsConfig, MockClock, RateLimiterConfig, SharedStore,
};
use postgate_core::ports::{
    CredentialNotifier, CredentialStore, PublishRecords, Publisher, RevocationNotice, WorkPauser,
};
use postgate_core::{OrchestratorConfig, PublishOrchestrator, PublishPorts};
use postgate_domain::{
    Credentials, PostgateError, PublishContent, PublishFailure, PublishJob, PublishReceipt,
    Result as DomainResult,
};
use tokio::sync::Mutex;

pub type PublishResult = Result<PublishReceipt, PublishFailure>;

pub fn receipt(id: &str) -> PublishReceipt {
    PublishReceipt { id: id.to_string(), url: format!("https://example.test/posts/{id}") }
}

pub fn job(principal: &str, endpoint: &str) -> PublishJob {
    PublishJob::new(principal, endpoint, PublishContent::new("content-1", "Hello, world"))
}

/// Publisher that replays scripted results, then succeeds.
#[derive(Default)]
pub struct MockPublisher {
    script: Mutex<VecDeque<PublishResult>>,
    delay: Option<Duration>,
    pub calls: Mutex<Vec<String>>,
}

impl MockPublisher {
    pub fn scripted(results: Vec<PublishResult>) -> Self {
        Self { script: Mutex::new(results.into()), ..Self::default() }
    }

    /// Every call sleeps for `delay` before answering.
    pub fn slow(delay: Duration) -> Self {
        Self { delay: Some(delay), ..Self::default() }
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn publish(&self, content: &PublishContent, _credentials: &Credentials) -> PublishResult {
        self.calls.lock().await.push(content.content_id.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.script.lock().await.pop_front().unwrap_or_else(|| Ok(receipt("default")))
    }
}

#[derive(Default)]
pub struct MockCredentialStore {
    lookup_failures: Mutex<VecDeque<PublishFailure>>,
    refresh_failure: Option<PublishFailure>,
    pub lookups: Mutex<Vec<String>>,
    pub refreshes: Mutex<Vec<String>>,
}

impl MockCredentialStore {
    pub fn failing_refresh(failure: PublishFailure) -> Self {
        Self { refresh_failure: Some(failure), ..Self::default() }
    }

    /// The first lookups fail with `failures`, in order; later ones succeed.
    pub fn failing_lookups(failures: Vec<PublishFailure>) -> Self {
        Self { lookup_failures: Mutex::new(failures.into()), ..Self::default() }
    }
}

#[async_trait]
impl CredentialStore for MockCredentialStore {
    async fn credentials(&self, principal_id: &str) -> Result<Credentials, PublishFailure> {
        self.lookups.lock().await.push(principal_id.to_string());
        match self.lookup_failures.lock().await.pop_front() {
            Some(failure) => Err(failure),
            None => Ok(Credentials::new(principal_id, "access-token")),
        }
    }

    async fn refresh(&self, principal_id: &str) -> Result<Credentials, PublishFailure> {
        self.refreshes.lock().await.push(principal_id.to_string());
        match &self.refresh_failure {
            Some(failure) => Err(failure.clone()),
            None => Ok(Credentials::new(principal_id, "refreshed-token")),
        }
    }
}

#[derive(Default)]
pub struct MockPauser {
    paused: usize,
    fail: bool,
    pub calls: Mutex<Vec<(String, String)>>,
}

impl MockPauser {
    pub fn pausing(paused: usize) -> Self {
        Self { paused, ..Self::default() }
    }

    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }
}

#[async_trait]
impl WorkPauser for MockPauser {
    async fn pause_scheduled_work(&self, principal_id: &str, reason: &str) -> DomainResult<usize> {
        self.calls.lock().await.push((principal_id.to_string(), reason.to_string()));
        if self.fail {
            return Err(PostgateError::Collaborator("scheduler unavailable".to_string()));
        }
        Ok(self.paused)
    }
}

#[derive(Default)]
pub struct MockNotifier {
    pub calls: Mutex<Vec<(String, RevocationNotice)>>,
}

#[async_trait]
impl CredentialNotifier for MockNotifier {
    async fn notify_credentials_expired(
        &self,
        principal_id: &str,
        notice: &RevocationNotice,
    ) -> DomainResult<()> {
        self.calls.lock().await.push((principal_id.to_string(), notice.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct MockRecords {
    pub published: Mutex<Vec<(String, String)>>,
    pub failed: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl PublishRecords for MockRecords {
    async fn mark_published(&self, job: &PublishJob, receipt: &PublishReceipt) -> DomainResult<()> {
        self.published.lock().await.push((job.id.clone(), receipt.id.clone()));
        Ok(())
    }

    async fn mark_failed(&self, job: &PublishJob, reason: &str) -> DomainResult<()> {
        self.failed.lock().await.push((job.id.clone(), reason.to_string()));
        Ok(())
    }
}

/// An orchestrator over mocks, a shared in-memory store and a mock clock
pub struct Harness {
    pub clock: MockClock,
    pub store: Arc<dyn SharedStore>,
    pub publisher: Arc<MockPublisher>,
    pub credentials: Arc<MockCredentialStore>,
    pub pauser: Arc<MockPauser>,
    pub notifier: Arc<MockNotifier>,
    pub records: Arc<MockRecords>,
    pub orchestrator: PublishOrchestrator<MockClock>,
}

pub struct HarnessBuilder {
    publisher: MockPublisher,
    credentials: MockCredentialStore,
    pauser: MockPauser,
    config: OrchestratorConfig,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            publisher: MockPublisher::default(),
            credentials: MockCredentialStore::default(),
            pauser: MockPauser::default(),
            // Zero jitter keeps retry delays on the ladder.
            config: OrchestratorConfig { retry_jitter_percent: 0.0, ..OrchestratorConfig::default() },
        }
    }
}

impl HarnessBuilder {
    pub fn publisher(mut self, publisher: MockPublisher) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn credentials(mut self, credentials: MockCredentialStore) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn pauser(mut self, pauser: MockPauser) -> Self {
        self.pauser = pauser;
        self
    }

    pub fn publish_timeout(mut self, timeout: Duration) -> Self {
        self.config.publish_timeout = timeout;
        self
    }

    pub fn build(self) -> Harness {
        let clock = MockClock::new();
        let store: Arc<dyn SharedStore> = Arc::new(InMemoryStore::with_clock(clock.clone()));

        let limiter_config = RateLimiterConfig::builder().jitter_percent(0.0).build().unwrap();
        let limiter = Arc::new(
            AdaptiveRateLimiter::with_clock(limiter_config, Arc::clone(&store), clock.clone())
                .unwrap(),
        );
        let breaker = Arc::new(
            CircuitBreaker::with_clock(
                CircuitBreakerConfig::default(),
                Arc::clone(&store),
                clock.clone(),
            )
            .unwrap(),
        );
        let metrics =
            Arc::new(MetricsCollector::with_clock(MetricsConfig::default(), clock.clone()).unwrap());

        let publisher = Arc::new(self.publisher);
        let credentials = Arc::new(self.credentials);
        let pauser = Arc::new(self.pauser);
        let notifier = Arc::new(MockNotifier::default());
        let records = Arc::new(MockRecords::default());

        let ports = PublishPorts {
            publisher: publisher.clone(),
            credentials: credentials.clone(),
            pauser: pauser.clone(),
            notifier: notifier.clone(),
            records: records.clone(),
        };
        let orchestrator =
            PublishOrchestrator::new(self.config, ports, limiter, breaker, metrics).unwrap();

        Harness { clock, store, publisher, credentials, pauser, notifier, records, orchestrator }
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }
}
