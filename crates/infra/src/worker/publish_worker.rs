//! Queue-driven publish loop with explicit lifecycle management.
//!
//! The loop holds a semaphore permit for every job in flight, so at most
//! `concurrency` orchestrator calls run at once. Join handles are tracked,
//! cancellation is explicit, and `stop` waits for in-flight jobs under
//! `shutdown_timeout`.

use std::sync::Arc;

use postgate_common::{Clock, SystemClock};
use postgate_core::{JobQueue, PublishOrchestrator, PublishOutcome};
use postgate_domain::constants::PAUSE_REASON_CREDENTIALS_REVOKED;
use postgate_domain::{PostgateError, PublishJob};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::{WorkerConfig, WorkerError, WorkerResult};

/// Pulls jobs from a queue and runs them through a [`PublishOrchestrator`]
pub struct PublishWorker<C: Clock = SystemClock> {
    config: WorkerConfig,
    orchestrator: Arc<PublishOrchestrator<C>>,
    queue: Arc<dyn JobQueue>,
    cancellation: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl<C: Clock> PublishWorker<C> {
    /// # Errors
    /// Returns `PostgateError::Config` if `config` is invalid.
    pub fn new(
        config: WorkerConfig,
        orchestrator: Arc<PublishOrchestrator<C>>,
        queue: Arc<dyn JobQueue>,
    ) -> Result<Self, PostgateError> {
        config.validate()?;
        Ok(Self {
            config,
            orchestrator,
            queue,
            cancellation: CancellationToken::new(),
            handle: None,
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Spawn the poll loop.
    #[instrument(skip(self))]
    pub fn start(&mut self) -> WorkerResult<()> {
        if self.is_running() {
            return Err(WorkerError::AlreadyRunning);
        }

        self.cancellation = CancellationToken::new();
        let cancel = self.cancellation.clone();
        let config = self.config.clone();
        let orchestrator = Arc::clone(&self.orchestrator);
        let queue = Arc::clone(&self.queue);

        self.handle = Some(tokio::spawn(async move {
            Self::run_loop(config, orchestrator, queue, cancel).await;
        }));

        info!(concurrency = self.config.concurrency, "Publish worker started");
        Ok(())
    }

    /// Stop polling and wait for in-flight jobs to finish.
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> WorkerResult<()> {
        let Some(handle) = self.handle.take() else {
            return Err(WorkerError::NotRunning);
        };

        self.cancellation.cancel();

        let shutdown_timeout = self.config.shutdown_timeout;
        tokio::time::timeout(shutdown_timeout, handle)
            .await
            .map_err(|_| WorkerError::Timeout { duration: shutdown_timeout })?
            .map_err(|err| WorkerError::TaskJoinFailed(err.to_string()))?;

        info!("Publish worker stopped");
        Ok(())
    }

    /// Returns true when the poll loop is active.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    async fn run_loop(
        config: WorkerConfig,
        orchestrator: Arc<PublishOrchestrator<C>>,
        queue: Arc<dyn JobQueue>,
        cancel: CancellationToken,
    ) {
        let semaphore = Arc::new(Semaphore::new(config.concurrency));

        loop {
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            // Not raced against cancellation: a job handed out by the queue
            // must be processed.
            match queue.next_job().await {
                Ok(Some(job)) => {
                    let orchestrator = Arc::clone(&orchestrator);
                    let queue = Arc::clone(&queue);
                    tokio::spawn(async move {
                        process_job(&orchestrator, queue.as_ref(), job).await;
                        drop(permit);
                    });
                    continue;
                }
                Ok(None) => drop(permit),
                Err(err) => {
                    drop(permit);
                    warn!(error = %err, "Failed to fetch next job");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(config.poll_interval) => {}
            }
        }

        debug!("Publish worker draining in-flight jobs");
        let all = u32::try_from(config.concurrency).unwrap_or(u32::MAX);
        if semaphore.acquire_many(all).await.is_err() {
            warn!("Semaphore closed while draining");
        }
    }
}

impl<C: Clock> Drop for PublishWorker<C> {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("PublishWorker dropped while running; cancelling loop");
            self.cancellation.cancel();
        }
    }
}

/// Run one attempt and report its outcome to the queue.
#[instrument(skip_all, fields(job_id = %job.id, attempt = job.attempt))]
async fn process_job<C: Clock>(
    orchestrator: &PublishOrchestrator<C>,
    queue: &dyn JobQueue,
    job: PublishJob,
) {
    let outcome = orchestrator.execute(&job).await;
    debug!(outcome = outcome.label(), "Job processed");

    let reported = match outcome {
        PublishOutcome::Published { receipt } => queue.complete(&job, &receipt).await,
        PublishOutcome::Deferred { delay, .. } => queue.reschedule(job, delay).await,
        PublishOutcome::RetryScheduled { delay, .. } => {
            queue.reschedule(job.next_attempt(), delay).await
        }
        PublishOutcome::Failed { reason, .. } => queue.fail(&job, &reason).await,
        PublishOutcome::CredentialsRevoked { .. } => {
            queue.fail(&job, PAUSE_REASON_CREDENTIALS_REVOKED).await
        }
    };

    if let Err(err) = reported {
        error!(error = %err, "Failed to report job outcome to queue");
    }
}
