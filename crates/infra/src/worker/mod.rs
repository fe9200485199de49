//! Publish worker runtime
//!
//! [`PublishWorker`] pulls jobs from a [`JobQueue`](postgate_core::JobQueue),
//! runs each through the orchestrator with bounded concurrency, and hands the
//! outcome back to the queue.

pub mod error;
pub mod publish_worker;

use std::time::Duration;

use postgate_common::duration_millis;
use postgate_domain::{PostgateError, Result};
use serde::{Deserialize, Serialize};

pub use error::{WorkerError, WorkerResult};
pub use publish_worker::PublishWorker;

/// Largest accepted `concurrency`
pub const MAX_CONCURRENCY: usize = 1024;

/// Worker loop settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Jobs processed in parallel by one worker
    pub concurrency: usize,
    /// Wait before polling again after an empty queue or a queue error
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,
    /// How long `stop` waits for in-flight jobs
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            poll_interval: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    /// # Errors
    /// Returns `PostgateError::Config` for out-of-range settings.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 || self.concurrency > MAX_CONCURRENCY {
            return Err(PostgateError::Config(format!(
                "worker concurrency must be between 1 and {MAX_CONCURRENCY}"
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(PostgateError::Config(
                "worker poll_interval must be greater than zero".to_string(),
            ));
        }
        if self.shutdown_timeout.is_zero() {
            return Err(PostgateError::Config(
                "worker shutdown_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
