//! Port interfaces for the publish flow
//!
//! These traits define the boundaries between the orchestrator and the
//! infrastructure that talks to the platform, the scheduler and the user.

use std::time::Duration;

use async_trait::async_trait;
use postgate_domain::{
    Credentials, PublishContent, PublishFailure, PublishJob, PublishReceipt, Result,
};
use serde::{Deserialize, Serialize};

/// The third-party publish call
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        content: &PublishContent,
        credentials: &Credentials,
    ) -> std::result::Result<PublishReceipt, PublishFailure>;
}

/// Access to a principal's stored credentials
///
/// Failures are reported as [`PublishFailure`] so they flow through the same
/// categorization as publish errors; a refresh rejected because the grant was
/// revoked must categorize as `CREDENTIAL_REVOKED`.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn credentials(&self, principal_id: &str)
        -> std::result::Result<Credentials, PublishFailure>;

    /// Exchange the refresh token for new credentials and persist them.
    async fn refresh(&self, principal_id: &str) -> std::result::Result<Credentials, PublishFailure>;
}

/// Pauses scheduled work that cannot succeed
#[async_trait]
pub trait WorkPauser: Send + Sync {
    /// Pause every scheduled item for `principal_id`. Returns how many were
    /// paused.
    async fn pause_scheduled_work(&self, principal_id: &str, reason: &str) -> Result<usize>;
}

/// What the user is told when their credentials stop working
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationNotice {
    pub job_id: String,
    pub endpoint_key: String,
    pub message: String,
    pub paused_jobs: usize,
}

/// Notifies a principal about credential problems
#[async_trait]
pub trait CredentialNotifier: Send + Sync {
    async fn notify_credentials_expired(
        &self,
        principal_id: &str,
        notice: &RevocationNotice,
    ) -> Result<()>;
}

/// Business records tracking each content item's publish status
#[async_trait]
pub trait PublishRecords: Send + Sync {
    async fn mark_published(&self, job: &PublishJob, receipt: &PublishReceipt) -> Result<()>;

    /// `reason` is already truncated for storage.
    async fn mark_failed(&self, job: &PublishJob, reason: &str) -> Result<()>;
}

/// Source of publish jobs for a worker
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Next job ready to run, if any.
    async fn next_job(&self) -> Result<Option<PublishJob>>;

    async fn complete(&self, job: &PublishJob, receipt: &PublishReceipt) -> Result<()>;

    /// Hand the job back to run again after `delay`, as the attempt number
    /// it carries.
    async fn reschedule(&self, job: PublishJob, delay: Duration) -> Result<()>;

    async fn fail(&self, job: &PublishJob, reason: &str) -> Result<()>;
}
