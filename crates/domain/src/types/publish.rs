//! Publish job types

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::DEFAULT_QUEUE_ATTEMPTS;
use crate::impl_domain_status_conversions;

/// Content handed to the third-party platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishContent {
    /// Identifier of the business record this content belongs to
    pub content_id: String,
    pub body: String,
    #[serde(default)]
    pub media_urls: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl PublishContent {
    pub fn new(content_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            content_id: content_id.into(),
            body: body.into(),
            media_urls: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_media(mut self, url: impl Into<String>) -> Self {
        self.media_urls.push(url.into());
        self
    }
}

/// One unit of work pulled from the job queue.
///
/// `attempt` is 1-based: the first execution of a job is attempt 1.
/// `max_queue_attempts` is the queue's own attempt budget, enforced
/// alongside the per-category retry cap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishJob {
    pub id: String,
    /// Account on whose behalf requests are rate limited
    pub principal_id: String,
    /// Circuit breaker partition (e.g. `"linkedin:ugc_posts"`)
    pub endpoint_key: String,
    pub content: PublishContent,
    pub attempt: u32,
    pub max_queue_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl PublishJob {
    pub fn new(
        principal_id: impl Into<String>,
        endpoint_key: impl Into<String>,
        content: PublishContent,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            principal_id: principal_id.into(),
            endpoint_key: endpoint_key.into(),
            content,
            attempt: 1,
            max_queue_attempts: DEFAULT_QUEUE_ATTEMPTS,
            enqueued_at: Utc::now(),
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt.max(1);
        self
    }

    pub fn with_queue_budget(mut self, max_queue_attempts: u32) -> Self {
        self.max_queue_attempts = max_queue_attempts;
        self
    }

    /// True when the queue will not hand this job out again after the
    /// current attempt.
    pub fn queue_budget_exhausted(&self) -> bool {
        self.attempt >= self.max_queue_attempts
    }

    /// The same job, advanced to its next attempt.
    pub fn next_attempt(&self) -> Self {
        let mut next = self.clone();
        next.attempt = self.attempt.saturating_add(1);
        next
    }
}

/// Receipt returned by the platform for a published item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub id: String,
    pub url: String,
}

/// Lifecycle of a content item from the publisher's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStatus {
    Scheduled,
    Publishing,
    Published,
    Failed,
    Paused,
}

impl_domain_status_conversions!(PublishStatus {
    Scheduled => "scheduled",
    Publishing => "publishing",
    Published => "published",
    Failed => "failed",
    Paused => "paused",
});
