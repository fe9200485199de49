//! Publishing use case
//!
//! [`PublishOrchestrator`] runs a single [`PublishJob`](postgate_domain::PublishJob)
//! attempt and returns a [`PublishOutcome`] telling the worker what to do
//! with the job next. It never returns an error: collaborator failures are
//! logged and folded into the outcome.

pub mod ports;
pub mod service;

use std::fmt;
use std::time::Duration;

use postgate_common::resilience::{ConfigError, ConfigResult};
use postgate_common::{duration_millis, ErrorCategory};
use postgate_domain::PublishReceipt;
use serde::{Deserialize, Serialize};

pub use service::{PublishOrchestrator, PublishPorts};

/// Orchestrator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Upper bound on one external publish call
    #[serde(with = "duration_millis")]
    pub publish_timeout: Duration,
    /// ± fraction applied to retry backoff delays
    pub retry_jitter_percent: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { publish_timeout: Duration::from_secs(30), retry_jitter_percent: 0.2 }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.publish_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                message: "publish_timeout must be greater than zero".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.retry_jitter_percent) {
            return Err(ConfigError::Invalid {
                message: "retry_jitter_percent must be between 0 and 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Why a job was put back without being attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferReason {
    RateLimited,
    CircuitOpen,
}

impl fmt::Display for DeferReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited => f.write_str("rate_limited"),
            Self::CircuitOpen => f.write_str("circuit_open"),
        }
    }
}

/// Result of one orchestrated attempt
#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    Published { receipt: PublishReceipt },
    /// Not attempted; rerun the same attempt after `delay`.
    Deferred { delay: Duration, reason: DeferReason },
    /// Attempted and failed; run attempt `next_attempt` after `delay`.
    RetryScheduled { delay: Duration, category: ErrorCategory, next_attempt: u32 },
    /// Terminal failure; the business record is marked failed.
    Failed { category: ErrorCategory, reason: String },
    /// The principal's credentials are gone; their scheduled work is paused.
    CredentialsRevoked { paused_jobs: usize },
}

impl PublishOutcome {
    /// True when the job must not run again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Published { .. } | Self::Failed { .. } | Self::CredentialsRevoked { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Published { .. } => "published",
            Self::Deferred { .. } => "deferred",
            Self::RetryScheduled { .. } => "retry_scheduled",
            Self::Failed { .. } => "failed",
            Self::CredentialsRevoked { .. } => "credentials_revoked",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_outcomes() {
        let deferred =
            PublishOutcome::Deferred { delay: Duration::from_secs(1), reason: DeferReason::CircuitOpen };
        assert!(!deferred.is_terminal());
        assert!(PublishOutcome::CredentialsRevoked { paused_jobs: 0 }.is_terminal());
        assert_eq!(deferred.label(), "deferred");
    }

    #[test]
    fn test_config_validation() {
        assert!(OrchestratorConfig::default().validate().is_ok());
        let config = OrchestratorConfig { publish_timeout: Duration::ZERO, ..Default::default() };
        assert!(config.validate().is_err());
    }
}
