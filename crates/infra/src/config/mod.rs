//! Configuration loading and management
//!
//! [`PostgateConfig`] gathers the settings of every component a worker
//! process runs. Each section deserializes with defaults, so a file only
//! needs the keys it overrides.

pub mod loader;

use postgate_common::{CircuitBreakerConfig, MetricsConfig, RateLimiterConfig};
use postgate_core::OrchestratorConfig;
use postgate_domain::Result;
use serde::{Deserialize, Serialize};

use crate::errors::InfraError;
use crate::observability::LoggingConfig;
use crate::worker::WorkerConfig;

// Re-export commonly used items
pub use loader::{load, load_from_env, load_from_file, probe_config_paths};

/// Process-wide configuration for a publishing worker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgateConfig {
    pub rate_limiter: RateLimiterConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub metrics: MetricsConfig,
    pub orchestrator: OrchestratorConfig,
    pub worker: WorkerConfig,
    pub logging: LoggingConfig,
}

impl PostgateConfig {
    /// Validate every section.
    ///
    /// # Errors
    /// Returns `PostgateError::Config` naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        self.rate_limiter.validate().map_err(InfraError::from)?;
        self.circuit_breaker.validate().map_err(InfraError::from)?;
        self.metrics.validate().map_err(InfraError::from)?;
        self.orchestrator.validate().map_err(InfraError::from)?;
        self.worker.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}
