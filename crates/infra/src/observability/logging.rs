//! Tracing subscriber setup
//!
//! `RUST_LOG` takes precedence over the configured level so operators can
//! raise verbosity for one module without editing config files.

use postgate_domain::{PostgateError, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset (e.g. `info`,
    /// `postgate_core=debug,info`)
    pub level: String,
    /// Emit one JSON object per line instead of human-readable text
    pub json: bool,
    /// Include the event target (module path) in each line
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false, with_target: false }
    }
}

impl LoggingConfig {
    /// Check that `level` is a valid filter directive.
    ///
    /// # Errors
    /// Returns `PostgateError::Config` if the directive does not parse.
    pub fn validate(&self) -> Result<()> {
        EnvFilter::try_new(&self.level)
            .map(|_| ())
            .map_err(|e| PostgateError::Config(format!("Invalid log level '{}': {e}", self.level)))
    }
}

/// Install the global tracing subscriber.
///
/// # Errors
/// Returns `PostgateError::Config` for an invalid level and
/// `PostgateError::Internal` if a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            PostgateError::Config(format!("Invalid log level '{}': {e}", config.level))
        })?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(config.with_target);
    let installed = if config.json {
        builder.json().with_current_span(true).try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| PostgateError::Internal(format!("Failed to install logger: {e}")))
}
