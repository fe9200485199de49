//! Conversions from infrastructure errors into domain errors.

use postgate_common::resilience::ConfigError;
use postgate_common::{MetricsError, StoreError};
use postgate_domain::PostgateError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub PostgateError);

impl From<InfraError> for PostgateError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<PostgateError> for InfraError {
    fn from(value: PostgateError) -> Self {
        InfraError(value)
    }
}

impl std::fmt::Display for InfraError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for InfraError {}

/* -------------------------------------------------------------------------- */
/* Component errors → PostgateError */
/* -------------------------------------------------------------------------- */

impl From<ConfigError> for InfraError {
    fn from(value: ConfigError) -> Self {
        InfraError(PostgateError::Config(value.to_string()))
    }
}

impl From<StoreError> for InfraError {
    fn from(value: StoreError) -> Self {
        InfraError(PostgateError::Store(value.to_string()))
    }
}

impl From<MetricsError> for InfraError {
    fn from(value: MetricsError) -> Self {
        match value {
            MetricsError::Store(err) => err.into(),
            MetricsError::Serialization(err) => {
                InfraError(PostgateError::Internal(format!("metrics serialization failed: {err}")))
            }
            MetricsError::Export(err) => {
                InfraError(PostgateError::Internal(format!("metrics export failed: {err}")))
            }
        }
    }
}

/* -------------------------------------------------------------------------- */
/* Library errors → PostgateError */
/* -------------------------------------------------------------------------- */

impl From<std::io::Error> for InfraError {
    fn from(value: std::io::Error) -> Self {
        let message = match value.kind() {
            std::io::ErrorKind::NotFound => format!("file not found: {value}"),
            std::io::ErrorKind::PermissionDenied => format!("permission denied: {value}"),
            _ => format!("I/O failure: {value}"),
        };
        InfraError(PostgateError::Config(message))
    }
}

impl From<toml::de::Error> for InfraError {
    fn from(value: toml::de::Error) -> Self {
        InfraError(PostgateError::Config(format!("Invalid TOML format: {value}")))
    }
}

impl From<serde_json::Error> for InfraError {
    fn from(value: serde_json::Error) -> Self {
        InfraError(PostgateError::Config(format!("Invalid JSON format: {value}")))
    }
}

/* -------------------------------------------------------------------------- */
/* Tests */
/* -------------------------------------------------------------------------- */
