//! Worker lifecycle error types

use std::time::Duration;

use postgate_domain::PostgateError;
use thiserror::Error;

use crate::errors::InfraError;

/// Errors from starting or stopping background tasks
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Worker already running")]
    AlreadyRunning,

    #[error("Worker not running")]
    NotRunning,

    /// Operation timed out
    #[error("Operation timed out after {}ms", .duration.as_millis())]
    Timeout { duration: Duration },

    /// Task join failed
    #[error("Task join failed: {0}")]
    TaskJoinFailed(String),
}

impl From<WorkerError> for InfraError {
    fn from(err: WorkerError) -> Self {
        let postgate_err = match err {
            WorkerError::AlreadyRunning | WorkerError::NotRunning => {
                PostgateError::InvalidInput(err.to_string())
            }
            WorkerError::Timeout { .. } | WorkerError::TaskJoinFailed(_) => {
                PostgateError::Internal(err.to_string())
            }
        };
        InfraError(postgate_err)
    }
}

impl From<WorkerError> for PostgateError {
    fn from(err: WorkerError) -> Self {
        InfraError::from(err).into()
    }
}

/// Convenience type alias for worker lifecycle operations
pub type WorkerResult<T> = Result<T, WorkerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_misuse_is_invalid_input() {
        let mapped: PostgateError = WorkerError::NotRunning.into();
        assert_eq!(mapped, PostgateError::InvalidInput("Worker not running".into()));

        let mapped: PostgateError = WorkerError::Timeout { duration: Duration::from_secs(5) }.into();
        assert_eq!(mapped, PostgateError::Internal("Operation timed out after 5000ms".into()));
    }
}
