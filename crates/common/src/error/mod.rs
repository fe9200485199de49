//! Error classification shared by the resilience layer
//!
//! Module-specific errors (`StoreError`, `MetricsError`, the limiter and
//! breaker configuration errors) stay local to their modules. Errors that can
//! fail for transient reasons implement [`ErrorClassification`] so callers can
//! decide whether to retry without matching on concrete variants.
//!
//! # Example
//!
//! ```rust
//! use postgate_common::{ErrorClassification, ErrorSeverity, StoreError};
//!
//! let err = StoreError::Unavailable("connection refused".to_string());
//! assert!(err.is_retryable());
//! assert_eq!(err.severity(), ErrorSeverity::Warning);
//! assert_eq!(err.retry_after(), None);
//! ```

use std::fmt;
use std::time::Duration;

/// Standard interface for classifying errors by their characteristics
pub trait ErrorClassification {
    /// Transient failures that may succeed if attempted again
    fn is_retryable(&self) -> bool;

    /// Used for monitoring and logging decisions
    fn severity(&self) -> ErrorSeverity;

    fn is_critical(&self) -> bool;

    /// Suggested delay before retrying, when the failure carried one
    fn retry_after(&self) -> Option<Duration>;
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(ErrorSeverity::Info < ErrorSeverity::Warning);
        assert!(ErrorSeverity::Warning < ErrorSeverity::Error);
        assert!(ErrorSeverity::Error < ErrorSeverity::Critical);
    }

    #[test]
    fn test_severity_display() {
        assert_eq!(ErrorSeverity::Warning.to_string(), "WARN");
        assert_eq!(ErrorSeverity::Critical.to_string(), "CRITICAL");
    }
}
