//! Structured failure returned by the external publish call

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Explicit machine-readable signal attached to a failure by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum FailureCode {
    /// The platform permanently revoked the principal's credentials
    CredentialsRevoked,
    /// The call did not complete within the caller-supplied timeout
    Timeout,
    Other(String),
}

/// A failed call to the third-party platform (or one of its helpers).
///
/// Carries the HTTP-like signals the platform emits; everything else about
/// the wire format is opaque.
#[derive(Debug, Clone, PartialEq, Eq, Default, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct PublishFailure {
    pub message: String,
    pub http_status: Option<u16>,
    /// Raw `Retry-After` header value, if the platform sent one
    pub retry_after: Option<String>,
    pub code: Option<FailureCode>,
    pub stack: Option<String>,
}

impl PublishFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), ..Self::default() }
    }

    /// Failure with an HTTP status and message.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::new(message).with_status(status)
    }

    /// Failure signalling permanently revoked credentials.
    pub fn revoked(message: impl Into<String>) -> Self {
        Self::new(message).with_code(FailureCode::CredentialsRevoked)
    }

    /// Failure produced when the call exceeded its timeout.
    pub fn timeout(after: Duration) -> Self {
        Self::new(format!("Publish call timed out after {}ms", after.as_millis()))
            .with_code(FailureCode::Timeout)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_retry_after(mut self, value: impl Into<String>) -> Self {
        self.retry_after = Some(value.into());
        self
    }

    pub fn with_code(mut self, code: FailureCode) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn is_revoked(&self) -> bool {
        matches!(self.code, Some(FailureCode::CredentialsRevoked))
    }
}
