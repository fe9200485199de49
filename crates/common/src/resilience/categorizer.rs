//! Failure categorization and per-category retry policy
//!
//! [`categorize`] turns a raw [`PublishFailure`] into one of nine
//! [`ErrorCategory`] values. The decision looks at explicit failure codes
//! first, then the HTTP status, then falls back to case-insensitive message
//! matching. Every category maps to a fixed [`RetryPolicy`].

use std::fmt;
use std::time::Duration;

use postgate_domain::{FailureCode, PublishFailure};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::backoff::parse_retry_after;
use crate::error::{ErrorClassification, ErrorSeverity};

/// Closed set of failure categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    RateLimit,
    AuthError,
    TokenExpired,
    CredentialRevoked,
    NetworkError,
    ValidationError,
    ServerError,
    QuotaExceeded,
    Unknown,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 9] = [
        ErrorCategory::RateLimit,
        ErrorCategory::AuthError,
        ErrorCategory::TokenExpired,
        ErrorCategory::CredentialRevoked,
        ErrorCategory::NetworkError,
        ErrorCategory::ValidationError,
        ErrorCategory::ServerError,
        ErrorCategory::QuotaExceeded,
        ErrorCategory::Unknown,
    ];

    /// Upper-case label used in logs
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RateLimit => "RATE_LIMIT",
            Self::AuthError => "AUTH_ERROR",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::CredentialRevoked => "CREDENTIAL_REVOKED",
            Self::NetworkError => "NETWORK_ERROR",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::ServerError => "SERVER_ERROR",
            Self::QuotaExceeded => "QUOTA_EXCEEDED",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Snake-case label used as a metrics dimension
    pub const fn metric_label(self) -> &'static str {
        match self {
            Self::RateLimit => "rate_limit",
            Self::AuthError => "auth_error",
            Self::TokenExpired => "token_expired",
            Self::CredentialRevoked => "credential_revoked",
            Self::NetworkError => "network_error",
            Self::ValidationError => "validation_error",
            Self::ServerError => "server_error",
            Self::QuotaExceeded => "quota_exceeded",
            Self::Unknown => "unknown",
        }
    }

    /// The fixed retry policy for this category
    pub const fn policy(self) -> RetryPolicy {
        match self {
            Self::RateLimit => RetryPolicy::retry(
                7,
                &[5_000, 10_000, 20_000, 40_000, 80_000, 160_000, 300_000],
            )
            .with_circuit_breaker(),
            Self::AuthError => RetryPolicy::retry(3, &[2_000, 5_000, 10_000]),
            Self::TokenExpired => RetryPolicy::retry(2, &[1_000, 3_000]).with_credential_refresh(),
            Self::CredentialRevoked | Self::ValidationError => RetryPolicy::terminal(),
            Self::NetworkError => RetryPolicy::retry(5, &[2_000, 4_000, 8_000, 16_000, 32_000]),
            Self::ServerError => RetryPolicy::retry(5, &[3_000, 6_000, 12_000, 24_000, 48_000]),
            Self::QuotaExceeded => {
                RetryPolicy::retry(3, &[60_000, 120_000, 180_000]).with_circuit_breaker()
            }
            Self::Unknown => RetryPolicy::retry(3, &[5_000, 15_000, 30_000]),
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a category of failure is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryPolicy {
    pub retryable: bool,
    /// Highest attempt number that may still be retried
    pub max_attempts: u32,
    pub backoff_schedule_ms: &'static [u64],
    /// Whether failures of this kind count against the endpoint's breaker
    pub use_circuit_breaker: bool,
    pub requires_credential_refresh: bool,
}

impl RetryPolicy {
    const fn retry(max_attempts: u32, backoff_schedule_ms: &'static [u64]) -> Self {
        Self {
            retryable: true,
            max_attempts,
            backoff_schedule_ms,
            use_circuit_breaker: false,
            requires_credential_refresh: false,
        }
    }

    const fn terminal() -> Self {
        Self {
            retryable: false,
            max_attempts: 0,
            backoff_schedule_ms: &[],
            use_circuit_breaker: false,
            requires_credential_refresh: false,
        }
    }

    const fn with_circuit_breaker(mut self) -> Self {
        self.use_circuit_breaker = true;
        self
    }

    const fn with_credential_refresh(mut self) -> Self {
        self.requires_credential_refresh = true;
        self
    }

    /// Delay before the retry following attempt index `attempt_index`
    /// (0-based). Indices past the end of the ladder repeat its last entry;
    /// an empty ladder yields zero.
    pub fn backoff_delay(&self, attempt_index: usize) -> Duration {
        let ladder = self.backoff_schedule_ms;
        ladder
            .get(attempt_index)
            .or_else(|| ladder.last())
            .map_or(Duration::ZERO, |ms| Duration::from_millis(*ms))
    }
}

/// The raw signals a failure was categorized from
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RawErrorContext {
    pub message: String,
    pub http_status: Option<u16>,
    pub retry_after: Option<String>,
    pub stack: Option<String>,
}

impl From<&PublishFailure> for RawErrorContext {
    fn from(failure: &PublishFailure) -> Self {
        Self {
            message: failure.message.clone(),
            http_status: failure.http_status,
            retry_after: failure.retry_after.clone(),
            stack: failure.stack.clone(),
        }
    }
}

/// A failure together with its category and retry policy
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{}: {}", .category, .raw.message)]
pub struct CategorizedError {
    pub category: ErrorCategory,
    pub policy: RetryPolicy,
    pub raw: RawErrorContext,
}

impl CategorizedError {
    pub fn new(category: ErrorCategory, raw: RawErrorContext) -> Self {
        Self { category, policy: category.policy(), raw }
    }
}

impl ErrorClassification for CategorizedError {
    fn is_retryable(&self) -> bool {
        self.policy.retryable
    }

    fn severity(&self) -> ErrorSeverity {
        match self.category {
            ErrorCategory::CredentialRevoked => ErrorSeverity::Critical,
            ErrorCategory::AuthError | ErrorCategory::ValidationError | ErrorCategory::Unknown => {
                ErrorSeverity::Error
            }
            _ => ErrorSeverity::Warning,
        }
    }

    fn is_critical(&self) -> bool {
        self.category == ErrorCategory::CredentialRevoked
    }

    fn retry_after(&self) -> Option<Duration> {
        self.raw
            .retry_after
            .as_deref()
            .map(parse_retry_after)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

/// Classify a failure. Total and side-effect free.
pub fn categorize(failure: &PublishFailure) -> CategorizedError {
    let category = categorize_signals(failure.code.as_ref(), failure.http_status, &failure.message);
    CategorizedError::new(category, RawErrorContext::from(failure))
}

fn categorize_signals(code: Option<&FailureCode>, status: Option<u16>, message: &str) -> ErrorCategory {
    match code {
        Some(FailureCode::CredentialsRevoked) => return ErrorCategory::CredentialRevoked,
        Some(FailureCode::Timeout) => return ErrorCategory::NetworkError,
        Some(FailureCode::Other(_)) | None => {}
    }

    let message = message.to_lowercase();

    if let Some(category) = status.and_then(|status| categorize_status(status, &message)) {
        return category;
    }

    categorize_message(&message)
}

fn categorize_status(status: u16, message: &str) -> Option<ErrorCategory> {
    match status {
        429 => Some(ErrorCategory::RateLimit),
        401 if is_refresh_token_failure(message) => Some(ErrorCategory::CredentialRevoked),
        401 if is_token_failure(message) => Some(ErrorCategory::TokenExpired),
        401 | 403 => Some(ErrorCategory::AuthError),
        400 => Some(ErrorCategory::ValidationError),
        500..=504 => Some(ErrorCategory::ServerError),
        _ => None,
    }
}

/// Message-based classification; `message` must already be lower-cased.
fn categorize_message(message: &str) -> ErrorCategory {
    if is_rate_limit(message) {
        ErrorCategory::RateLimit
    } else if is_quota(message) {
        ErrorCategory::QuotaExceeded
    } else if message.contains("revoked") || is_refresh_token_failure(message) {
        ErrorCategory::CredentialRevoked
    } else if is_token_failure(message) {
        ErrorCategory::TokenExpired
    } else if is_network(message) {
        ErrorCategory::NetworkError
    } else if is_validation(message) {
        ErrorCategory::ValidationError
    } else if is_auth(message) {
        ErrorCategory::AuthError
    } else {
        ErrorCategory::Unknown
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

fn is_token_failure(message: &str) -> bool {
    message.contains("token") && contains_any(message, &["expired", "invalid"])
}

fn is_refresh_token_failure(message: &str) -> bool {
    message.contains("refresh") && is_token_failure(message)
}

fn is_rate_limit(message: &str) -> bool {
    contains_any(message, &["rate limit", "rate-limit", "ratelimit", "too many requests", "throttl"])
}

fn is_quota(message: &str) -> bool {
    contains_any(message, &["quota", "daily limit", "usage limit"])
}

fn is_network(message: &str) -> bool {
    contains_any(
        message,
        &[
            "timeout",
            "timed out",
            "etimedout",
            "econnreset",
            "connection reset",
            "econnrefused",
            "connection refused",
            "enotfound",
            "getaddrinfo",
            "dns",
            "unreachable",
            "socket hang up",
            "network",
        ],
    )
}

fn is_auth(message: &str) -> bool {
    contains_any(
        message,
        &[
            "unauthorized",
            "forbidden",
            "permission denied",
            "not authorized",
            "authentication",
            "access denied",
        ],
    )
}

fn is_validation(message: &str) -> bool {
    contains_any(
        message,
        &["validation", "invalid", "malformed", "bad request", "too long", "unsupported"],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category_of(failure: PublishFailure) -> ErrorCategory {
        categorize(&failure).category
    }

    #[test]
    fn test_status_429_wins_over_message() {
        let failure = PublishFailure::http(429, "validation failed: text too long");
        assert_eq!(category_of(failure), ErrorCategory::RateLimit);
    }

    #[test]
    fn test_status_400_is_terminal_validation() {
        let categorized = categorize(&PublishFailure::http(400, "whatever"));
        assert_eq!(categorized.category, ErrorCategory::ValidationError);
        assert!(!categorized.policy.retryable);
        assert_eq!(categorized.policy.max_attempts, 0);
    }

    #[test]
    fn test_401_variants() {
        assert_eq!(
            category_of(PublishFailure::http(401, "Refresh token expired")),
            ErrorCategory::CredentialRevoked
        );
        assert_eq!(
            category_of(PublishFailure::http(401, "The access token has expired")),
            ErrorCategory::TokenExpired
        );
        assert_eq!(
            category_of(PublishFailure::http(401, "Invalid token signature")),
            ErrorCategory::TokenExpired
        );
        assert_eq!(category_of(PublishFailure::http(401, "Nope")), ErrorCategory::AuthError);
        assert_eq!(category_of(PublishFailure::http(403, "token expired")), ErrorCategory::AuthError);
    }

    #[test]
    fn test_server_errors() {
        for status in 500..=504 {
            assert_eq!(category_of(PublishFailure::http(status, "")), ErrorCategory::ServerError);
        }
    }

    #[test]
    fn test_unmapped_status_falls_through_to_message() {
        assert_eq!(
            category_of(PublishFailure::http(404, "connection reset by peer")),
            ErrorCategory::NetworkError
        );
        assert_eq!(category_of(PublishFailure::http(418, "teapot")), ErrorCategory::Unknown);
    }

    #[test]
    fn test_explicit_codes_take_precedence() {
        let revoked = PublishFailure::http(500, "Internal").with_code(FailureCode::CredentialsRevoked);
        assert_eq!(category_of(revoked), ErrorCategory::CredentialRevoked);

        let timeout = PublishFailure::timeout(Duration::from_secs(30)).with_status(400);
        assert_eq!(category_of(timeout), ErrorCategory::NetworkError);

        let other = PublishFailure::http(429, "x").with_code(FailureCode::Other("E1".into()));
        assert_eq!(category_of(other), ErrorCategory::RateLimit);
    }

    #[test]
    fn test_message_order() {
        let cases = [
            ("Too Many Requests", ErrorCategory::RateLimit),
            ("Request was throttled", ErrorCategory::RateLimit),
            ("Daily quota exceeded", ErrorCategory::QuotaExceeded),
            ("Access has been revoked by the user", ErrorCategory::CredentialRevoked),
            ("refresh token is invalid", ErrorCategory::CredentialRevoked),
            ("token expired", ErrorCategory::TokenExpired),
            ("ETIMEDOUT", ErrorCategory::NetworkError),
            ("getaddrinfo ENOTFOUND api.example.com", ErrorCategory::NetworkError),
            ("socket hang up", ErrorCategory::NetworkError),
            ("Permission denied", ErrorCategory::AuthError),
            ("Request not authorized", ErrorCategory::AuthError),
            ("Malformed payload", ErrorCategory::ValidationError),
            // Validation phrases are checked before auth phrases.
            ("Invalid credentials supplied", ErrorCategory::ValidationError),
            ("authentication payload failed validation", ErrorCategory::ValidationError),
            ("media type unsupported", ErrorCategory::ValidationError),
            ("something odd happened", ErrorCategory::Unknown),
            ("", ErrorCategory::Unknown),
        ];
        for (message, expected) in cases {
            assert_eq!(category_of(PublishFailure::new(message)), expected, "message: {message}");
        }
    }

    #[test]
    fn test_backoff_repeats_last_entry() {
        let policy = ErrorCategory::TokenExpired.policy();
        assert_eq!(policy.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(3));
        assert_eq!(policy.backoff_delay(9), Duration::from_secs(3));
        assert_eq!(ErrorCategory::ValidationError.policy().backoff_delay(0), Duration::ZERO);
    }

    #[test]
    fn test_policy_table() {
        let rate = ErrorCategory::RateLimit.policy();
        assert!(rate.use_circuit_breaker);
        assert_eq!(rate.max_attempts, 7);
        assert_eq!(rate.backoff_schedule_ms.len(), 7);

        assert!(ErrorCategory::QuotaExceeded.policy().use_circuit_breaker);
        assert!(ErrorCategory::TokenExpired.policy().requires_credential_refresh);
        assert!(!ErrorCategory::CredentialRevoked.policy().retryable);

        for category in ErrorCategory::ALL {
            let policy = category.policy();
            if policy.retryable {
                assert_eq!(policy.backoff_schedule_ms.len(), policy.max_attempts as usize);
            }
        }
    }

    #[test]
    fn test_labels() {
        assert_eq!(ErrorCategory::QuotaExceeded.to_string(), "QUOTA_EXCEEDED");
        assert_eq!(ErrorCategory::QuotaExceeded.metric_label(), "quota_exceeded");
        let json = serde_json::to_string(&ErrorCategory::NetworkError).unwrap();
        assert_eq!(json, "\"NETWORK_ERROR\"");
    }

    #[test]
    fn test_classification_trait() {
        let categorized = categorize(&PublishFailure::http(429, "slow down").with_retry_after("120"));
        assert!(categorized.is_retryable());
        assert_eq!(categorized.severity(), ErrorSeverity::Warning);
        assert_eq!(categorized.retry_after(), Some(Duration::from_secs(120)));

        let revoked = categorize(&PublishFailure::revoked("gone"));
        assert!(revoked.is_critical());
        assert_eq!(revoked.retry_after(), None);
        assert_eq!(revoked.to_string(), "CREDENTIAL_REVOKED: gone");
    }
}
