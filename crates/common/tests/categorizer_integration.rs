//! Integration tests for failure categorization and retry policies

#![cfg(feature = "foundation")]

use std::time::Duration;

use postgate_common::resilience::MIN_JITTERED_DELAY;
use postgate_common::{
    apply_jitter, categorize, ErrorCategory, ErrorClassification, ErrorSeverity,
};
use postgate_domain::{FailureCode, PublishFailure};

/// Validates that the HTTP status wins over a misleading message.
///
/// # Test Steps
/// 1. Build failures whose message points at one category and whose status
///    points at another
/// 2. Verify the status-derived category is chosen
#[test]
fn test_status_takes_precedence_over_message() {
    let cases = [
        (429, "validation failed", ErrorCategory::RateLimit),
        (400, "rate limit exceeded", ErrorCategory::ValidationError),
        (503, "invalid token", ErrorCategory::ServerError),
        (403, "network unreachable", ErrorCategory::AuthError),
    ];

    for (status, message, expected) in cases {
        let categorized = categorize(&PublishFailure::http(status, message));
        assert_eq!(categorized.category, expected, "status {status} / {message:?}");
    }
}

#[test]
fn test_unmapped_status_falls_back_to_message() {
    let categorized = categorize(&PublishFailure::http(418, "Daily quota exhausted"));
    assert_eq!(categorized.category, ErrorCategory::QuotaExceeded);

    let categorized = categorize(&PublishFailure::http(418, "teapot"));
    assert_eq!(categorized.category, ErrorCategory::Unknown);
}

#[test]
fn test_401_token_variants() {
    let refresh = categorize(&PublishFailure::http(401, "Refresh token expired"));
    assert_eq!(refresh.category, ErrorCategory::CredentialRevoked);
    assert!(!refresh.is_retryable());
    assert!(refresh.is_critical());

    let access = categorize(&PublishFailure::http(401, "Access token expired"));
    assert_eq!(access.category, ErrorCategory::TokenExpired);
    assert!(access.policy.requires_credential_refresh);

    let plain = categorize(&PublishFailure::http(401, "Unauthorized"));
    assert_eq!(plain.category, ErrorCategory::AuthError);
}

#[test]
fn test_failure_codes_short_circuit() {
    let revoked = categorize(&PublishFailure::http(500, "boom").with_code(FailureCode::CredentialsRevoked));
    assert_eq!(revoked.category, ErrorCategory::CredentialRevoked);

    let timeout = categorize(&PublishFailure::timeout(Duration::from_secs(30)));
    assert_eq!(timeout.category, ErrorCategory::NetworkError);
    assert_eq!(timeout.severity(), ErrorSeverity::Warning);
}

#[test]
fn test_message_matching_is_case_insensitive() {
    assert_eq!(categorize(&PublishFailure::new("ECONNRESET")).category, ErrorCategory::NetworkError);
    assert_eq!(
        categorize(&PublishFailure::new("Too Many Requests")).category,
        ErrorCategory::RateLimit
    );
}

#[test]
fn test_every_retryable_policy_has_a_ladder() {
    for category in ErrorCategory::ALL {
        let policy = category.policy();
        if policy.retryable {
            assert!(policy.max_attempts > 0, "{category}");
            assert!(!policy.backoff_schedule_ms.is_empty(), "{category}");
        } else {
            assert_eq!(policy.backoff_delay(0), Duration::ZERO, "{category}");
        }
    }
}

#[test]
fn test_rate_limit_ladder_and_retry_after() {
    let categorized = categorize(&PublishFailure::http(429, "slow down").with_retry_after("90"));
    let policy = categorized.policy;

    assert!(policy.use_circuit_breaker);
    assert_eq!(policy.max_attempts, 7);
    assert_eq!(policy.backoff_delay(0), Duration::from_secs(5));
    assert_eq!(policy.backoff_delay(6), Duration::from_secs(300));
    assert_eq!(policy.backoff_delay(50), Duration::from_secs(300));
    assert_eq!(categorized.retry_after(), Some(Duration::from_secs(90)));
}

#[test]
fn test_jittered_backoff_respects_floor() {
    let policy = ErrorCategory::TokenExpired.policy();
    for _ in 0..100 {
        let delay = apply_jitter(policy.backoff_delay(0), 0.2);
        assert!(delay >= MIN_JITTERED_DELAY);
        assert!(delay <= Duration::from_millis(1_200));
    }
}

#[test]
fn test_categorized_error_display() {
    let categorized = categorize(&PublishFailure::http(500, "Internal Server Error"));
    assert_eq!(categorized.to_string(), "SERVER_ERROR: Internal Server Error");
}
