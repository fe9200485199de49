//! Application constants
//!
//! Domain-level constants shared by the orchestrator and the worker.

/// Longest failure reason persisted on a business record.
pub const MAX_FAILURE_REASON_LENGTH: usize = 256;
pub const REASON_TRUNCATE_SUFFIX: &str = "...";

/// Reason attached to scheduled work paused after a permanent credential
/// revocation.
pub const PAUSE_REASON_CREDENTIALS_REVOKED: &str =
    "Publishing paused: the connected account revoked access. Reconnect the account to resume.";

/// Default attempt budget for a job when the queue does not supply one.
pub const DEFAULT_QUEUE_ATTEMPTS: u32 = 7;

/// Truncate a failure reason to [`MAX_FAILURE_REASON_LENGTH`] characters.
pub fn truncate_reason(reason: &str) -> String {
    if reason.chars().count() <= MAX_FAILURE_REASON_LENGTH {
        return reason.to_string();
    }

    let keep = MAX_FAILURE_REASON_LENGTH.saturating_sub(REASON_TRUNCATE_SUFFIX.len());
    let mut truncated = reason.chars().take(keep).collect::<String>();
    truncated.push_str(REASON_TRUNCATE_SUFFIX);
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_reasons_are_untouched() {
        assert_eq!(truncate_reason("boom"), "boom");
    }

    #[test]
    fn long_reasons_are_truncated_with_suffix() {
        let reason = "x".repeat(1_000);
        let truncated = truncate_reason(&reason);
        assert_eq!(truncated.chars().count(), MAX_FAILURE_REASON_LENGTH);
        assert!(truncated.ends_with(REASON_TRUNCATE_SUFFIX));
    }
}
