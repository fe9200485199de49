//! Delay helpers: jitter and `Retry-After` parsing

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

/// Minimum delay any jittered value is clamped to
pub const MIN_JITTERED_DELAY: Duration = Duration::from_millis(1_000);

/// Perturb `delay` uniformly within ±`jitter_percent` of its value, then clamp
/// to [`MIN_JITTERED_DELAY`].
///
/// `jitter_percent` is a fraction (`0.2` = ±20%). Non-positive values disable
/// the perturbation but keep the floor.
pub fn apply_jitter(delay: Duration, jitter_percent: f64) -> Duration {
    apply_jitter_with(&mut rand::thread_rng(), delay, jitter_percent)
}

/// [`apply_jitter`] with a caller-supplied random source.
pub fn apply_jitter_with<R: Rng + ?Sized>(
    rng: &mut R,
    delay: Duration,
    jitter_percent: f64,
) -> Duration {
    if jitter_percent.is_nan() || jitter_percent <= 0.0 {
        return delay.max(MIN_JITTERED_DELAY);
    }

    let delay_millis = delay.as_millis() as f64;
    let jitter_range = delay_millis * jitter_percent;
    let jitter = if jitter_range > 0.0 { rng.gen_range(-jitter_range..=jitter_range) } else { 0.0 };
    let final_millis = (delay_millis + jitter).max(0.0).round() as u64;

    Duration::from_millis(final_millis).max(MIN_JITTERED_DELAY)
}

/// Parse a `Retry-After` header into whole seconds from now.
///
/// Accepts either an integer number of seconds or an HTTP date. Dates in the
/// past and unparseable values yield 0.
pub fn parse_retry_after(value: &str) -> u64 {
    parse_retry_after_at(value, Utc::now())
}

/// [`parse_retry_after`] evaluated against an explicit `now`.
pub fn parse_retry_after_at(value: &str, now: DateTime<Utc>) -> u64 {
    let value = value.trim();
    if value.is_empty() {
        return 0;
    }

    if let Ok(seconds) = value.parse::<u64>() {
        return seconds;
    }
    if value.parse::<i64>().is_ok() {
        return 0;
    }

    match DateTime::parse_from_rfc2822(value) {
        Ok(date) => {
            let millis = date.with_timezone(&Utc).signed_duration_since(now).num_milliseconds();
            // Round up so a date 59.5s ahead is not reported as 59s.
            u64::try_from(millis).map_or(0, |ms| ms.div_ceil(1_000))
        }
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let base = Duration::from_secs(10);
        for _ in 0..500 {
            let jittered = apply_jitter(base, 0.2);
            assert!(jittered >= Duration::from_secs(8), "{jittered:?} below range");
            assert!(jittered <= Duration::from_secs(12), "{jittered:?} above range");
        }
    }

    #[test]
    fn test_jitter_varies_across_calls() {
        let mut rng = StdRng::seed_from_u64(7);
        let samples: Vec<_> = (0..20)
            .map(|_| apply_jitter_with(&mut rng, Duration::from_secs(30), 0.2))
            .collect();
        assert!(samples.iter().any(|s| *s != samples[0]));
    }

    #[test]
    fn test_jitter_floor() {
        assert_eq!(apply_jitter(Duration::from_millis(100), 0.2), MIN_JITTERED_DELAY);
        assert_eq!(apply_jitter(Duration::ZERO, 0.5), MIN_JITTERED_DELAY);
    }

    #[test]
    fn test_non_positive_jitter_returns_base() {
        assert_eq!(apply_jitter(Duration::from_secs(5), 0.0), Duration::from_secs(5));
        assert_eq!(apply_jitter(Duration::from_secs(5), -1.0), Duration::from_secs(5));
        assert_eq!(apply_jitter(Duration::from_millis(10), 0.0), MIN_JITTERED_DELAY);
        assert_eq!(apply_jitter(Duration::from_secs(5), f64::NAN), Duration::from_secs(5));
    }

    #[test]
    fn test_retry_after_seconds() {
        assert_eq!(parse_retry_after_at("120", fixed_now()), 120);
        assert_eq!(parse_retry_after_at(" 0 ", fixed_now()), 0);
        assert_eq!(parse_retry_after_at("-5", fixed_now()), 0);
    }

    #[test]
    fn test_retry_after_http_date() {
        let ahead = "Tue, 10 Mar 2026 12:01:00 GMT";
        assert_eq!(parse_retry_after_at(ahead, fixed_now()), 60);

        let past = "Tue, 10 Mar 2026 11:00:00 GMT";
        assert_eq!(parse_retry_after_at(past, fixed_now()), 0);
    }

    #[test]
    fn test_retry_after_invalid() {
        assert_eq!(parse_retry_after_at("invalid", fixed_now()), 0);
        assert_eq!(parse_retry_after_at("", fixed_now()), 0);
        assert_eq!(parse_retry_after("soon"), 0);
    }
}
