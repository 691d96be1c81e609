//! Backoff math and the retry-policy decision applied after a handler failure.

use crate::config::RetrySettings;
use crate::notification::dispatcher::HandlerOutcome;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;

#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Schedule another attempt at the given time.
    Retry { next_retry_at: DateTime<Utc>, reason: String },
    /// No budget left, or the failure was permanent/declined: terminal.
    Fail { reason: String },
}

/// `base * multiplier^(retry_count - 1)`, jittered by `jitter_percent` in
/// either direction. `retry_count` is the count *after* incrementing for this
/// attempt (so the first retry uses exponent 0).
pub fn backoff_delay_secs(settings: &RetrySettings, retry_count: i32) -> f64 {
    let exponent = (retry_count - 1).max(0) as i32;
    let base = settings.base_delay_secs as f64 * settings.multiplier.powi(exponent);

    let jitter_fraction = settings.jitter_percent / 100.0;
    let jitter = rand::thread_rng().gen_range(-jitter_fraction..=jitter_fraction);
    (base * (1.0 + jitter)).max(0.0)
}

/// Apply the retry policy to a handler outcome. `current_retry_count` is the
/// notification's `retry_count` before this attempt.
pub fn apply(
    settings: &RetrySettings,
    outcome: &HandlerOutcome,
    current_retry_count: i32,
    max_retries: i32,
) -> RetryDecision {
    match outcome {
        HandlerOutcome::Success => unreachable!("apply() is only called on failure outcomes"),
        HandlerOutcome::PermanentFailure(reason) => RetryDecision::Fail {
            reason: reason.clone(),
        },
        HandlerOutcome::TransientFailure(reason) => {
            let next_count = current_retry_count + 1;
            if next_count >= max_retries {
                RetryDecision::Fail {
                    reason: format!("exhausted {} retries: {}", max_retries, reason),
                }
            } else {
                let delay = backoff_delay_secs(settings, next_count);
                let next_retry_at = Utc::now() + ChronoDuration::milliseconds((delay * 1000.0) as i64);
                RetryDecision::Retry {
                    next_retry_at,
                    reason: reason.clone(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> RetrySettings {
        RetrySettings {
            base_delay_secs: 60,
            multiplier: 5.0,
            max_attempts_default: 3,
            jitter_percent: 0.0,
        }
    }

    #[test]
    fn test_backoff_progression_without_jitter() {
        let s = settings();
        assert_eq!(backoff_delay_secs(&s, 1), 60.0);
        assert_eq!(backoff_delay_secs(&s, 2), 300.0);
        assert_eq!(backoff_delay_secs(&s, 3), 1500.0);
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let mut s = settings();
        s.jitter_percent = 10.0;
        for _ in 0..50 {
            let delay = backoff_delay_secs(&s, 1);
            assert!((54.0..=66.0).contains(&delay), "delay {} out of jitter bounds", delay);
        }
    }

    #[test]
    fn test_permanent_failure_is_terminal_regardless_of_budget() {
        let s = settings();
        let decision = apply(&s, &HandlerOutcome::PermanentFailure("bad token".to_string()), 0, 3);
        assert_eq!(
            decision,
            RetryDecision::Fail {
                reason: "bad token".to_string()
            }
        );
    }

    #[test]
    fn test_transient_failure_retries_under_budget() {
        let s = settings();
        let decision = apply(&s, &HandlerOutcome::TransientFailure("timeout".to_string()), 0, 3);
        match decision {
            RetryDecision::Retry { reason, .. } => assert_eq!(reason, "timeout"),
            RetryDecision::Fail { .. } => panic!("expected retry"),
        }
    }

    #[test]
    fn test_transient_failure_fails_at_budget() {
        let s = settings();
        let decision = apply(&s, &HandlerOutcome::TransientFailure("timeout".to_string()), 2, 3);
        match decision {
            RetryDecision::Fail { reason } => assert!(reason.contains("exhausted")),
            RetryDecision::Retry { .. } => panic!("expected terminal failure"),
        }
    }
}
