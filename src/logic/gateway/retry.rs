//! Bounded retry for transient external failures

use std::fmt::Display;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    /// 3 attempts, sleeping 1s then 2s between them
    pub fn standard() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
        }
    }

    /// No sleeping between attempts (tests, interactive paths)
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

/// Run `op` until it succeeds or attempts run out. Exhaustion yields `None`.
pub fn with_retry<T, E, F>(policy: RetryPolicy, label: &str, mut op: F) -> Option<T>
where
    E: Display,
    F: FnMut() -> Result<T, E>,
{
    let mut backoff = policy.initial_backoff;

    for attempt in 1..=policy.max_attempts.max(1) {
        match op() {
            Ok(value) => return Some(value),
            Err(e) if attempt >= policy.max_attempts => {
                log::error!("{}: giving up after {} attempts: {}", label, attempt, e);
            }
            Err(e) => {
                log::warn!("{}: attempt {} failed: {} (retry in {:?})", label, attempt, e, backoff);
                if !backoff.is_zero() {
                    std::thread::sleep(backoff);
                }
                backoff *= 2;
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_succeeds_after_failures() {
        let mut calls = 0;
        let result = with_retry(RetryPolicy::immediate(3), "test", || {
            calls += 1;
            if calls < 3 { Err("boom") } else { Ok(calls) }
        });
        assert_eq!(result, Some(3));
    }

    #[test]
    fn test_exhaustion_is_none() {
        let mut calls = 0;
        let result: Option<()> = with_retry(RetryPolicy::immediate(3), "test", || {
            calls += 1;
            Err("down")
        });
        assert_eq!(result, None);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_first_success_makes_one_call() {
        let mut calls = 0;
        let result = with_retry(RetryPolicy::standard(), "test", || {
            calls += 1;
            Ok::<_, String>("ok")
        });
        assert_eq!(result, Some("ok"));
        assert_eq!(calls, 1);
    }
}
