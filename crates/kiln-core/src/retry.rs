//! Bounded fixed-interval polling.
//!
//! Readiness checks share one loop: evaluate a predicate, sleep a fixed
//! interval, give up once the time budget is spent. There is no backoff.

use crate::error::Result;
use std::future::Future;
use std::time::Duration;

/// How often and how long to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Sleep between attempts.
    pub interval: Duration,
    /// Total budget; together with `interval` this fixes the attempt count.
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    /// 40 attempts at 0.5s intervals.
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            max_wait: Duration::from_secs(20),
        }
    }
}

impl RetryPolicy {
    /// Create a policy.
    pub const fn new(interval: Duration, max_wait: Duration) -> Self {
        Self { interval, max_wait }
    }

    /// Number of predicate evaluations, at least one.
    pub fn attempts(&self) -> u32 {
        let interval = self.interval.as_nanos().max(1);
        let attempts = self.max_wait.as_nanos() / interval;
        attempts.clamp(1, u32::MAX as u128) as u32
    }
}

/// Outcome of a bounded poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The predicate held on attempt `attempts`.
    Ready {
        /// Attempts used
        attempts: u32,
    },
    /// The predicate never held.
    TimedOut {
        /// Attempts used
        attempts: u32,
    },
}

impl Readiness {
    /// True if the predicate held.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

/// Evaluate `check` until it returns `true` or the policy is exhausted.
///
/// Errors from `check` abort the poll and propagate.
pub async fn wait_until<F, Fut>(policy: &RetryPolicy, mut check: F) -> Result<Readiness>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let attempts = policy.attempts();
    for attempt in 1..=attempts {
        if check().await? {
            tracing::trace!(attempt, "Poll succeeded");
            return Ok(Readiness::Ready { attempts: attempt });
        }
        if attempt < attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }
    Ok(Readiness::TimedOut { attempts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use std::cell::Cell;

    #[test]
    fn test_default_policy_is_forty_half_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts(), 40);
        assert_eq!(policy.interval, Duration::from_millis(500));
    }

    #[test]
    fn test_attempts_at_least_one() {
        let policy = RetryPolicy::new(Duration::from_secs(1), Duration::ZERO);
        assert_eq!(policy.attempts(), 1);
        let policy = RetryPolicy::new(Duration::ZERO, Duration::ZERO);
        assert_eq!(policy.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_on_third_attempt() {
        let calls = Cell::new(0);
        let start = tokio::time::Instant::now();
        let outcome = wait_until(&RetryPolicy::default(), || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move { Ok(n == 3) }
        })
        .await
        .unwrap();

        assert_eq!(outcome, Readiness::Ready { attempts: 3 });
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert!(start.elapsed() < Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_after_budget() {
        let calls = Cell::new(0u32);
        let start = tokio::time::Instant::now();
        let outcome = wait_until(&RetryPolicy::default(), || {
            calls.set(calls.get() + 1);
            async { Ok(false) }
        })
        .await
        .unwrap();

        assert_eq!(outcome, Readiness::TimedOut { attempts: 40 });
        assert!(!outcome.is_ready());
        assert_eq!(calls.get(), 40);
        // no sleep after the final attempt
        assert!(start.elapsed() >= Duration::from_millis(500 * 39));
        assert!(start.elapsed() < Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_predicate_error_propagates() {
        let result = wait_until(&RetryPolicy::default(), || async {
            Err(CoreError::Config("boom".into()))
        })
        .await;
        assert!(matches!(result, Err(CoreError::Config(_))));
    }
}
