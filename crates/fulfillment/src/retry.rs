//! Retry engine with exponential backoff and jitter
//!
//! Wraps each attempt of an async operation in a per-attempt timeout and
//! retries transient failures with capped exponential backoff plus uniform
//! jitter, so concurrent callers never synchronize into a retry storm.
//! Retry policy is a tagged classification (`classify`), not an arbitrary
//! predicate, which keeps it testable.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;

use crate::notify::{classify, ErrorClass, NotifyError};

/// Numeric retry parameters. Profiles differ only in these values.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub jitter_max: Duration,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    /// Quick local operations (database writes)
    pub fn fast() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            jitter_max: Duration::from_millis(100),
            attempt_timeout: Duration::from_secs(5),
        }
    }

    /// Default profile for external HTTP collaborators
    pub fn standard() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter_max: Duration::from_millis(500),
            attempt_timeout: Duration::from_secs(10),
        }
    }

    /// Slow downstreams that are worth waiting for
    pub fn patient() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(120),
            backoff_factor: 2.0,
            jitter_max: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(30),
        }
    }

    /// More attempts, tighter pacing
    pub fn aggressive() -> Self {
        Self {
            max_retries: 4,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            backoff_factor: 1.5,
            jitter_max: Duration::from_millis(250),
            attempt_timeout: Duration::from_secs(8),
        }
    }

    /// Backoff before the retry following `attempt` (zero-based), without
    /// jitter: `min(initial * factor^attempt, max_delay)`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let scaled = self.initial_delay.as_millis() as f64 * self.backoff_factor.powi(attempt as i32);
        let capped = scaled.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Base delay plus uniform random jitter in `[0, jitter_max]`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter_max.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
        };
        self.base_delay(attempt) + jitter
    }
}

/// Exhaustion (or terminal) error carrying the last underlying failure,
/// the attempts made, and the caller's correlation context.
#[derive(Debug, Error)]
#[error("{context}: giving up after {attempts} attempt(s): {source}")]
pub struct RetryError {
    pub context: String,
    pub attempts: u32,
    #[source]
    pub source: NotifyError,
}

/// Run `op` under `policy` until it succeeds, exhausts its budget, or hits
/// a terminal error.
///
/// Each attempt is raced against `attempt_timeout`; a timed-out attempt is
/// classified like any other failure. Terminal errors propagate without
/// consuming the remaining budget. Failures are never swallowed: the caller
/// always receives either the result or a `RetryError`.
pub async fn execute<F, Fut, T>(
    policy: &RetryPolicy,
    context: &str,
    mut op: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, NotifyError>>,
{
    let mut attempt: u32 = 0;

    loop {
        let outcome = match tokio::time::timeout(policy.attempt_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(NotifyError::Timeout(
                policy.attempt_timeout.as_millis() as u64
            )),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(error) => {
                let attempts_made = attempt + 1;

                if classify(&error) == ErrorClass::Terminal {
                    tracing::warn!(
                        context = context,
                        attempts = attempts_made,
                        error = %error,
                        "Terminal error, not retrying"
                    );
                    return Err(RetryError {
                        context: context.to_string(),
                        attempts: attempts_made,
                        source: error,
                    });
                }

                if attempt >= policy.max_retries {
                    return Err(RetryError {
                        context: context.to_string(),
                        attempts: attempts_made,
                        source: error,
                    });
                }

                let delay = policy.backoff_delay(attempt);
                tracing::warn!(
                    context = context,
                    attempt = attempts_made,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    fn no_jitter_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(16),
            backoff_factor: 2.0,
            jitter_max: Duration::ZERO,
            attempt_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn backoff_is_monotone_until_cap() {
        let policy = no_jitter_policy(10);
        for attempt in 0..9 {
            assert!(
                policy.base_delay(attempt + 1) >= policy.base_delay(attempt),
                "delay decreased at attempt {}",
                attempt
            );
        }
    }

    #[test]
    fn backoff_never_exceeds_cap_plus_jitter() {
        let policy = RetryPolicy {
            jitter_max: Duration::from_millis(50),
            ..no_jitter_policy(10)
        };
        for attempt in 0..32 {
            let delay = policy.backoff_delay(attempt);
            assert!(delay <= policy.max_delay + policy.jitter_max);
        }
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let policy = no_jitter_policy(10);
        assert_eq!(policy.base_delay(0), Duration::from_millis(1));
        assert_eq!(policy.base_delay(1), Duration::from_millis(2));
        assert_eq!(policy.base_delay(2), Duration::from_millis(4));
        assert_eq!(policy.base_delay(3), Duration::from_millis(8));
        assert_eq!(policy.base_delay(4), Duration::from_millis(16));
        assert_eq!(policy.base_delay(5), Duration::from_millis(16));
    }

    #[tokio::test]
    async fn success_returns_without_retrying() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_op = calls.clone();

        let result = execute(&no_jitter_policy(3), "test", || {
            let calls = calls_in_op.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, NotifyError>(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn always_failing_op_exhausts_budget_exactly() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_op = calls.clone();
        let max_retries = 3;

        let result: Result<(), RetryError> =
            execute(&no_jitter_policy(max_retries), "zapier", || {
                let calls = calls_in_op.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(NotifyError::Status {
                        status: 503,
                        body: "unavailable".into(),
                    })
                }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, max_retries + 1);
        assert_eq!(calls.load(Ordering::SeqCst), max_retries + 1);
        assert_eq!(err.context, "zapier");
        assert!(matches!(err.source, NotifyError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn terminal_error_does_not_consume_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_op = calls.clone();

        let result: Result<(), RetryError> = execute(&no_jitter_policy(5), "meta_capi", || {
            let calls = calls_in_op.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(NotifyError::Status {
                    status: 400,
                    body: "invalid pixel id".into(),
                })
            }
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn eventually_succeeding_op_recovers() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_op = calls.clone();

        let result = execute(&no_jitter_policy(5), "test", || {
            let calls = calls_in_op.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(NotifyError::Transport("connection reset".into()))
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn hung_attempt_times_out_and_is_retried() {
        let policy = RetryPolicy {
            attempt_timeout: Duration::from_millis(20),
            ..no_jitter_policy(1)
        };
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_op = calls.clone();

        let result: Result<(), RetryError> = execute(&policy, "slow", || {
            let calls = calls_in_op.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 2);
        assert!(matches!(err.source, NotifyError::Timeout(20)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn profiles_differ_only_in_numbers() {
        for policy in [
            RetryPolicy::fast(),
            RetryPolicy::standard(),
            RetryPolicy::patient(),
            RetryPolicy::aggressive(),
        ] {
            assert!(policy.max_retries >= 2);
            assert!(policy.initial_delay <= policy.max_delay);
            assert!(policy.attempt_timeout > Duration::ZERO);
        }
    }
}
