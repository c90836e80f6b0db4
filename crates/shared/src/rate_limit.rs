//! Sliding-window rate limiter
//!
//! Gates public form-submission endpoints (lead capture, checkout) per
//! client IP. Exceeding the cap yields a "retry after N seconds" result
//! rather than an error, so handlers can answer 429 with a friendly body.
//!
//! The window state is per-process and advisory; it is never a correctness
//! boundary the way the durable webhook event store is.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::Mutex;

/// Default window for form endpoints (15 minutes)
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(15 * 60);

/// Outcome of a rate limit check
#[derive(Debug, Clone)]
pub struct RateLimitResult {
    pub allowed: bool,
    /// Requests remaining in the current window
    pub remaining: u32,
    /// Seconds until a request would be accepted again (set when rejected)
    pub retry_after_seconds: Option<u64>,
    /// When the oldest counted attempt falls out of the window
    pub reset_at: OffsetDateTime,
}

/// In-memory sliding-window rate limiter keyed by client identifier
#[derive(Clone)]
pub struct RateLimiter {
    windows: Arc<Mutex<HashMap<String, VecDeque<OffsetDateTime>>>>,
}

impl RateLimiter {
    pub fn new_in_memory() -> Self {
        Self {
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Check-and-count an attempt for `key` against `limit` per `window`.
    ///
    /// The check and the mark happen under one lock so concurrent callers
    /// can never push the window past the limit.
    pub async fn check(&self, key: &str, limit: u32, window: Duration) -> RateLimitResult {
        let now = OffsetDateTime::now_utc();
        let cutoff = now - window;

        let mut windows = self.windows.lock().await;
        let attempts = windows.entry(key.to_string()).or_default();

        // Drop attempts that have aged out of the window
        while attempts.front().is_some_and(|t| *t < cutoff) {
            attempts.pop_front();
        }

        if attempts.len() >= limit as usize {
            // Oldest attempt determines when capacity frees up
            let oldest = attempts.front().copied().unwrap_or(now);
            let reset_at = oldest + window;
            let retry_after = (reset_at - now).whole_seconds().max(1) as u64;

            return RateLimitResult {
                allowed: false,
                remaining: 0,
                retry_after_seconds: Some(retry_after),
                reset_at,
            };
        }

        attempts.push_back(now);
        let remaining = limit - attempts.len() as u32;
        let reset_at = attempts.front().copied().unwrap_or(now) + window;

        RateLimitResult {
            allowed: true,
            remaining,
            retry_after_seconds: None,
            reset_at,
        }
    }

    /// Evict keys whose every attempt is older than `window`.
    ///
    /// Runs on a periodic timer, independent of request handling.
    pub async fn cleanup(&self, window: Duration) {
        let cutoff = OffsetDateTime::now_utc() - window;
        let mut windows = self.windows.lock().await;

        windows.retain(|_, attempts| {
            while attempts.front().is_some_and(|t| *t < cutoff) {
                attempts.pop_front();
            }
            !attempts.is_empty()
        });
    }

    /// Number of tracked keys (for cleanup job logging)
    pub async fn tracked_keys(&self) -> usize {
        self.windows.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_request_allowed() {
        let limiter = RateLimiter::new_in_memory();
        let result = limiter.check("1.2.3.4", 5, DEFAULT_WINDOW).await;
        assert!(result.allowed);
        assert_eq!(result.remaining, 4);
    }

    #[tokio::test]
    async fn request_over_limit_rejected_with_retry_after() {
        let limiter = RateLimiter::new_in_memory();
        for i in 0..5 {
            let result = limiter.check("1.2.3.4", 5, DEFAULT_WINDOW).await;
            assert!(result.allowed, "request {} should be allowed", i);
        }

        let result = limiter.check("1.2.3.4", 5, DEFAULT_WINDOW).await;
        assert!(!result.allowed);
        assert!(result.retry_after_seconds.is_some());
        assert!(result.retry_after_seconds.unwrap() >= 1);
    }

    #[tokio::test]
    async fn different_keys_isolated() {
        let limiter = RateLimiter::new_in_memory();
        for _ in 0..3 {
            limiter.check("10.0.0.1", 3, DEFAULT_WINDOW).await;
        }

        let blocked = limiter.check("10.0.0.1", 3, DEFAULT_WINDOW).await;
        assert!(!blocked.allowed);

        let other = limiter.check("10.0.0.2", 3, DEFAULT_WINDOW).await;
        assert!(other.allowed);
    }

    #[tokio::test]
    async fn concurrent_requests_respect_limit() {
        use tokio::sync::Barrier;

        let limiter = Arc::new(RateLimiter::new_in_memory());
        let barrier = Arc::new(Barrier::new(10));
        let mut handles = vec![];

        for _ in 0..10 {
            let limiter = Arc::clone(&limiter);
            let barrier = Arc::clone(&barrier);
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                limiter.check("race", 5, DEFAULT_WINDOW).await
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap().allowed {
                allowed += 1;
            }
        }

        assert_eq!(allowed, 5, "exactly the limit should get through");
    }

    #[tokio::test]
    async fn cleanup_evicts_expired_windows() {
        let limiter = RateLimiter::new_in_memory();
        limiter.check("old", 5, Duration::from_secs(0)).await;

        // Zero-length window means the attempt is immediately stale
        limiter.cleanup(Duration::from_secs(0)).await;
        assert_eq!(limiter.tracked_keys().await, 0);
    }

    #[tokio::test]
    async fn cleanup_keeps_active_windows() {
        let limiter = RateLimiter::new_in_memory();
        limiter.check("active", 5, DEFAULT_WINDOW).await;

        limiter.cleanup(DEFAULT_WINDOW).await;
        assert_eq!(limiter.tracked_keys().await, 1);

        let result = limiter.check("active", 5, DEFAULT_WINDOW).await;
        assert!(result.allowed);
        assert_eq!(result.remaining, 3);
    }
}
