//! Sliding-window request counter shared by the executor and the
//! execution gate.

use dashmap::DashMap;
use thiserror::Error;
use tokio::time::Instant;

use crate::types::RateLimit;

/// Rejection returned once a key has used up its window.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rate limit of {limit} requests per {window_ms} ms exceeded; retry after {retry_after_secs}s")]
pub struct RateLimitExceeded {
    pub limit: u32,
    pub window_ms: u64,
    pub retry_after_secs: u64,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Per-key counters. A window restarts once more than `window_ms` has
/// elapsed since its first request.
#[derive(Debug, Default)]
pub struct SlidingWindowLimiter {
    windows: DashMap<String, Window>,
}

impl SlidingWindowLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one request against `key`. Returns the requests left in the
    /// current window.
    pub fn check_and_record(
        &self,
        key: &str,
        limit: RateLimit,
    ) -> std::result::Result<u32, RateLimitExceeded> {
        let now = Instant::now();
        let window = std::time::Duration::from_millis(limit.window_ms);

        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        let elapsed = now.saturating_duration_since(entry.started);
        if elapsed > window {
            entry.started = now;
            entry.count = 0;
        }

        if entry.count >= limit.requests {
            let remaining = window.saturating_sub(now.saturating_duration_since(entry.started));
            let retry_after_secs = remaining.as_millis().div_ceil(1000).max(1) as u64;
            return Err(RateLimitExceeded {
                limit: limit.requests,
                window_ms: limit.window_ms,
                retry_after_secs,
            });
        }

        entry.count += 1;
        Ok(limit.requests - entry.count)
    }

    /// Requests counted in the current window for `key`.
    pub fn count(&self, key: &str) -> u32 {
        self.windows.get(key).map(|w| w.count).unwrap_or(0)
    }

    pub fn reset(&self, key: &str) {
        self.windows.remove(key);
    }

    pub fn clear(&self) {
        self.windows.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_rejects_after_limit() {
        let limiter = SlidingWindowLimiter::new();
        let limit = RateLimit::new(3, 1_000);
        assert_eq!(limiter.check_and_record("k", limit), Ok(2));
        assert_eq!(limiter.check_and_record("k", limit), Ok(1));
        assert_eq!(limiter.check_and_record("k", limit), Ok(0));
        let err = limiter.check_and_record("k", limit).unwrap_err();
        assert_eq!(err.retry_after_secs, 1);
        assert_eq!(limiter.count("k"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets_after_elapsed() {
        let limiter = SlidingWindowLimiter::new();
        let limit = RateLimit::new(1, 60_000);
        assert!(limiter.check_and_record("k", limit).is_ok());

        tokio::time::advance(Duration::from_secs(20)).await;
        let err = limiter.check_and_record("k", limit).unwrap_err();
        assert_eq!(err.retry_after_secs, 40);

        tokio::time::advance(Duration::from_millis(40_001)).await;
        assert!(limiter.check_and_record("k", limit).is_ok());
        assert_eq!(limiter.count("k"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let limiter = SlidingWindowLimiter::new();
        let limit = RateLimit::new(1, 60_000);
        assert!(limiter.check_and_record("shell.exec:alice", limit).is_ok());
        assert!(limiter.check_and_record("shell.exec:bob", limit).is_ok());
        assert!(limiter.check_and_record("shell.exec:alice", limit).is_err());
    }
}
