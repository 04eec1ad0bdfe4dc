//! Fixed-window request rate limiting
//!
//! Counters live in the shared key-value store and are only touched through its
//! atomic check-and-increment, so concurrent requests from one caller can never
//! be admitted past the limit. If the store is unreachable the limiter fails
//! open and lets the request through.

use crate::kv::{now_ms, KvStore};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one rate-limit check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u64,
    /// Requests left in the current window
    pub remaining: u64,
    /// Window end, epoch seconds
    pub reset_at: i64,
    /// Seconds until the window ends; only set on rejection
    pub retry_after_secs: Option<u64>,
}

impl RateLimitDecision {
    /// HTTP status for the checked request
    pub fn status_code(&self) -> u16 {
        if self.allowed {
            200
        } else {
            429
        }
    }

    /// Response headers describing the caller's budget
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", self.reset_at.to_string()),
        ];

        if let Some(retry_after) = self.retry_after_secs {
            headers.push(("Retry-After", retry_after.to_string()));
        }

        headers
    }
}

/// Milliseconds to whole seconds, rounding up
fn ceil_secs(ms: i64) -> i64 {
    ms.div_euclid(1000) + i64::from(ms.rem_euclid(1000) != 0)
}

/// Per-caller fixed-window limiter
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn KvStore>,
    limit: u64,
    window: Duration,
}

impl RateLimiter {
    /// Creates a limiter admitting `limit` requests per `window` for each caller
    pub fn new(store: Arc<dyn KvStore>, limit: u64, window: Duration) -> Self {
        Self {
            store,
            limit,
            window,
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Counts one request for `caller_id` if its window has room
    ///
    /// # Arguments
    ///
    /// * `caller_id` - Caller identity, e.g. an API key
    ///
    /// # Returns
    ///
    /// The decision. Store failures yield an allowed decision with a full budget.
    pub async fn check_and_increment(&self, caller_id: &str) -> RateLimitDecision {
        let key = format!("ratelimit:{}", caller_id);

        match self
            .store
            .increment_within_limit(&key, self.limit, self.window)
            .await
        {
            Ok(count) => {
                let remaining = self.limit.saturating_sub(count.count);

                if count.admitted {
                    RateLimitDecision {
                        allowed: true,
                        limit: self.limit,
                        remaining,
                        reset_at: ceil_secs(count.window_ends_at_ms),
                        retry_after_secs: None,
                    }
                } else {
                    let wait_ms = count.window_ends_at_ms.saturating_sub(now_ms());
                    let retry_after = ceil_secs(wait_ms).max(1) as u64;

                    tracing::debug!(
                        "Rate limit exceeded for '{}', retry in {}s",
                        caller_id,
                        retry_after
                    );

                    RateLimitDecision {
                        allowed: false,
                        limit: self.limit,
                        remaining: 0,
                        reset_at: ceil_secs(count.window_ends_at_ms),
                        retry_after_secs: Some(retry_after),
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Rate limit store unavailable for '{}', allowing request: {}",
                    caller_id,
                    e
                );

                let window_ms = i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX);
                RateLimitDecision {
                    allowed: true,
                    limit: self.limit,
                    remaining: self.limit,
                    reset_at: ceil_secs(now_ms().saturating_add(window_ms)),
                    retry_after_secs: None,
                }
            }
        }
    }
}
