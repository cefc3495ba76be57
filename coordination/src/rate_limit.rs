//! Sliding-window rate limiter over a shared [`WindowStore`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::schema::keys;
use crate::state::{StoreResult, WindowStore};

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests still admissible in the current window.
    pub remaining: u64,
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn WindowStore>,
    default_limit: u64,
    default_window: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn WindowStore>, default_limit: u64, default_window: Duration) -> Self {
        Self {
            store,
            default_limit,
            default_window,
        }
    }

    pub fn default_limit(&self) -> u64 {
        self.default_limit
    }

    pub fn default_window(&self) -> Duration {
        self.default_window
    }

    /// Check `key` against the configured default limit and window.
    pub async fn check_default(&self, key: &str) -> StoreResult<RateDecision> {
        self.check(key, self.default_limit, self.default_window).await
    }

    /// Record one request for `key` now and report whether it is admitted.
    pub async fn check(&self, key: &str, limit: u64, window: Duration) -> StoreResult<RateDecision> {
        self.check_at(key, limit, window, Utc::now()).await
    }

    /// Same as [`check`](Self::check) with an explicit clock reading.
    pub async fn check_at(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<RateDecision> {
        let count = self
            .store
            .admit(&keys::rate_window(key), now, window, limit)
            .await?;

        let allowed = count <= limit;
        if !allowed {
            tracing::debug!(key, count, limit, "Rate limit exceeded");
        }
        Ok(RateDecision {
            allowed,
            remaining: limit.saturating_sub(count),
        })
    }
}
