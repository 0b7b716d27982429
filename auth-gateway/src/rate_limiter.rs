// auth-gateway/src/rate_limiter.rs
//! Fixed-window request counters keyed by wallet address or client network address.
//!
//! Counters live in process memory, so limits are per instance. Running several
//! instances behind a load balancer multiplies the effective limit.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;

/// Count of requests seen in the window starting at `window_start`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitCounter {
    pub count: u32,
    pub window_start: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Denied { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    store: Arc<DashMap<String, RateLimitCounter>>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            store: Arc::new(DashMap::new()),
        }
    }

    /// Record one request for `key` at `now` and decide whether it may proceed.
    ///
    /// The shard lock held by the entry guard makes read-compare-update atomic per key;
    /// window start and count are always replaced together.
    pub fn check(&self, key: &str, now: DateTime<Utc>) -> RateDecision {
        let mut entry = self
            .store
            .entry(key.to_string())
            .or_insert(RateLimitCounter {
                count: 0,
                window_start: now,
            });
        let counter = entry.value_mut();

        if counter.count == 0 || now.signed_duration_since(counter.window_start) > self.window {
            *counter = RateLimitCounter {
                count: 1,
                window_start: now,
            };
        } else {
            counter.count = counter.count.saturating_add(1);
        }

        if counter.count > self.limit {
            let elapsed = now.signed_duration_since(counter.window_start);
            let retry_after = (self.window - elapsed).max(Duration::zero());
            tracing::warn!(
                "Rate limit exceeded for {} ({} requests in window)",
                key,
                counter.count
            );
            RateDecision::Denied { retry_after }
        } else {
            RateDecision::Allowed {
                remaining: self.limit - counter.count,
            }
        }
    }

    /// Drop counters whose window has expired; returns how many were removed
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.store.len();
        let window = self.window;
        self.store
            .retain(|_, counter| now.signed_duration_since(counter.window_start) <= window);
        before.saturating_sub(self.store.len())
    }

    pub fn tracked_keys(&self) -> usize {
        self.store.len()
    }
}
