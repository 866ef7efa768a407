//! Sliding window counter implementation.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, trace};

/// The outcome of an admission check.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitDecision {
    /// Whether the request may proceed
    pub admitted: bool,
    /// Configured maximum requests for the window
    pub limit: u32,
    /// Requests left in the current window
    pub remaining: u32,
    /// Unix timestamp (seconds) at which the window resets for this key
    pub reset_at: i64,
    /// How long to wait before retrying, in seconds. Set on rejection only.
    pub retry_after: Option<f64>,
}

/// A concurrency-safe store mapping each key to the timestamps of its recent
/// requests, ordered oldest first.
///
/// Filtering is lazy: an entry may hold stale timestamps between sweeps, but
/// every admission decision re-filters before acting. A single coarse lock
/// guards the whole store, so a filter/check/append sequence is atomic with
/// respect to all other accesses, including the sweep. Per-key locking would
/// be a valid refinement as long as it preserves that atomicity.
///
/// A store only ever sees one window configuration. Policies with different
/// windows must each own their own store, since the sweep has no way to tell
/// which window an entry was recorded under.
pub struct SlidingWindowCounter {
    requests: Mutex<HashMap<String, Vec<DateTime<Utc>>>>,
}

impl SlidingWindowCounter {
    /// Create an empty counter store.
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(HashMap::new()),
        }
    }

    /// Record a request for `key` and report the admission decision.
    ///
    /// Under one critical section: timestamps older than `now - window` are
    /// dropped, the surviving count is compared against `max_allowed`, and
    /// `now` is appended only when the request is admitted. A rejected
    /// request is deliberately not recorded, so repeated rejected retries do
    /// not shrink the remaining budget any further.
    pub fn record_and_count(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
        max_allowed: u32,
    ) -> RateLimitDecision {
        let cutoff = now - window;
        let mut requests = self.requests.lock();

        let mut valid: Vec<DateTime<Utc>> = requests
            .get(key)
            .map(|stamps| stamps.iter().copied().filter(|t| *t > cutoff).collect())
            .unwrap_or_default();

        if valid.len() >= max_allowed as usize {
            // The oldest surviving timestamp decides when a slot frees up.
            let oldest = valid.first().copied().unwrap_or(now);
            let reset = oldest + window;
            let retry_after = reset.signed_duration_since(now).as_seconds_f64();

            debug!(
                key = %key,
                limit = max_allowed,
                retry_after = retry_after,
                "Rate limit exceeded"
            );

            return RateLimitDecision {
                admitted: false,
                limit: max_allowed,
                remaining: 0,
                reset_at: reset.timestamp(),
                retry_after: Some(retry_after),
            };
        }

        valid.push(now);
        let remaining = max_allowed - valid.len() as u32;
        requests.insert(key.to_string(), valid);

        trace!(key = %key, remaining = remaining, "Request admitted");

        RateLimitDecision {
            admitted: true,
            limit: max_allowed,
            remaining,
            reset_at: (now + window).timestamp(),
            retry_after: None,
        }
    }

    /// Drop expired timestamps from every entry and evict entries that end
    /// up empty, so keys that have gone idle do not hold memory forever.
    ///
    /// This is the body of the periodic background sweep, exposed as a plain
    /// method so tests can trigger it deterministically.
    pub fn sweep(&self, now: DateTime<Utc>, window: Duration) {
        let cutoff = now - window;
        let mut requests = self.requests.lock();

        requests.retain(|key, stamps| {
            stamps.retain(|t| *t > cutoff);
            if stamps.is_empty() {
                debug!(key = %key, "Evicting idle rate limit key");
                false
            } else {
                true
            }
        });
    }

    /// Whether the store currently holds an entry for `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.requests.lock().contains_key(key)
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.requests.lock().len()
    }

    /// Remove all entries.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.requests.lock().clear();
    }
}

impl Default for SlidingWindowCounter {
    fn default() -> Self {
        Self::new()
    }
}
