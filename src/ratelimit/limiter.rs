//! Core rate limiter implementation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info};

use super::counter::{RateLimitDecision, SlidingWindowCounter};
use super::key::{KeyStrategy, RequestInfo};

/// Immutable configuration for one rate limiting call site.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// Maximum requests allowed in the time window. Must be positive.
    pub max_requests: u32,
    /// Length of the trailing window
    pub window: Duration,
    /// How requests map onto counter keys
    pub key_by: KeyStrategy,
}

impl PolicyConfig {
    /// Create a policy configuration.
    pub fn new(max_requests: u32, window: Duration, key_by: KeyStrategy) -> Self {
        Self {
            max_requests,
            window,
            key_by,
        }
    }

    /// Limit requests per client address.
    pub fn by_client_addr(max_requests: u32, window: Duration) -> Self {
        Self::new(max_requests, window, KeyStrategy::ClientAddr)
    }

    /// Limit requests per authenticated user, falling back to the address.
    pub fn by_user_id(max_requests: u32, window: Duration) -> Self {
        Self::new(max_requests, window, KeyStrategy::UserId)
    }

    /// Limit requests per authenticated username, falling back to the address.
    pub fn by_username(max_requests: u32, window: Duration) -> Self {
        Self::new(max_requests, window, KeyStrategy::Username)
    }

    /// Limit aggregate requests per endpoint path across all callers.
    pub fn by_endpoint(max_requests: u32, window: Duration) -> Self {
        Self::new(max_requests, window, KeyStrategy::Endpoint)
    }

    /// Limit requests per address and endpoint combined.
    pub fn by_addr_endpoint(max_requests: u32, window: Duration) -> Self {
        Self::new(max_requests, window, KeyStrategy::AddrEndpoint)
    }
}

/// A rate limiter for one call site: a policy plus the counter store it
/// exclusively owns.
///
/// The store is private so it can never be shared across policies with
/// differing windows; the sweep only knows this instance's window. This
/// struct is thread-safe and is shared across request tasks behind an `Arc`.
pub struct RateLimiter {
    config: PolicyConfig,
    counter: SlidingWindowCounter,
}

impl RateLimiter {
    /// Create a rate limiter with its own empty counter store.
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            config,
            counter: SlidingWindowCounter::new(),
        }
    }

    /// The policy this limiter enforces.
    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Check admission for a request at the current wall-clock time.
    ///
    /// Synchronous and non-blocking; it cannot fail.
    pub fn check(&self, request: &RequestInfo) -> RateLimitDecision {
        self.check_at(request, Utc::now())
    }

    /// Check admission for a request at an explicit point in time.
    pub fn check_at(&self, request: &RequestInfo, now: DateTime<Utc>) -> RateLimitDecision {
        let key = self.config.key_by.derive(request);
        self.counter
            .record_and_count(&key, now, self.config.window, self.config.max_requests)
    }

    /// Evict expired state using the current wall-clock time.
    pub fn sweep(&self) {
        self.sweep_at(Utc::now());
    }

    /// Evict expired state as of an explicit point in time.
    pub fn sweep_at(&self, now: DateTime<Utc>) {
        self.counter.sweep(now, self.config.window);
    }

    /// Whether the counter store holds an entry for `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.counter.contains_key(key)
    }

    /// Number of keys currently tracked by the counter store.
    pub fn tracked_keys(&self) -> usize {
        self.counter.tracked_keys()
    }

    /// Spawn the periodic background sweep for this limiter.
    ///
    /// The task runs `sweep` on a fixed interval, independent of request
    /// traffic. The interval only bounds how long idle-key memory can
    /// linger; it does not need to match the policy window. The sweeper
    /// stops when the returned handle is dropped or [`SweeperHandle::stop`]
    /// is awaited, so keep the handle alive for the lifetime of the service.
    pub fn start_sweeper(self: Arc<Self>, interval: Duration) -> SweeperHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.sweep(),
                    _ = stop_rx.changed() => {
                        debug!("Rate limit sweeper stopping");
                        break;
                    }
                }
            }
        });

        info!(interval_secs = interval.as_secs(), "Rate limit sweeper started");
        SweeperHandle { stop_tx, task }
    }
}

/// Handle owning a background sweep task.
pub struct SweeperHandle {
    stop_tx: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the sweeper to exit and wait for it to finish.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    fn from_addr(addr: &str) -> RequestInfo {
        RequestInfo {
            client_addr: Some(addr.to_string()),
            path: "/api/v1/status".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_strict_burst_scenario() {
        // Strict policy: 10 requests per minute per client address.
        let limiter = RateLimiter::new(PolicyConfig::by_client_addr(
            10,
            Duration::from_secs(60),
        ));
        let a = from_addr("203.0.113.7");

        // Ten requests from A within five seconds are all admitted, with
        // remaining counting down from 9 to 0.
        for i in 0..10u32 {
            let now = base_time() + Duration::from_secs(u64::from(i) / 2);
            let decision = limiter.check_at(&a, now);
            assert!(decision.admitted);
            assert_eq!(decision.limit, 10);
            assert_eq!(decision.remaining, 9 - i);
        }

        // The eleventh request from A at second 6 is rejected; the retry
        // hint points at the expiry of the first request's timestamp.
        let rejected = limiter.check_at(&a, base_time() + Duration::from_secs(6));
        assert!(!rejected.admitted);
        assert_eq!(rejected.limit, 10);
        assert_eq!(rejected.remaining, 0);
        assert!((rejected.retry_after.unwrap() - 54.0).abs() < 1e-9);

        // A concurrent request from B at second 6 is unaffected.
        let b = limiter.check_at(&from_addr("198.51.100.2"), base_time() + Duration::from_secs(6));
        assert!(b.admitted);
        assert_eq!(b.remaining, 9);
    }

    #[test]
    fn test_keying_by_user_identity() {
        let limiter = RateLimiter::new(PolicyConfig::by_user_id(1, Duration::from_secs(60)));

        let alice = RequestInfo {
            client_addr: Some("10.0.0.1".to_string()),
            path: "/".to_string(),
            user_id: Some(1),
            username: None,
        };
        let bob = RequestInfo {
            user_id: Some(2),
            ..alice.clone()
        };

        // Same address, different users: budgets are independent.
        assert!(limiter.check_at(&alice, base_time()).admitted);
        assert!(!limiter.check_at(&alice, base_time()).admitted);
        assert!(limiter.check_at(&bob, base_time()).admitted);

        assert!(limiter.contains_key("user:1"));
        assert!(limiter.contains_key("user:2"));
    }

    #[test]
    fn test_direct_sweep_reclaims_idle_keys() {
        let limiter = RateLimiter::new(PolicyConfig::by_client_addr(5, Duration::from_secs(60)));

        limiter.check_at(&from_addr("10.0.0.1"), base_time());
        assert_eq!(limiter.tracked_keys(), 1);

        limiter.sweep_at(base_time() + Duration::from_secs(61));
        assert_eq!(limiter.tracked_keys(), 0);
        assert!(!limiter.contains_key("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_background_sweeper_evicts_expired_keys() {
        let limiter = Arc::new(RateLimiter::new(PolicyConfig::by_client_addr(
            5,
            Duration::from_secs(60),
        )));

        // Record a request far enough in the past that it has already aged
        // out relative to the sweeper's wall clock.
        let stale = Utc::now() - Duration::from_secs(120);
        limiter.check_at(&from_addr("10.0.0.1"), stale);
        assert_eq!(limiter.tracked_keys(), 1);

        let handle = limiter.clone().start_sweeper(Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(limiter.tracked_keys(), 0);

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_stopped_sweeper_no_longer_runs() {
        let limiter = Arc::new(RateLimiter::new(PolicyConfig::by_client_addr(
            5,
            Duration::from_secs(60),
        )));

        let handle = limiter.clone().start_sweeper(Duration::from_millis(5));
        handle.stop().await;

        let stale = Utc::now() - Duration::from_secs(120);
        limiter.check_at(&from_addr("10.0.0.1"), stale);
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(limiter.tracked_keys(), 1);
    }
}
