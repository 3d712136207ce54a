//! Fixed-window rate limiting keyed by caller identity.
//!
//! Records are created lazily on the first request of a window, overwritten once
//! the window has passed, and dropped by a periodic sweep. Check and sweep take
//! the same lock, so a sweep can never remove a record mid-update.
//!
//! Scaling: state is per process. Behind N replicas a caller effectively gets
//! N times the quota; swap the `RateLimiter` implementation for a shared store
//! if that matters.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use super::clock::Clock;

/// Window length and quota applied to every identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub window: Duration,
    pub max_requests: u32,
}

impl RateLimitPolicy {
    #[must_use]
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitOutcome {
    pub allowed: bool,
    pub remaining: u32,
    pub window_reset_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug)]
struct RateLimitRecord {
    count: u32,
    window_reset_at: DateTime<Utc>,
}

pub trait RateLimiter: Send + Sync {
    /// Count one request for `identity_key` and report whether it is admitted.
    fn check(&self, identity_key: &str, window: Duration, max_requests: u32) -> RateLimitOutcome;

    /// Drop records whose window has passed. Returns how many were removed.
    fn sweep(&self) -> usize;

    fn check_policy(&self, identity_key: &str, policy: RateLimitPolicy) -> RateLimitOutcome {
        self.check(identity_key, policy.window, policy.max_requests)
    }
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check(&self, _identity_key: &str, window: Duration, max_requests: u32) -> RateLimitOutcome {
        RateLimitOutcome {
            allowed: true,
            remaining: max_requests,
            window_reset_at: Utc::now()
                .checked_add_signed(window)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    fn sweep(&self) -> usize {
        0
    }
}

/// In-process fixed-window counter store.
#[derive(Debug)]
pub struct FixedWindowRateLimiter {
    records: Mutex<HashMap<String, RateLimitRecord>>,
    clock: Arc<dyn Clock>,
}

impl FixedWindowRateLimiter {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Number of identities currently tracked.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl RateLimiter for FixedWindowRateLimiter {
    fn check(&self, identity_key: &str, window: Duration, max_requests: u32) -> RateLimitOutcome {
        let now = self.clock.now();
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);

        let record = match records.get_mut(identity_key) {
            Some(record) if record.window_reset_at > now => {
                record.count = record.count.saturating_add(1);
                *record
            }
            _ => {
                let record = RateLimitRecord {
                    count: 1,
                    window_reset_at: now
                        .checked_add_signed(window)
                        .unwrap_or(DateTime::<Utc>::MAX_UTC),
                };
                records.insert(identity_key.to_string(), record);
                record
            }
        };
        drop(records);

        if record.count > max_requests {
            RateLimitOutcome {
                allowed: false,
                remaining: 0,
                window_reset_at: record.window_reset_at,
            }
        } else {
            RateLimitOutcome {
                allowed: true,
                remaining: max_requests - record.count,
                window_reset_at: record.window_reset_at,
            }
        }
    }

    fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let before = records.len();
        records.retain(|_, record| record.window_reset_at > now);
        before - records.len()
    }
}

/// Run `sweep` on a fixed interval until the runtime shuts down.
pub fn spawn_sweeper(limiter: Arc<dyn RateLimiter>, every: std::time::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; nothing can be stale yet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = limiter.sweep();
            if removed > 0 {
                debug!(removed, "rate limit sweep");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::clock::ManualClock;
    use std::thread;

    fn limiter() -> (Arc<ManualClock>, FixedWindowRateLimiter) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let limiter = FixedWindowRateLimiter::new(clock.clone());
        (clock, limiter)
    }

    #[test]
    fn noop_rate_limiter_allows() {
        let limiter = NoopRateLimiter;
        let outcome = limiter.check("198.51.100.7", Duration::seconds(1), 1);
        assert!(outcome.allowed);
        assert_eq!(limiter.sweep(), 0);
    }

    #[test]
    fn oversized_window_saturates_instead_of_panicking() {
        let (_clock, limiter) = limiter();
        let window = Duration::milliseconds(i64::MAX / 2);

        let first = limiter.check("203.0.113.5", window, 1);
        let second = limiter.check("203.0.113.5", window, 1);

        assert!(first.allowed);
        assert!(!second.allowed);
        assert_eq!(first.window_reset_at, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn third_request_in_window_is_rejected() {
        let (clock, limiter) = limiter();
        let window = Duration::milliseconds(1000);

        let first = limiter.check("203.0.113.9", window, 2);
        clock.advance(Duration::milliseconds(400));
        let second = limiter.check("203.0.113.9", window, 2);
        clock.advance(Duration::milliseconds(500));
        let third = limiter.check("203.0.113.9", window, 2);

        assert_eq!(
            [first.allowed, second.allowed, third.allowed],
            [true, true, false]
        );
        assert_eq!(third.remaining, 0);
    }

    #[test]
    fn remaining_strictly_decreases_until_quota() {
        let (_clock, limiter) = limiter();
        let window = Duration::seconds(60);
        let mut previous = None;
        for _ in 0..5 {
            let outcome = limiter.check("client", window, 5);
            assert!(outcome.allowed);
            if let Some(previous) = previous {
                assert!(outcome.remaining < previous);
            }
            previous = Some(outcome.remaining);
        }
        assert_eq!(previous, Some(0));

        let over = limiter.check("client", window, 5);
        assert!(!over.allowed);
        assert_eq!(over.remaining, 0);
    }

    #[test]
    fn first_request_reports_full_window() {
        let (clock, limiter) = limiter();
        let now = clock.now();
        let outcome = limiter.check("client", Duration::seconds(30), 10);
        assert!(outcome.allowed);
        assert_eq!(outcome.remaining, 9);
        assert_eq!(outcome.window_reset_at, now + Duration::seconds(30));
    }

    #[test]
    fn expired_window_starts_fresh() {
        let (clock, limiter) = limiter();
        let window = Duration::seconds(1);
        assert!(limiter.check("client", window, 1).allowed);
        assert!(!limiter.check("client", window, 1).allowed);

        clock.advance(Duration::seconds(1));
        let fresh = limiter.check("client", window, 1);
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 0);
        assert_eq!(fresh.window_reset_at, clock.now() + window);
    }

    #[test]
    fn identities_have_separate_buckets() {
        let (_clock, limiter) = limiter();
        let window = Duration::seconds(10);
        assert!(limiter.check("a", window, 1).allowed);
        assert!(!limiter.check("a", window, 1).allowed);
        assert!(limiter.check("b", window, 1).allowed);
    }

    #[test]
    fn zero_quota_rejects_everything() {
        let (_clock, limiter) = limiter();
        let outcome = limiter.check("client", Duration::seconds(10), 0);
        assert!(!outcome.allowed);
        assert_eq!(outcome.remaining, 0);
    }

    #[test]
    fn sweep_removes_only_expired_records() {
        let (clock, limiter) = limiter();
        limiter.check("old", Duration::seconds(1), 5);
        limiter.check("new", Duration::seconds(60), 5);
        clock.advance(Duration::seconds(2));

        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.tracked(), 1);
        // The surviving record keeps its count.
        assert_eq!(limiter.check("new", Duration::seconds(60), 5).remaining, 3);
    }

    #[test]
    fn concurrent_checks_never_admit_more_than_quota() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let limiter = Arc::new(FixedWindowRateLimiter::new(clock));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                thread::spawn(move || {
                    (0..50)
                        .filter(|_| {
                            limiter
                                .check("shared", Duration::seconds(60), 100)
                                .allowed
                        })
                        .count()
                })
            })
            .collect();

        let admitted: usize = handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or(0))
            .sum();
        assert_eq!(admitted, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_runs_on_interval() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let limiter = Arc::new(FixedWindowRateLimiter::new(clock.clone()));
        limiter.check("stale", Duration::seconds(1), 5);
        clock.advance(Duration::seconds(5));

        let handle = spawn_sweeper(limiter.clone(), std::time::Duration::from_secs(30));
        tokio::time::sleep(std::time::Duration::from_secs(31)).await;
        tokio::task::yield_now().await;

        assert_eq!(limiter.tracked(), 0);
        handle.abort();
    }
}
