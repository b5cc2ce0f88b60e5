//! Per-actor, per-action rate limiting.
//!
//! The lifecycle controller consults the limiter before every state-mutating
//! operation. A denial short-circuits before any store access.

use dashmap::DashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Entries beyond this count trigger a purge of expired windows.
const PURGE_THRESHOLD: usize = 10_000;

#[async_trait::async_trait]
pub trait RateLimiter: Send + Sync {
    /// Count one `action` by `actor` and report whether it is allowed.
    async fn allow(&self, actor: Uuid, action: &'static str) -> bool;
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window counter keyed by (actor, action).
///
/// In-process only. Counters reset when the window elapses; expired entries
/// are purged once the map grows past a threshold.
pub struct FixedWindowRateLimiter {
    max_actions: u32,
    window: Duration,
    counters: DashMap<(Uuid, &'static str), Window>,
}

impl FixedWindowRateLimiter {
    pub fn new(max_actions: u32, window: Duration) -> Self {
        Self {
            max_actions,
            window,
            counters: DashMap::new(),
        }
    }

    fn check(&self, actor: Uuid, action: &'static str, now: Instant) -> bool {
        let allowed = {
            let mut entry = self.counters.entry((actor, action)).or_insert(Window {
                started: now,
                count: 0,
            });
            if now.duration_since(entry.started) >= self.window {
                *entry = Window {
                    started: now,
                    count: 0,
                };
            }
            if entry.count < self.max_actions {
                entry.count += 1;
                true
            } else {
                false
            }
        };

        if self.counters.len() > PURGE_THRESHOLD {
            let window = self.window;
            self.counters
                .retain(|_, w| now.duration_since(w.started) < window);
        }

        allowed
    }
}

#[async_trait::async_trait]
impl RateLimiter for FixedWindowRateLimiter {
    async fn allow(&self, actor: Uuid, action: &'static str) -> bool {
        self.check(actor, action, Instant::now())
    }
}

/// Fixed-answer limiters for tests.
pub mod mock {
    use super::*;

    pub struct AllowAll;

    #[async_trait::async_trait]
    impl RateLimiter for AllowAll {
        async fn allow(&self, _actor: Uuid, _action: &'static str) -> bool {
            true
        }
    }

    pub struct DenyAll;

    #[async_trait::async_trait]
    impl RateLimiter for DenyAll {
        async fn allow(&self, _actor: Uuid, _action: &'static str) -> bool {
            false
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_up_to_max_within_window() {
        let limiter = FixedWindowRateLimiter::new(3, Duration::from_secs(60));
        let actor = Uuid::new_v4();
        let now = Instant::now();

        assert!(limiter.check(actor, "join", now));
        assert!(limiter.check(actor, "join", now));
        assert!(limiter.check(actor, "join", now));
        assert!(!limiter.check(actor, "join", now));
    }

    #[test]
    fn test_counters_are_per_actor_and_action() {
        let limiter = FixedWindowRateLimiter::new(1, Duration::from_secs(60));
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let now = Instant::now();

        assert!(limiter.check(a, "join", now));
        assert!(!limiter.check(a, "join", now));
        assert!(limiter.check(a, "leave", now));
        assert!(limiter.check(b, "join", now));
    }

    #[test]
    fn test_window_resets() {
        let limiter = FixedWindowRateLimiter::new(1, Duration::from_secs(60));
        let actor = Uuid::new_v4();
        let now = Instant::now();

        assert!(limiter.check(actor, "create", now));
        assert!(!limiter.check(actor, "create", now + Duration::from_secs(59)));
        assert!(limiter.check(actor, "create", now + Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_mocks() {
        let actor = Uuid::new_v4();
        assert!(mock::AllowAll.allow(actor, "join").await);
        assert!(!mock::DenyAll.allow(actor, "join").await);
    }
}
