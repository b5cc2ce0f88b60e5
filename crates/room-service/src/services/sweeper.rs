//! Expiry sweeper for overdue room requests.
//!
//! There is no dedicated timer. Request traffic calls [`ExpirySweeper::maybe_sweep`],
//! which runs at most once per interval across all callers. Approve and reject
//! check expiry themselves under the request lock, so sweep latency never
//! affects correctness.

use crate::errors::RoomError;
use crate::observability::metrics;
use crate::repositories::RoomRequestsRepository;
use chrono::Utc;
use sqlx::PgPool;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::instrument;

const NEVER_RUN: u64 = u64::MAX;

pub struct ExpirySweeper {
    interval: Duration,
    epoch: Instant,
    /// Milliseconds since `epoch` of the last claimed run.
    last_run_ms: AtomicU64,
}

impl ExpirySweeper {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            epoch: Instant::now(),
            last_run_ms: AtomicU64::new(NEVER_RUN),
        }
    }

    /// Claim the next run if the interval has elapsed.
    ///
    /// Exactly one of several concurrent callers wins a given slot.
    fn try_claim(&self, now: Instant) -> bool {
        let now_ms = u64::try_from(now.duration_since(self.epoch).as_millis()).unwrap_or(u64::MAX - 1);
        let interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX);
        let last = self.last_run_ms.load(Ordering::Acquire);

        if last != NEVER_RUN && now_ms.saturating_sub(last) < interval_ms {
            return false;
        }

        self.last_run_ms
            .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Mark every overdue pending request `expired`. Returns how many changed.
    #[instrument(skip_all, name = "rooms.sweeper.sweep")]
    pub async fn sweep(&self, pool: &PgPool) -> Result<u64, RoomError> {
        let expired = RoomRequestsRepository::expire_overdue(pool, Utc::now()).await?;
        metrics::record_requests_expired(expired);
        if expired > 0 {
            tracing::info!(target: "rooms.sweeper", expired, "Expired overdue room requests");
        }
        Ok(expired)
    }

    /// Sweep if the throttle allows it. Errors are logged, not returned.
    pub async fn maybe_sweep(&self, pool: &PgPool) {
        if !self.try_claim(Instant::now()) {
            return;
        }
        if let Err(e) = self.sweep(pool).await {
            tracing::warn!(target: "rooms.sweeper", error = %e, "Request expiry sweep failed");
        }
    }

    /// Sweep unconditionally and restart the throttle window.
    pub async fn sweep_now(&self, pool: &PgPool) -> Result<u64, RoomError> {
        let now_ms = u64::try_from(Instant::now().duration_since(self.epoch).as_millis())
            .unwrap_or(u64::MAX - 1);
        self.last_run_ms.store(now_ms, Ordering::Release);
        self.sweep(pool).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_first_call_claims() {
        let sweeper = ExpirySweeper::new(Duration::from_secs(60));
        assert!(sweeper.try_claim(Instant::now()));
    }

    #[test]
    fn test_throttled_within_interval() {
        let sweeper = ExpirySweeper::new(Duration::from_secs(60));
        let now = Instant::now();
        assert!(sweeper.try_claim(now));
        assert!(!sweeper.try_claim(now + Duration::from_secs(1)));
        assert!(!sweeper.try_claim(now + Duration::from_secs(59)));
        assert!(sweeper.try_claim(now + Duration::from_secs(61)));
    }

    #[test]
    fn test_concurrent_claims_have_single_winner() {
        let sweeper = Arc::new(ExpirySweeper::new(Duration::from_secs(60)));
        let now = Instant::now();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sweeper = Arc::clone(&sweeper);
                std::thread::spawn(move || sweeper.try_claim(now))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|claimed| *claimed)
            .count();

        assert_eq!(winners, 1);
    }
}
