//! Lifecycle controller wired for tests.
//!
//! Directory, block list and audit go through Postgres so tests exercise the
//! real queries; the rate limiter allows everything unless replaced.

use room_service::services::audit::PgAuditSink;
use room_service::services::rate_limiter::mock::AllowAll;
use room_service::services::{
    AuditSink, Collaborators, LifecycleSettings, PgBlockList, PgCommunityDirectory, RateLimiter,
    RoomLifecycle,
};
use sqlx::PgPool;
use std::sync::Arc;

pub const TEST_CALL_BASE_URL: &str = "https://call.test";
pub const TEST_APP_BASE_URL: &str = "https://app.test";

/// Settings with production defaults and test URLs.
pub fn test_settings() -> LifecycleSettings {
    LifecycleSettings {
        call_base_url: TEST_CALL_BASE_URL.to_string(),
        app_base_url: TEST_APP_BASE_URL.to_string(),
        request_ttl: chrono::Duration::days(7),
        invite_ttl: chrono::Duration::days(7),
        max_pending_requests: 3,
        sweep_interval: std::time::Duration::from_secs(60),
    }
}

/// Builder for a [`RoomLifecycle`] over a test pool.
///
/// ```rust,ignore
/// let lifecycle = TestLifecycle::new(&pool).max_pending_requests(1).build();
/// ```
pub struct TestLifecycle {
    pool: PgPool,
    settings: LifecycleSettings,
    rate_limiter: Arc<dyn RateLimiter>,
    audit: Arc<dyn AuditSink>,
}

impl TestLifecycle {
    pub fn new(pool: &PgPool) -> Self {
        Self {
            pool: pool.clone(),
            settings: test_settings(),
            rate_limiter: Arc::new(AllowAll),
            audit: Arc::new(PgAuditSink::new(pool.clone())),
        }
    }

    pub fn max_pending_requests(mut self, limit: i64) -> Self {
        self.settings.max_pending_requests = limit;
        self
    }

    pub fn rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = limiter;
        self
    }

    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn build(self) -> RoomLifecycle {
        let collaborators = Collaborators {
            directory: Arc::new(PgCommunityDirectory::new(self.pool.clone())),
            blocks: Arc::new(PgBlockList::new(self.pool.clone())),
            rate_limiter: self.rate_limiter,
            audit: self.audit,
        };
        RoomLifecycle::new(self.pool, self.settings, collaborators)
    }
}

/// Default test lifecycle.
pub fn test_lifecycle(pool: &PgPool) -> RoomLifecycle {
    TestLifecycle::new(pool).build()
}
