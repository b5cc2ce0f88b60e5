//! Moderation audit sink.
//!
//! Events are handed to [`AuditDispatcher`] after the lifecycle operation
//! that produced them has committed. Appends run on background tasks; a
//! failed or dropped append is logged and never undoes the operation.

use crate::errors::RoomError;
use crate::models::ModerationEvent;
use crate::repositories::ModerationEventsRepository;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::warn;

/// Upper bound on audit appends in flight at once.
pub const MAX_PENDING_AUDIT_WRITES: u32 = 1024;

#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: &ModerationEvent) -> Result<(), RoomError>;
}

/// Appends to `room_moderation_events`.
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AuditSink for PgAuditSink {
    async fn record(&self, event: &ModerationEvent) -> Result<(), RoomError> {
        ModerationEventsRepository::append(&self.pool, event).await
    }
}

/// Fire-and-forget front of an [`AuditSink`].
///
/// Each event is appended on its own task holding one slot of a bounded
/// semaphore. When every slot is taken the event is dropped with a warning.
pub struct AuditDispatcher {
    sink: Arc<dyn AuditSink>,
    slots: Arc<Semaphore>,
}

impl AuditDispatcher {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            sink,
            slots: Arc::new(Semaphore::new(MAX_PENDING_AUDIT_WRITES as usize)),
        }
    }

    /// Queue `event` for appending. Never waits on the sink.
    pub fn dispatch(&self, event: ModerationEvent) {
        let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
            warn!(
                target: "rooms.audit",
                action = event.action.as_str(),
                "Audit backlog full, dropping moderation event"
            );
            return;
        };

        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            if let Err(e) = sink.record(&event).await {
                warn!(
                    target: "rooms.audit",
                    action = event.action.as_str(),
                    error = %e,
                    "Failed to record moderation event"
                );
            }
            drop(permit);
        });
    }

    /// Wait until every dispatched append has finished.
    pub async fn flush(&self) {
        if let Ok(all) = self.slots.acquire_many(MAX_PENDING_AUDIT_WRITES).await {
            drop(all);
        }
    }
}

/// Recording, failing and stalled sinks for tests.
pub mod mock {
    use super::*;
    use crate::models::ModerationAction;
    use tokio::sync::Mutex;

    /// Keeps every event in memory.
    #[derive(Default)]
    pub struct RecordingAuditSink {
        events: Mutex<Vec<ModerationEvent>>,
    }

    impl RecordingAuditSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn events(&self) -> Vec<ModerationEvent> {
            self.events.lock().await.clone()
        }

        pub async fn count(&self, action: ModerationAction) -> usize {
            self.events
                .lock()
                .await
                .iter()
                .filter(|e| e.action == action)
                .count()
        }
    }

    #[async_trait::async_trait]
    impl AuditSink for RecordingAuditSink {
        async fn record(&self, event: &ModerationEvent) -> Result<(), RoomError> {
            self.events.lock().await.push(event.clone());
            Ok(())
        }
    }

    /// Always fails, for proving that audit failures do not roll back.
    pub struct FailingAuditSink;

    #[async_trait::async_trait]
    impl AuditSink for FailingAuditSink {
        async fn record(&self, _event: &ModerationEvent) -> Result<(), RoomError> {
            Err(RoomError::Database("audit store unavailable".to_string()))
        }
    }

    /// Never completes, like a sink stuck behind an exhausted pool.
    pub struct StalledAuditSink;

    #[async_trait::async_trait]
    impl AuditSink for StalledAuditSink {
        async fn record(&self, _event: &ModerationEvent) -> Result<(), RoomError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }
}
