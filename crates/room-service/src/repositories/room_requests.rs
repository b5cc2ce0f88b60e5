//! Room requests repository.
//!
//! Pending requests leave `pending` exactly once. Every status update below
//! is guarded by `status = 'pending'`, and decisions are taken on a row
//! locked with `lock_by_id`, so a concurrent approve and reject cannot both
//! succeed.

use super::{decode_enum, observe};
use crate::errors::RoomError;
use crate::models::{RequestStatus, RoomRequestRow, RoomSettings, Visibility};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, Row};
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

const REQUEST_COLUMNS: &str = r#"
    q.request_id, q.requested_by, u.display_name AS requester_display_name,
    q.name, q.visibility, q.community_id, q.max_participants,
    q.allow_mic, q.allow_video, q.allow_screen_share, q.password_hash,
    q.scheduled_at, q.status, q.expires_at, q.reviewed_by, q.reviewed_at,
    q.decision_note, q.approved_room_id, q.created_at, q.updated_at
"#;

/// Maximum number of requests returned by one listing.
pub const MAX_REQUEST_LIST: i64 = 100;

/// Scope of a request listing.
#[derive(Debug, Clone)]
pub struct RequestListFilter {
    pub status: RequestStatus,
    /// Only requests made by this user.
    pub requested_by: Option<Uuid>,
    /// Only requests scoped to one of these communities.
    pub communities: Option<Vec<Uuid>>,
}

pub struct RoomRequestsRepository;

impl RoomRequestsRepository {
    /// Serialize request creation per requester for the rest of the transaction.
    ///
    /// Taken before counting pending requests so two concurrent requests from
    /// the same user cannot both slip under the pending limit.
    #[instrument(skip_all, name = "rooms.repo.lock_requester")]
    pub async fn lock_requester<'e, E>(executor: E, requested_by: Uuid) -> Result<(), RoomError>
    where
        E: PgExecutor<'e>,
    {
        let start = Instant::now();
        let result = sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
            .bind(requested_by)
            .execute(executor)
            .await;
        observe("lock_requester", start, result).map(|_| ())
    }

    /// Pending requests of `requested_by` that have not yet passed their TTL.
    #[instrument(skip_all, name = "rooms.repo.count_pending")]
    pub async fn count_pending<'e, E>(
        executor: E,
        requested_by: Uuid,
        now: DateTime<Utc>,
    ) -> Result<i64, RoomError>
    where
        E: PgExecutor<'e>,
    {
        let start = Instant::now();
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM room_requests
            WHERE requested_by = $1 AND status = 'pending' AND expires_at > $2
            "#,
        )
        .bind(requested_by)
        .bind(now)
        .fetch_one(executor)
        .await;
        observe("count_pending_requests", start, count)
    }

    #[instrument(skip_all, name = "rooms.repo.insert_request")]
    pub async fn insert<'e, E>(
        executor: E,
        requested_by: Uuid,
        settings: &RoomSettings,
        expires_at: DateTime<Utc>,
    ) -> Result<RoomRequestRow, RoomError>
    where
        E: PgExecutor<'e>,
    {
        let start = Instant::now();
        let sql = format!(
            r#"
            WITH q AS (
                INSERT INTO room_requests (
                    requested_by, name, visibility, community_id, max_participants,
                    allow_mic, allow_video, allow_screen_share, password_hash,
                    scheduled_at, status, expires_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'pending', $11)
                RETURNING *
            )
            SELECT {REQUEST_COLUMNS}
            FROM q LEFT JOIN users u ON u.user_id = q.requested_by
            "#
        );
        let row = sqlx::query(&sql)
            .bind(requested_by) // $1
            .bind(&settings.name) // $2
            .bind(settings.visibility.as_str()) // $3
            .bind(settings.community_id) // $4
            .bind(settings.max_participants) // $5
            .bind(settings.allow_mic) // $6
            .bind(settings.allow_video) // $7
            .bind(settings.allow_screen_share) // $8
            .bind(settings.password_hash.as_deref()) // $9
            .bind(settings.scheduled_at) // $10
            .bind(expires_at) // $11
            .fetch_one(executor)
            .await;
        map_request_row(&observe("insert_request", start, row)?)
    }

    #[instrument(skip_all, name = "rooms.repo.find_request")]
    pub async fn find_by_id<'e, E>(
        executor: E,
        request_id: Uuid,
    ) -> Result<Option<RoomRequestRow>, RoomError>
    where
        E: PgExecutor<'e>,
    {
        let start = Instant::now();
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM room_requests q \
             LEFT JOIN users u ON u.user_id = q.requested_by \
             WHERE q.request_id = $1"
        );
        let row = sqlx::query(&sql)
            .bind(request_id)
            .fetch_optional(executor)
            .await;
        observe("find_request", start, row)?
            .map(|r| map_request_row(&r))
            .transpose()
    }

    /// Lock the request row for the rest of the transaction.
    #[instrument(skip_all, name = "rooms.repo.lock_request")]
    pub async fn lock_by_id<'e, E>(
        executor: E,
        request_id: Uuid,
    ) -> Result<Option<RoomRequestRow>, RoomError>
    where
        E: PgExecutor<'e>,
    {
        let start = Instant::now();
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM room_requests q \
             LEFT JOIN users u ON u.user_id = q.requested_by \
             WHERE q.request_id = $1 FOR UPDATE OF q"
        );
        let row = sqlx::query(&sql)
            .bind(request_id)
            .fetch_optional(executor)
            .await;
        observe("lock_request", start, row)?
            .map(|r| map_request_row(&r))
            .transpose()
    }

    #[instrument(skip_all, name = "rooms.repo.approve_request")]
    pub async fn mark_approved<'e, E>(
        executor: E,
        request_id: Uuid,
        reviewed_by: Uuid,
        note: Option<&str>,
        room_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, RoomError>
    where
        E: PgExecutor<'e>,
    {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            UPDATE room_requests
            SET status = 'approved', reviewed_by = $2, reviewed_at = $3,
                decision_note = $4, approved_room_id = $5, updated_at = NOW()
            WHERE request_id = $1 AND status = 'pending'
            "#,
        )
        .bind(request_id)
        .bind(reviewed_by)
        .bind(now)
        .bind(note)
        .bind(room_id)
        .execute(executor)
        .await;
        Ok(observe("approve_request", start, result)?.rows_affected() == 1)
    }

    #[instrument(skip_all, name = "rooms.repo.reject_request")]
    pub async fn mark_rejected<'e, E>(
        executor: E,
        request_id: Uuid,
        reviewed_by: Uuid,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, RoomError>
    where
        E: PgExecutor<'e>,
    {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            UPDATE room_requests
            SET status = 'rejected', reviewed_by = $2, reviewed_at = $3,
                decision_note = $4, updated_at = NOW()
            WHERE request_id = $1 AND status = 'pending'
            "#,
        )
        .bind(request_id)
        .bind(reviewed_by)
        .bind(now)
        .bind(note)
        .execute(executor)
        .await;
        Ok(observe("reject_request", start, result)?.rows_affected() == 1)
    }

    #[instrument(skip_all, name = "rooms.repo.expire_request")]
    pub async fn mark_expired<'e, E>(executor: E, request_id: Uuid) -> Result<bool, RoomError>
    where
        E: PgExecutor<'e>,
    {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            UPDATE room_requests
            SET status = 'expired', updated_at = NOW()
            WHERE request_id = $1 AND status = 'pending'
            "#,
        )
        .bind(request_id)
        .execute(executor)
        .await;
        Ok(observe("expire_request", start, result)?.rows_affected() == 1)
    }

    /// Bulk `pending -> expired` for every request past its TTL.
    #[instrument(skip_all, name = "rooms.repo.expire_overdue")]
    pub async fn expire_overdue<'e, E>(executor: E, now: DateTime<Utc>) -> Result<u64, RoomError>
    where
        E: PgExecutor<'e>,
    {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            UPDATE room_requests
            SET status = 'expired', updated_at = NOW()
            WHERE status = 'pending' AND expires_at <= $1
            "#,
        )
        .bind(now)
        .execute(executor)
        .await;
        Ok(observe("expire_overdue_requests", start, result)?.rows_affected())
    }

    #[instrument(skip_all, name = "rooms.repo.list_requests")]
    pub async fn list<'e, E>(
        executor: E,
        filter: &RequestListFilter,
    ) -> Result<Vec<RoomRequestRow>, RoomError>
    where
        E: PgExecutor<'e>,
    {
        let start = Instant::now();
        let sql = format!(
            r#"
            SELECT {REQUEST_COLUMNS}
            FROM room_requests q
            LEFT JOIN users u ON u.user_id = q.requested_by
            WHERE q.status = $1
              AND ($2::uuid IS NULL OR q.requested_by = $2)
              AND ($3::uuid[] IS NULL OR q.community_id = ANY($3))
            ORDER BY q.created_at DESC, q.request_id
            LIMIT $4
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(filter.status.as_str())
            .bind(filter.requested_by)
            .bind(filter.communities.as_deref())
            .bind(MAX_REQUEST_LIST)
            .fetch_all(executor)
            .await;
        observe("list_requests", start, rows)?
            .iter()
            .map(map_request_row)
            .collect()
    }
}

fn map_request_row(row: &PgRow) -> Result<RoomRequestRow, RoomError> {
    let visibility: String = row.try_get("visibility")?;
    let status: String = row.try_get("status")?;

    Ok(RoomRequestRow {
        request_id: row.try_get("request_id")?,
        requested_by: row.try_get("requested_by")?,
        requester_display_name: row.try_get("requester_display_name")?,
        name: row.try_get("name")?,
        visibility: decode_enum("visibility", &visibility, Visibility::from_db_str)?,
        community_id: row.try_get("community_id")?,
        max_participants: row.try_get("max_participants")?,
        allow_mic: row.try_get("allow_mic")?,
        allow_video: row.try_get("allow_video")?,
        allow_screen_share: row.try_get("allow_screen_share")?,
        password_hash: row.try_get("password_hash")?,
        scheduled_at: row.try_get("scheduled_at")?,
        status: decode_enum("status", &status, RequestStatus::from_db_str)?,
        expires_at: row.try_get("expires_at")?,
        reviewed_by: row.try_get("reviewed_by")?,
        reviewed_at: row.try_get("reviewed_at")?,
        decision_note: row.try_get("decision_note")?,
        approved_room_id: row.try_get("approved_room_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
