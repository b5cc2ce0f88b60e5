//! Room invites repository.
//!
//! Only SHA-256 digests of invite tokens are stored. Lookups are by digest
//! of the presented token, scoped to the room.

use super::observe;
use crate::errors::RoomError;
use crate::models::InviteRow;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, Row};
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

pub struct RoomInvitesRepository;

impl RoomInvitesRepository {
    #[instrument(skip_all, name = "rooms.repo.insert_invite")]
    pub async fn insert<'e, E>(
        executor: E,
        room_id: Uuid,
        token_digest: &str,
        issued_by: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<InviteRow, RoomError>
    where
        E: PgExecutor<'e>,
    {
        let start = Instant::now();
        let row = sqlx::query(
            r#"
            INSERT INTO room_invites (room_id, token_digest, issued_by, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING invite_id, room_id, issued_by, expires_at, revoked_at, created_at
            "#,
        )
        .bind(room_id)
        .bind(token_digest)
        .bind(issued_by)
        .bind(expires_at)
        .fetch_one(executor)
        .await;
        map_invite_row(&observe("insert_invite", start, row)?)
    }

    /// Whether an unrevoked, unexpired invite with this digest exists for the room.
    #[instrument(skip_all, name = "rooms.repo.check_invite")]
    pub async fn is_valid<'e, E>(
        executor: E,
        room_id: Uuid,
        token_digest: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RoomError>
    where
        E: PgExecutor<'e>,
    {
        let start = Instant::now();
        let valid = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM room_invites
                WHERE room_id = $1 AND token_digest = $2
                  AND revoked_at IS NULL AND expires_at > $3
            )
            "#,
        )
        .bind(room_id)
        .bind(token_digest)
        .bind(now)
        .fetch_one(executor)
        .await;
        observe("check_invite", start, valid)
    }

    /// Revoke an invite of the room. Revoking twice keeps the first timestamp.
    /// Returns false if no such invite exists for the room.
    #[instrument(skip_all, name = "rooms.repo.revoke_invite")]
    pub async fn revoke<'e, E>(
        executor: E,
        room_id: Uuid,
        invite_id: Uuid,
    ) -> Result<bool, RoomError>
    where
        E: PgExecutor<'e>,
    {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            UPDATE room_invites
            SET revoked_at = COALESCE(revoked_at, NOW())
            WHERE invite_id = $1 AND room_id = $2
            "#,
        )
        .bind(invite_id)
        .bind(room_id)
        .execute(executor)
        .await;
        Ok(observe("revoke_invite", start, result)?.rows_affected() == 1)
    }
}

fn map_invite_row(row: &PgRow) -> Result<InviteRow, RoomError> {
    Ok(InviteRow {
        invite_id: row.try_get("invite_id")?,
        room_id: row.try_get("room_id")?,
        issued_by: row.try_get("issued_by")?,
        expires_at: row.try_get("expires_at")?,
        revoked_at: row.try_get("revoked_at")?,
        created_at: row.try_get("created_at")?,
    })
}
