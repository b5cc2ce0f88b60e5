//! Database fixtures for the identity tables the room service reads.
//!
//! Every helper inserts real rows so Postgres-backed collaborators
//! (directory, block list, session resolver) see the same world as the
//! lifecycle controller.

use common::secret::ExposeSecret;
use common::token::{generate_url_safe_token, token_digest, DEFAULT_TOKEN_BYTES};
use room_service::models::{Actor, PlatformRole};
use room_service::services::RoomLifecycle;
use sqlx::PgPool;
use uuid::Uuid;

/// A seeded user with a live session.
#[derive(Debug, Clone)]
pub struct TestUser {
    pub actor: Actor,
    /// Raw bearer token for the user's session.
    pub token: String,
}

impl TestUser {
    pub fn id(&self) -> Uuid {
        self.actor.user_id
    }

    /// `Authorization` header value.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

/// Insert a user with a one-hour session.
pub async fn seed_user(pool: &PgPool, display_name: &str, role: PlatformRole) -> TestUser {
    let user_id: Uuid = sqlx::query_scalar(
        "INSERT INTO users (display_name, platform_role) VALUES ($1, $2) RETURNING user_id",
    )
    .bind(display_name)
    .bind(role.as_str())
    .fetch_one(pool)
    .await
    .expect("insert user");

    let token = generate_url_safe_token(DEFAULT_TOKEN_BYTES).expect("generate session token");
    sqlx::query(
        "INSERT INTO user_sessions (user_id, token_digest, expires_at)
         VALUES ($1, $2, NOW() + INTERVAL '1 hour')",
    )
    .bind(user_id)
    .bind(token_digest(&token))
    .execute(pool)
    .await
    .expect("insert session");

    TestUser {
        actor: Actor {
            user_id,
            display_name: display_name.to_string(),
            platform_role: role,
            course_affiliations: vec![],
        },
        token: token.expose_secret().to_string(),
    }
}

pub async fn seed_member(pool: &PgPool, display_name: &str) -> TestUser {
    seed_user(pool, display_name, PlatformRole::Member).await
}

pub async fn seed_admin(pool: &PgPool, display_name: &str) -> TestUser {
    seed_user(pool, display_name, PlatformRole::Admin).await
}

/// Insert a community. Courses are communities with `is_course` set.
pub async fn seed_community(pool: &PgPool, name: &str, is_course: bool) -> Uuid {
    sqlx::query_scalar(
        "INSERT INTO communities (name, is_course) VALUES ($1, $2) RETURNING community_id",
    )
    .bind(name)
    .bind(is_course)
    .fetch_one(pool)
    .await
    .expect("insert community")
}

/// Add an active member with `role` ("member", "moderator" or "owner").
pub async fn add_member(pool: &PgPool, community_id: Uuid, user: &TestUser, role: &str) {
    sqlx::query(
        "INSERT INTO community_members (community_id, user_id, role) VALUES ($1, $2, $3)",
    )
    .bind(community_id)
    .bind(user.id())
    .bind(role)
    .execute(pool)
    .await
    .expect("insert community member");
}

/// Affiliate a user with a course outside membership. Updates the cached
/// actor too, mirroring what the session resolver would load.
pub async fn affiliate(pool: &PgPool, user: &mut TestUser, community_id: Uuid) {
    sqlx::query("INSERT INTO user_course_affiliations (user_id, community_id) VALUES ($1, $2)")
        .bind(user.id())
        .bind(community_id)
        .execute(pool)
        .await
        .expect("insert course affiliation");
    user.actor.course_affiliations.push(community_id);
}

/// `blocker` blocks `blocked`.
pub async fn block(pool: &PgPool, blocker: &TestUser, blocked: &TestUser) {
    sqlx::query("INSERT INTO user_blocks (blocker_id, blocked_id) VALUES ($1, $2)")
        .bind(blocker.id())
        .bind(blocked.id())
        .execute(pool)
        .await
        .expect("insert block");
}

/// Revoke every session of a user.
pub async fn revoke_sessions(pool: &PgPool, user: &TestUser) {
    sqlx::query("UPDATE user_sessions SET revoked_at = NOW() WHERE user_id = $1")
        .bind(user.id())
        .execute(pool)
        .await
        .expect("revoke sessions");
}

/// Move a request's deadline into the past without touching its status.
pub async fn backdate_request(pool: &PgPool, request_id: Uuid) {
    sqlx::query(
        "UPDATE room_requests SET expires_at = NOW() - INTERVAL '1 minute' WHERE request_id = $1",
    )
    .bind(request_id)
    .execute(pool)
    .await
    .expect("backdate request");
}

/// Move an invite's expiry into the past.
pub async fn expire_invite(pool: &PgPool, invite_id: Uuid) {
    sqlx::query(
        "UPDATE room_invites SET expires_at = NOW() - INTERVAL '1 minute' WHERE invite_id = $1",
    )
    .bind(invite_id)
    .execute(pool)
    .await
    .expect("expire invite");
}

/// Moderation events recorded for a room with `action`.
///
/// Waits for the lifecycle's queued events first.
pub async fn count_events(lifecycle: &RoomLifecycle, room_id: Uuid, action: &str) -> i64 {
    lifecycle.flush_audit().await;
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM room_moderation_events WHERE room_id = $1 AND action = $2",
    )
    .bind(room_id)
    .bind(action)
    .fetch_one(lifecycle.pool())
    .await
    .expect("count moderation events")
}

/// Status of a participant row, if any.
pub async fn participant_status(pool: &PgPool, room_id: Uuid, user_id: Uuid) -> Option<String> {
    sqlx::query_scalar(
        "SELECT status FROM room_participants WHERE room_id = $1 AND user_id = $2",
    )
    .bind(room_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .expect("load participant status")
}
