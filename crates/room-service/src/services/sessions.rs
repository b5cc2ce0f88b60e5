//! Session lookup: bearer token to [`Actor`].
//!
//! Session tokens are stored as SHA-256 digests in `user_sessions`; the raw
//! token presented by the caller is digested and looked up, never stored.

use crate::errors::RoomError;
use crate::models::{Actor, PlatformRole};
use crate::repositories::{decode_enum, observe};
use common::secret::SecretString;
use common::token::token_digest;
use sqlx::{PgPool, Row};
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

/// Resolves a bearer token to the calling actor.
#[async_trait::async_trait]
pub trait ActorResolver: Send + Sync {
    /// Returns `RoomError::Unauthenticated` for unknown, expired or revoked tokens.
    async fn resolve(&self, token: &SecretString) -> Result<Actor, RoomError>;
}

/// Postgres-backed resolver over `user_sessions`, `users` and
/// `user_course_affiliations`.
pub struct PgActorResolver {
    pool: PgPool,
}

impl PgActorResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ActorResolver for PgActorResolver {
    #[instrument(skip_all, name = "rooms.sessions.resolve")]
    async fn resolve(&self, token: &SecretString) -> Result<Actor, RoomError> {
        let start = Instant::now();
        let digest = token_digest(token);

        let row = sqlx::query(
            r#"
            SELECT u.user_id, u.display_name, u.platform_role
            FROM user_sessions s
            JOIN users u ON u.user_id = s.user_id
            WHERE s.token_digest = $1
              AND s.revoked_at IS NULL
              AND s.expires_at > NOW()
              AND u.is_active = true
            "#,
        )
        .bind(&digest)
        .fetch_optional(&self.pool)
        .await;
        let row = observe("resolve_session", start, row)?
            .ok_or_else(|| RoomError::Unauthenticated("Invalid or expired session".to_string()))?;

        let user_id: Uuid = row.try_get("user_id")?;
        let role: String = row.try_get("platform_role")?;

        let start = Instant::now();
        let affiliations = sqlx::query_scalar::<_, Uuid>(
            "SELECT community_id FROM user_course_affiliations WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await;
        let course_affiliations =
            observe("load_course_affiliations", start, affiliations)?;

        Ok(Actor {
            user_id,
            display_name: row.try_get("display_name")?,
            platform_role: decode_enum("platform_role", &role, PlatformRole::from_db_str)?,
            course_affiliations,
        })
    }
}

/// Mock resolvers for tests.
pub mod mock {
    use super::*;
    use common::secret::ExposeSecret;
    use std::collections::HashMap;

    /// Resolver over a fixed token -> actor table.
    #[derive(Default)]
    pub struct StaticActorResolver {
        actors: HashMap<String, Actor>,
    }

    impl StaticActorResolver {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_actor(mut self, token: &str, actor: Actor) -> Self {
            self.actors.insert(token.to_string(), actor);
            self
        }
    }

    #[async_trait::async_trait]
    impl ActorResolver for StaticActorResolver {
        async fn resolve(&self, token: &SecretString) -> Result<Actor, RoomError> {
            self.actors
                .get(token.expose_secret())
                .cloned()
                .ok_or_else(|| RoomError::Unauthenticated("Invalid or expired session".to_string()))
        }
    }

}
