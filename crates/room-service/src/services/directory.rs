//! Community membership and block list lookups.
//!
//! Both are read-only views of the platform's identity domain. Lookups run
//! outside the lifecycle controller's locked sections.

use crate::errors::RoomError;
use crate::repositories::observe;
use sqlx::PgPool;
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

/// Community (and course) membership.
///
/// Only `active` memberships count. Community owners count as moderators.
#[async_trait::async_trait]
pub trait CommunityDirectory: Send + Sync {
    async fn community_exists(&self, community_id: Uuid) -> Result<bool, RoomError>;

    async fn is_member(&self, community_id: Uuid, user_id: Uuid) -> Result<bool, RoomError>;

    async fn is_moderator(&self, community_id: Uuid, user_id: Uuid) -> Result<bool, RoomError>;

    /// Communities the user is an active member of, any role.
    async fn member_communities(&self, user_id: Uuid) -> Result<Vec<Uuid>, RoomError>;

    /// Communities the user moderates or owns.
    async fn moderated_communities(&self, user_id: Uuid) -> Result<Vec<Uuid>, RoomError>;
}

/// User-to-user blocks.
#[async_trait::async_trait]
pub trait BlockList: Send + Sync {
    /// True if either user has blocked the other.
    async fn are_mutually_blocked(&self, a: Uuid, b: Uuid) -> Result<bool, RoomError>;

    /// Everyone the user has blocked or been blocked by.
    async fn blocked_peers(&self, user_id: Uuid) -> Result<Vec<Uuid>, RoomError>;
}

pub struct PgCommunityDirectory {
    pool: PgPool,
}

impl PgCommunityDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CommunityDirectory for PgCommunityDirectory {
    #[instrument(skip_all, name = "rooms.directory.community_exists")]
    async fn community_exists(&self, community_id: Uuid) -> Result<bool, RoomError> {
        let start = Instant::now();
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM communities WHERE community_id = $1)",
        )
        .bind(community_id)
        .fetch_one(&self.pool)
        .await;
        observe("community_exists", start, exists)
    }

    #[instrument(skip_all, name = "rooms.directory.is_member")]
    async fn is_member(&self, community_id: Uuid, user_id: Uuid) -> Result<bool, RoomError> {
        let start = Instant::now();
        let member = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM community_members
                WHERE community_id = $1 AND user_id = $2 AND status = 'active'
            )
            "#,
        )
        .bind(community_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await;
        observe("is_community_member", start, member)
    }

    #[instrument(skip_all, name = "rooms.directory.is_moderator")]
    async fn is_moderator(&self, community_id: Uuid, user_id: Uuid) -> Result<bool, RoomError> {
        let start = Instant::now();
        let moderator = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM community_members
                WHERE community_id = $1 AND user_id = $2
                  AND status = 'active' AND role IN ('moderator', 'owner')
            )
            "#,
        )
        .bind(community_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await;
        observe("is_community_moderator", start, moderator)
    }

    #[instrument(skip_all, name = "rooms.directory.member_communities")]
    async fn member_communities(&self, user_id: Uuid) -> Result<Vec<Uuid>, RoomError> {
        let start = Instant::now();
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT community_id FROM community_members WHERE user_id = $1 AND status = 'active'",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await;
        observe("member_communities", start, ids)
    }

    #[instrument(skip_all, name = "rooms.directory.moderated_communities")]
    async fn moderated_communities(&self, user_id: Uuid) -> Result<Vec<Uuid>, RoomError> {
        let start = Instant::now();
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT community_id FROM community_members
            WHERE user_id = $1 AND status = 'active' AND role IN ('moderator', 'owner')
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await;
        observe("moderated_communities", start, ids)
    }
}

pub struct PgBlockList {
    pool: PgPool,
}

impl PgBlockList {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl BlockList for PgBlockList {
    #[instrument(skip_all, name = "rooms.blocks.are_mutually_blocked")]
    async fn are_mutually_blocked(&self, a: Uuid, b: Uuid) -> Result<bool, RoomError> {
        if a == b {
            return Ok(false);
        }
        let start = Instant::now();
        let blocked = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM user_blocks
                WHERE (blocker_id = $1 AND blocked_id = $2)
                   OR (blocker_id = $2 AND blocked_id = $1)
            )
            "#,
        )
        .bind(a)
        .bind(b)
        .fetch_one(&self.pool)
        .await;
        observe("are_mutually_blocked", start, blocked)
    }

    #[instrument(skip_all, name = "rooms.blocks.blocked_peers")]
    async fn blocked_peers(&self, user_id: Uuid) -> Result<Vec<Uuid>, RoomError> {
        let start = Instant::now();
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT blocked_id FROM user_blocks WHERE blocker_id = $1
            UNION
            SELECT blocker_id FROM user_blocks WHERE blocked_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await;
        observe("blocked_peers", start, ids)
    }
}

/// In-memory directory and block list for tests.
pub mod mock {
    use super::*;
    use std::collections::HashSet;

    #[derive(Default, Clone)]
    pub struct StaticDirectory {
        communities: HashSet<Uuid>,
        members: HashSet<(Uuid, Uuid)>,
        moderators: HashSet<(Uuid, Uuid)>,
    }

    impl StaticDirectory {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_community(mut self, community_id: Uuid) -> Self {
            self.communities.insert(community_id);
            self
        }

        pub fn with_member(mut self, community_id: Uuid, user_id: Uuid) -> Self {
            self.communities.insert(community_id);
            self.members.insert((community_id, user_id));
            self
        }

        pub fn with_moderator(mut self, community_id: Uuid, user_id: Uuid) -> Self {
            self.communities.insert(community_id);
            self.members.insert((community_id, user_id));
            self.moderators.insert((community_id, user_id));
            self
        }
    }

    #[async_trait::async_trait]
    impl CommunityDirectory for StaticDirectory {
        async fn community_exists(&self, community_id: Uuid) -> Result<bool, RoomError> {
            Ok(self.communities.contains(&community_id))
        }

        async fn is_member(&self, community_id: Uuid, user_id: Uuid) -> Result<bool, RoomError> {
            Ok(self.members.contains(&(community_id, user_id)))
        }

        async fn is_moderator(&self, community_id: Uuid, user_id: Uuid) -> Result<bool, RoomError> {
            Ok(self.moderators.contains(&(community_id, user_id)))
        }

        async fn member_communities(&self, user_id: Uuid) -> Result<Vec<Uuid>, RoomError> {
            Ok(self
                .members
                .iter()
                .filter(|(_, u)| *u == user_id)
                .map(|(c, _)| *c)
                .collect())
        }

        async fn moderated_communities(&self, user_id: Uuid) -> Result<Vec<Uuid>, RoomError> {
            Ok(self
                .moderators
                .iter()
                .filter(|(_, u)| *u == user_id)
                .map(|(c, _)| *c)
                .collect())
        }
    }

    #[derive(Default, Clone)]
    pub struct StaticBlockList {
        blocks: HashSet<(Uuid, Uuid)>,
    }

    impl StaticBlockList {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_block(mut self, blocker: Uuid, blocked: Uuid) -> Self {
            self.blocks.insert((blocker, blocked));
            self
        }
    }

    #[async_trait::async_trait]
    impl BlockList for StaticBlockList {
        async fn are_mutually_blocked(&self, a: Uuid, b: Uuid) -> Result<bool, RoomError> {
            Ok(self.blocks.contains(&(a, b)) || self.blocks.contains(&(b, a)))
        }

        async fn blocked_peers(&self, user_id: Uuid) -> Result<Vec<Uuid>, RoomError> {
            let peers: HashSet<Uuid> = self
                .blocks
                .iter()
                .filter_map(|(blocker, blocked)| {
                    if *blocker == user_id {
                        Some(*blocked)
                    } else if *blocked == user_id {
                        Some(*blocker)
                    } else {
                        None
                    }
                })
                .collect();
            Ok(peers.into_iter().collect())
        }
    }

    #[cfg(test)]
    #[allow(clippy::unwrap_used, clippy::expect_used)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn test_static_directory_roles() {
            let community = Uuid::new_v4();
            let member = Uuid::new_v4();
            let moderator = Uuid::new_v4();
            let directory = StaticDirectory::new()
                .with_member(community, member)
                .with_moderator(community, moderator);

            assert!(directory.is_member(community, member).await.unwrap());
            assert!(!directory.is_moderator(community, member).await.unwrap());
            assert!(directory.is_moderator(community, moderator).await.unwrap());
            // Moderators are members too
            assert!(directory.is_member(community, moderator).await.unwrap());
            assert_eq!(
                directory.moderated_communities(moderator).await.unwrap(),
                vec![community]
            );
        }

        #[tokio::test]
        async fn test_static_block_list_is_symmetric() {
            let a = Uuid::new_v4();
            let b = Uuid::new_v4();
            let blocks = StaticBlockList::new().with_block(a, b);

            assert!(blocks.are_mutually_blocked(a, b).await.unwrap());
            assert!(blocks.are_mutually_blocked(b, a).await.unwrap());
            assert_eq!(blocks.blocked_peers(b).await.unwrap(), vec![a]);
            assert!(!blocks
                .are_mutually_blocked(a, Uuid::new_v4())
                .await
                .unwrap());
        }
    }
}
