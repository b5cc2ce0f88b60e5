//! Service layer for the room service.
//!
//! # Components
//!
//! - `admission` - Pure admission policy (create, review, view, join)
//! - `audit` - Moderation event sink
//! - `credentials` - Room password hashing and invite tokens
//! - `directory` - Community membership and block list lookups
//! - `lifecycle` - Lifecycle controller orchestrating every room operation
//! - `meet_code` - Meet code generation and collision-free allocation
//! - `rate_limiter` - Per-actor, per-action fixed-window limiter
//! - `sessions` - Bearer token to actor resolution
//! - `sweeper` - Throttled expiry of overdue room requests

pub mod admission;
pub mod audit;
pub mod credentials;
pub mod directory;
pub mod lifecycle;
pub mod meet_code;
pub mod rate_limiter;
pub mod sessions;
pub mod sweeper;

pub use audit::{AuditSink, PgAuditSink};
pub use directory::{BlockList, CommunityDirectory, PgBlockList, PgCommunityDirectory};
pub use lifecycle::{Collaborators, LifecycleSettings, RoomLifecycle};
pub use rate_limiter::{FixedWindowRateLimiter, RateLimiter};
pub use sessions::{ActorResolver, PgActorResolver};
pub use sweeper::ExpirySweeper;
