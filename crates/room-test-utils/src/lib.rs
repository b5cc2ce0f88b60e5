//! # Room Test Utilities
//!
//! Shared test utilities for the room service.
//!
//! This crate provides:
//! - Identity fixtures (users with sessions, communities, blocks)
//! - A lifecycle controller wired to a test pool (`TestLifecycle`)
//! - Server test harness (`TestRoomServer` for E2E tests)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use room_test_utils::*;
//!
//! #[sqlx::test(migrations = "../../migrations")]
//! async fn test_example(pool: PgPool) -> Result<()> {
//!     let admin = seed_admin(&pool, "Ada").await;
//!     let lifecycle = test_lifecycle(&pool);
//!     // ...
//!     Ok(())
//! }
//! ```

pub mod fixtures;
pub mod lifecycle_harness;
pub mod server_harness;

// Re-export commonly used items
pub use fixtures::*;
pub use lifecycle_harness::*;
pub use server_harness::*;
