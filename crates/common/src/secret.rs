//! Secret types for values that must never reach logs.
//!
//! Re-exports the [`secrecy`] types used across the rooms workspace. Room
//! passwords, invite tokens and session bearer tokens travel through the
//! service as [`SecretString`], so any struct deriving `Debug` that holds one
//! prints `[REDACTED]` instead of the value. Secrets are zeroized on drop.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct JoinAttempt {
//!     meet_code: String,
//!     password: Option<SecretString>,
//! }
//!
//! let attempt = JoinAttempt {
//!     meet_code: "K7QW2MZP".to_string(),
//!     password: Some(SecretString::from("open-sesame")),
//! };
//!
//! assert!(!format!("{attempt:?}").contains("open-sesame"));
//! let plain: &str = attempt.password.as_ref().map(|p| p.expose_secret()).unwrap_or("");
//! assert_eq!(plain, "open-sesame");
//! ```
//!
//! With the `serde` feature of `secrecy`, request bodies can deserialize
//! directly into `SecretString` fields.

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
