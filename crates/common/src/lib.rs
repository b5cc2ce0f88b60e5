//! Common utilities shared across the rooms workspace.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for random bearer-style tokens and their one-way digests
pub mod token;
