//! Room Service Library
//!
//! Room lifecycle and admission: meet codes, direct creation and the
//! request/approval queue, joining with capacity and credential checks,
//! host transitions, moderation of participants, and expiry of stale
//! requests.
//!
//! # Modules
//!
//! - `config` - Service configuration
//! - `errors` - Error types and their HTTP mapping
//! - `handlers` - HTTP request handlers
//! - `middleware` - Session authentication and HTTP metrics
//! - `models` - Data models and API bodies
//! - `observability` - Prometheus metrics
//! - `repositories` - Database access layer
//! - `routes` - Router and application state
//! - `services` - Admission policy, credential guard, lifecycle controller

pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod routes;
pub mod services;
