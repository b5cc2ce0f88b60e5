//! Room service configuration.
//!
//! Configuration is loaded from environment variables. The database URL is
//! redacted in Debug output.

use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Default bind address for the HTTP server.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default base for caller-facing call URLs (`{base}/{meet_code}`).
pub const DEFAULT_CALL_BASE_URL: &str = "http://localhost:3000/call";

/// Default base for invite links (`{base}/rooms/{meet_code}?invite={token}`).
pub const DEFAULT_APP_BASE_URL: &str = "http://localhost:3000";

/// Default lifetime of a pending room request (24 hours).
pub const DEFAULT_REQUEST_TTL_SECONDS: i64 = 86_400;

/// Default lifetime of a private-room invite (24 hours).
pub const DEFAULT_INVITE_TTL_SECONDS: i64 = 86_400;

/// Default number of pending requests an actor may hold at once.
pub const DEFAULT_MAX_PENDING_REQUESTS: i64 = 3;

/// Default minimum spacing between expiry sweeps.
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 60;

/// Default number of state-changing actions per actor, per action, per window.
pub const DEFAULT_RATE_LIMIT_MAX_ACTIONS: u32 = 30;

/// Default rate limit window length.
pub const DEFAULT_RATE_LIMIT_WINDOW_SECONDS: u64 = 60;

/// Room service configuration.
#[derive(Clone)]
pub struct Config {
    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Base URL the call link is built from.
    pub call_base_url: String,

    /// Base URL invite links are built from.
    pub app_base_url: String,

    /// Seconds a room request stays pending before it expires.
    pub request_ttl_seconds: i64,

    /// Seconds an issued invite stays valid.
    pub invite_ttl_seconds: i64,

    /// Pending requests allowed per requester.
    pub max_pending_requests: i64,

    /// Minimum seconds between two expiry sweeps.
    pub sweep_interval_seconds: u64,

    /// Actions allowed per (actor, action) in one rate limit window.
    pub rate_limit_max_actions: u32,

    /// Rate limit window length in seconds.
    pub rate_limit_window_seconds: u64,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"[REDACTED]")
            .field("bind_address", &self.bind_address)
            .field("call_base_url", &self.call_base_url)
            .field("app_base_url", &self.app_base_url)
            .field("request_ttl_seconds", &self.request_ttl_seconds)
            .field("invite_ttl_seconds", &self.invite_ttl_seconds)
            .field("max_pending_requests", &self.max_pending_requests)
            .field("sweep_interval_seconds", &self.sweep_interval_seconds)
            .field("rate_limit_max_actions", &self.rate_limit_max_actions)
            .field("rate_limit_window_seconds", &self.rate_limit_window_seconds)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_url = vars
            .get("DATABASE_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?
            .clone();

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let call_base_url = vars
            .get("ROOM_CALL_BASE_URL")
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_CALL_BASE_URL.to_string());

        let app_base_url = vars
            .get("ROOM_APP_BASE_URL")
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_APP_BASE_URL.to_string());

        let request_ttl_seconds = parse_positive(
            vars,
            "ROOM_REQUEST_TTL_SECONDS",
            DEFAULT_REQUEST_TTL_SECONDS,
        )?;
        let invite_ttl_seconds =
            parse_positive(vars, "ROOM_INVITE_TTL_SECONDS", DEFAULT_INVITE_TTL_SECONDS)?;
        let max_pending_requests = parse_positive(
            vars,
            "ROOM_MAX_PENDING_REQUESTS",
            DEFAULT_MAX_PENDING_REQUESTS,
        )?;
        let sweep_interval_seconds = parse_positive(
            vars,
            "ROOM_SWEEP_INTERVAL_SECONDS",
            DEFAULT_SWEEP_INTERVAL_SECONDS,
        )?;
        let rate_limit_max_actions = parse_positive(
            vars,
            "RATE_LIMIT_MAX_ACTIONS",
            DEFAULT_RATE_LIMIT_MAX_ACTIONS,
        )?;
        let rate_limit_window_seconds = parse_positive(
            vars,
            "RATE_LIMIT_WINDOW_SECONDS",
            DEFAULT_RATE_LIMIT_WINDOW_SECONDS,
        )?;

        Ok(Config {
            database_url,
            bind_address,
            call_base_url,
            app_base_url,
            request_ttl_seconds,
            invite_ttl_seconds,
            max_pending_requests,
            sweep_interval_seconds,
            rate_limit_max_actions,
            rate_limit_window_seconds,
        })
    }
}

/// Parse an optional numeric variable that must be greater than zero.
fn parse_positive<T>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
    T::Err: fmt::Display,
{
    let Some(value_str) = vars.get(name) else {
        return Ok(default);
    };

    let value: T = value_str.parse().map_err(|e| ConfigError::InvalidValue {
        name: name.to_string(),
        reason: format!("must be a valid positive integer, got '{}': {}", value_str, e),
    })?;

    if value <= T::default() {
        return Err(ConfigError::InvalidValue {
            name: name.to_string(),
            reason: format!("must be greater than 0, got '{}'", value_str),
        });
    }

    Ok(value)
}
