//! Test server harness for E2E testing
//!
//! Provides `TestRoomServer` for spawning real room service instances in
//! tests. Sessions resolve through Postgres, so callers authenticate with
//! tokens from [`seed_user`](crate::fixtures::seed_user).

use room_service::config::Config;
use room_service::observability::metrics::detached_handle;
use room_service::routes::{self, AppState};
use room_service::services::{Collaborators, LifecycleSettings, PgActorResolver, RoomLifecycle};
use sqlx::PgPool;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Test harness for spawning the room service in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[sqlx::test(migrations = "../../migrations")]
/// async fn test_health_flow_e2e(pool: PgPool) -> Result<()> {
///     let server = TestRoomServer::spawn(pool).await?;
///     let response = reqwest::get(format!("{}/health", server.url())).await?;
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestRoomServer {
    addr: SocketAddr,
    pool: PgPool,
    config: Config,
    client: reqwest::Client,
    _handle: JoinHandle<()>,
}

impl TestRoomServer {
    /// Spawn a server on 127.0.0.1 with a random port.
    pub async fn spawn(pool: PgPool) -> Result<Self, anyhow::Error> {
        Self::spawn_with_vars(pool, HashMap::new()).await
    }

    /// Spawn with extra configuration variables (e.g. `ROOM_MAX_PENDING_REQUESTS`).
    pub async fn spawn_with_vars(
        pool: PgPool,
        overrides: HashMap<String, String>,
    ) -> Result<Self, anyhow::Error> {
        let mut vars = HashMap::from([
            (
                "DATABASE_URL".to_string(),
                "postgresql://test/test".to_string(),
            ),
            ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            (
                "ROOM_CALL_BASE_URL".to_string(),
                crate::TEST_CALL_BASE_URL.to_string(),
            ),
            (
                "ROOM_APP_BASE_URL".to_string(),
                crate::TEST_APP_BASE_URL.to_string(),
            ),
            ("RATE_LIMIT_MAX_ACTIONS".to_string(), "1000".to_string()),
        ]);
        vars.extend(overrides);

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let lifecycle = Arc::new(RoomLifecycle::new(
            pool.clone(),
            LifecycleSettings::from_config(&config),
            Collaborators::postgres(&pool, &config),
        ));
        let state = Arc::new(AppState {
            pool: pool.clone(),
            config: config.clone(),
            lifecycle,
            actor_resolver: Arc::new(PgActorResolver::new(pool.clone())),
        });

        let metrics_handle = detached_handle()
            .map_err(|e| anyhow::anyhow!("Failed to build metrics handle: {}", e))?;
        let app = routes::build_routes(state, metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            pool,
            config,
            client: reqwest::Client::new(),
            _handle: handle,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Request builder for `path` with the caller's bearer token attached.
    pub fn authed(
        &self,
        method: reqwest::Method,
        path: &str,
        user: &crate::TestUser,
    ) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.url(), path))
            .header("authorization", user.bearer())
    }
}

impl Drop for TestRoomServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_server_spawns_successfully(pool: PgPool) -> Result<(), anyhow::Error> {
        let server = TestRoomServer::spawn(pool).await?;
        assert!(server.url().starts_with("http://127.0.0.1:"));

        let response = reqwest::get(format!("{}/health", server.url())).await?;
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await?, "OK");
        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_server_provides_pool_access(pool: PgPool) -> Result<(), anyhow::Error> {
        let server = TestRoomServer::spawn(pool).await?;
        let result: (i32,) = sqlx::query_as("SELECT 1").fetch_one(server.pool()).await?;
        assert_eq!(result.0, 1);
        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_server_applies_overrides(pool: PgPool) -> Result<(), anyhow::Error> {
        let server = TestRoomServer::spawn_with_vars(
            pool,
            HashMap::from([("ROOM_MAX_PENDING_REQUESTS".to_string(), "1".to_string())]),
        )
        .await?;
        assert_eq!(server.config().max_pending_requests, 1);
        assert!(server.addr().ip().is_loopback());
        Ok(())
    }
}
