//! Test server harness for E2E testing
//!
//! Provides `TestChatServer` for spawning real chat server instances in tests.
//! The server runs over the in-memory store with a manual clock, so tests can
//! expire presence or roll limiter windows by advancing time.

use chat_service::clock::{Clock, ManualClock};
use chat_service::config::Config;
use chat_service::rate_limit::RateLimiters;
use chat_service::repositories::MemoryChatStore;
use chat_service::routes::{self, AppState};
use chrono::TimeDelta;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Test harness for spawning the chat service in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_room_state_e2e() -> Result<(), anyhow::Error> {
///     let server = TestChatServer::spawn().await?;
///
///     let response = server
///         .client()
///         .get(format!("{}/v1/chat/rooms/story-1", server.url()))
///         .send()
///         .await?;
///
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestChatServer {
    addr: SocketAddr,
    store: Arc<MemoryChatStore>,
    clock: Arc<ManualClock>,
    config: Config,
    client: reqwest::Client,
    _handle: JoinHandle<()>,
}

impl TestChatServer {
    /// Spawn a server with default configuration.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with(&[]).await
    }

    /// Spawn a server with configuration overrides, e.g.
    /// `[("CHAT_DEFAULT_ROOM_CAPACITY", "2")]`.
    ///
    /// The server will:
    /// - Use the in-memory store and in-process rate limiter
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start the HTTP server in the background
    pub async fn spawn_with(overrides: &[(&str, &str)]) -> Result<Self, anyhow::Error> {
        let mut vars = HashMap::from([("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string())]);
        for (name, value) in overrides {
            vars.insert((*name).to_string(), (*value).to_string());
        }

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let store = Arc::new(MemoryChatStore::new());
        let clock = Arc::new(ManualClock::default());
        let dyn_clock: Arc<dyn Clock> = clock.clone();

        // No REDIS_URL, so this never touches the network.
        let limiters = RateLimiters::connect(&config, dyn_clock.clone()).await;

        let state = Arc::new(AppState::new(
            config.clone(),
            store.clone(),
            dyn_clock,
            limiters,
        ));
        let app = routes::build_routes(state, None);

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
            store,
            clock,
            config,
            client: reqwest::Client::new(),
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Shared HTTP client.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// The backing store, for outage simulation and row inspection.
    pub fn store(&self) -> &Arc<MemoryChatStore> {
        &self.store
    }

    /// Get reference to the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Move the server's clock forward.
    pub fn advance(&self, by: TimeDelta) {
        self.clock.advance(by);
    }

    /// URL of a room route, e.g. `room_url("story-1", "join")`.
    pub fn room_url(&self, story_id: &str, action: &str) -> String {
        if action.is_empty() {
            format!("{}/v1/chat/rooms/{}", self.url(), story_id)
        } else {
            format!("{}/v1/chat/rooms/{}/{}", self.url(), story_id, action)
        }
    }
}

impl Drop for TestChatServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}
