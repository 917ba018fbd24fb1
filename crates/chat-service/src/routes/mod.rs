//! HTTP routes for the chat service.
//!
//! Defines the Axum router and application state.

use crate::clock::Clock;
use crate::config::Config;
use crate::handlers;
use crate::middleware::http_metrics_middleware;
use crate::rate_limit::RateLimiters;
use crate::repositories::ChatStore;
use crate::services::{ChatContext, MembershipManager, MessageChannel, RoomRegistry};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    /// Store, clock and timeouts shared by the services.
    pub ctx: ChatContext,

    pub rooms: RoomRegistry,
    pub members: MembershipManager,
    pub messages: MessageChannel,

    /// Rate limiters for join, send and presence.
    pub limiters: RateLimiters,
}

impl AppState {
    /// Wire the core services over `store`.
    pub fn new(
        config: Config,
        store: Arc<dyn ChatStore>,
        clock: Arc<dyn Clock>,
        limiters: RateLimiters,
    ) -> Self {
        let ctx = ChatContext::from_config(store, clock, &config);
        Self {
            rooms: RoomRegistry::new(ctx.clone(), config.default_room_capacity),
            members: MembershipManager::new(ctx.clone()),
            messages: MessageChannel::new(ctx.clone()),
            config,
            ctx,
            limiters,
        }
    }
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/health` - Liveness probe (simple "OK")
/// - `/ready` - Readiness probe (pings the chat store)
/// - `/metrics` - Prometheus scrape, when a recorder handle is given
/// - `/v1/chat/rooms/...` - room state, join, presence, leave, messages
/// - `/v1/chat/users/:user_id/rooms` - rooms a user has not left
/// - TraceLayer for request logging
/// - HTTP metrics middleware
/// - 30 second request timeout
pub fn build_routes(state: Arc<AppState>, metrics_handle: Option<PrometheusHandle>) -> Router {
    let chat_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/v1/chat/rooms/states", get(handlers::get_room_states))
        .route("/v1/chat/rooms/:story_id", get(handlers::get_room_state))
        .route("/v1/chat/rooms/:story_id/join", post(handlers::join_room))
        .route(
            "/v1/chat/rooms/:story_id/presence",
            post(handlers::touch_presence),
        )
        .route("/v1/chat/rooms/:story_id/leave", post(handlers::leave_room))
        .route(
            "/v1/chat/rooms/:story_id/messages",
            get(handlers::fetch_messages).post(handlers::send_message),
        )
        .route(
            "/v1/chat/users/:user_id/rooms",
            get(handlers::get_user_rooms),
        )
        .with_state(state);

    let routes = match metrics_handle {
        Some(handle) => chat_routes.merge(
            Router::new()
                .route("/metrics", get(handlers::metrics_handler))
                .with_state(handle),
        ),
        None => chat_routes,
    };

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - Timeout the request (innermost)
    // 2. TraceLayer - Log request details
    // 3. http_metrics_middleware - Record ALL responses (outermost)
    routes
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(middleware::from_fn(http_metrics_middleware))
}
