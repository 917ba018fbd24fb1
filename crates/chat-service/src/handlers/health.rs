//! Health check handlers.
//!
//! - `/health`: liveness, returns OK while the process runs
//! - `/ready`: readiness, pings the chat store

use crate::models::ReadinessResponse;
use crate::routes::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use std::sync::Arc;

/// Liveness probe handler. Checks no dependencies.
pub async fn health_check() -> &'static str {
    "OK"
}

/// Readiness probe handler.
///
/// Returns 200 when the chat store answers a ping within the store timeout,
/// 503 otherwise. The failure reason is logged, not returned.
#[tracing::instrument(skip_all, name = "chat.health.readiness")]
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.ctx.call("ping", state.ctx.store().ping()).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ReadinessResponse {
                status: "ready",
                store: "healthy",
                error: None,
            }),
        ),
        Err(e) => {
            tracing::warn!(
                target: "chat.health",
                error = %e,
                "Readiness check failed: store unavailable"
            );
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadinessResponse {
                    status: "not_ready",
                    store: "unhealthy",
                    error: Some("Service dependencies unavailable".to_string()),
                }),
            )
        }
    }
}
