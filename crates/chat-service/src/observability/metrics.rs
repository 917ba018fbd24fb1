//! Metrics definitions for the chat service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `chat_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `method`: HTTP verbs
//! - `endpoint`: parameterized route templates, unknown paths become `/other`
//! - `outcome` / `status` / `decision`: fixed sets defined here
//! - `purpose`: rate-limit purposes (bounded by [`crate::rate_limit::Purpose`])
//! - `operation`: store operations named in code
//!
//! Story ids, member ids and client addresses never appear as labels.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the handle used by `/metrics`.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("chat_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("chat_store_operation".to_string()),
            &[
                0.001, 0.002, 0.005, 0.010, 0.020, 0.050, 0.100, 0.250, 0.500, 1.000, 5.000,
            ],
        )
        .map_err(|e| format!("Failed to set store operation buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `chat_http_requests_total`, `chat_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status` / `status_code`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("chat_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint.clone(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("chat_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Normalize a request path to its route template.
fn normalize_endpoint(path: &str) -> String {
    match path {
        "/health" | "/ready" | "/metrics" | "/v1/chat/rooms/states" => path.to_string(),
        _ if is_user_rooms_path(path) => "/v1/chat/users/{user_id}/rooms".to_string(),
        _ => normalize_room_endpoint(path),
    }
}

fn is_user_rooms_path(path: &str) -> bool {
    path.strip_prefix("/v1/chat/users/")
        .and_then(|rest| rest.strip_suffix("/rooms"))
        .is_some_and(|user| !user.is_empty() && !user.contains('/'))
}

fn normalize_room_endpoint(path: &str) -> String {
    let Some(rest) = path.strip_prefix("/v1/chat/rooms/") else {
        return "/other".to_string();
    };

    let mut segments = rest.split('/');
    match (segments.next(), segments.next(), segments.next()) {
        (Some(story), None, None) if !story.is_empty() => "/v1/chat/rooms/{story_id}".to_string(),
        (Some(story), Some(action), None) if !story.is_empty() => match action {
            "join" | "presence" | "leave" | "messages" => {
                format!("/v1/chat/rooms/{{story_id}}/{action}")
            }
            _ => "/other".to_string(),
        },
        _ => "/other".to_string(),
    }
}

// ============================================================================
// Chat Domain Metrics
// ============================================================================

/// Record a join attempt.
///
/// Metric: `chat_joins_total`
/// Labels: `outcome` (joined, rejoined, full, conflict, error)
pub fn record_join(outcome: &'static str) {
    counter!("chat_joins_total", "outcome" => outcome).increment(1);
}

/// Record a send attempt.
///
/// Metric: `chat_messages_total`
/// Labels: `status` (sent, rejected, error)
pub fn record_message(status: &'static str) {
    counter!("chat_messages_total", "status" => status).increment(1);
}

/// Record a rate-limit decision.
///
/// Metric: `chat_rate_limit_decisions_total`
/// Labels: `purpose`, `decision` (allowed, denied)
pub fn record_rate_limit_decision(purpose: &'static str, allowed: bool) {
    let decision = if allowed { "allowed" } else { "denied" };
    counter!("chat_rate_limit_decisions_total",
        "purpose" => purpose,
        "decision" => decision
    )
    .increment(1);
}

/// Record a backing-store call.
///
/// Metric: `chat_store_operation_duration_seconds`
/// Labels: `operation`, `status` (success, error, timeout)
pub fn record_store_operation(operation: &'static str, status: &'static str, duration: Duration) {
    histogram!("chat_store_operation_duration_seconds",
        "operation" => operation,
        "status" => status
    )
    .record(duration.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    // The metrics crate records to a no-op recorder when none is installed,
    // so these exercise the recording paths without asserting values.

    #[test]
    fn test_record_functions_do_not_panic() {
        record_http_request("GET", "/health", 200, Duration::from_millis(2));
        record_http_request(
            "POST",
            "/v1/chat/rooms/story-1/join",
            403,
            Duration::from_millis(20),
        );
        record_join("joined");
        record_message("rejected");
        record_rate_limit_decision("chat_send", false);
        record_store_operation("reserve_seat", "timeout", Duration::from_secs(5));
    }

    #[test]
    fn test_categorize_status_code() {
        assert_eq!(categorize_status_code(200), "success");
        assert_eq!(categorize_status_code(204), "success");
        assert_eq!(categorize_status_code(408), "timeout");
        assert_eq!(categorize_status_code(504), "timeout");
        assert_eq!(categorize_status_code(403), "error");
        assert_eq!(categorize_status_code(429), "error");
        assert_eq!(categorize_status_code(503), "error");
    }

    #[test]
    fn test_normalize_endpoint_static_paths() {
        assert_eq!(normalize_endpoint("/health"), "/health");
        assert_eq!(normalize_endpoint("/ready"), "/ready");
        assert_eq!(normalize_endpoint("/metrics"), "/metrics");
        assert_eq!(
            normalize_endpoint("/v1/chat/rooms/states"),
            "/v1/chat/rooms/states"
        );
    }

    #[test]
    fn test_normalize_endpoint_user_rooms() {
        assert_eq!(
            normalize_endpoint("/v1/chat/users/u-1/rooms"),
            "/v1/chat/users/{user_id}/rooms"
        );
        assert_eq!(normalize_endpoint("/v1/chat/users//rooms"), "/other");
        assert_eq!(normalize_endpoint("/v1/chat/users/a/b/rooms"), "/other");
    }

    #[test]
    fn test_normalize_endpoint_room_paths() {
        assert_eq!(
            normalize_endpoint("/v1/chat/rooms/my-story"),
            "/v1/chat/rooms/{story_id}"
        );
        assert_eq!(
            normalize_endpoint("/v1/chat/rooms/my-story/join"),
            "/v1/chat/rooms/{story_id}/join"
        );
        assert_eq!(
            normalize_endpoint("/v1/chat/rooms/my-story/messages"),
            "/v1/chat/rooms/{story_id}/messages"
        );
    }

    #[test]
    fn test_normalize_endpoint_unknown_paths() {
        assert_eq!(normalize_endpoint("/"), "/other");
        assert_eq!(normalize_endpoint("/v1/chat/rooms/"), "/other");
        assert_eq!(normalize_endpoint("/v1/chat/rooms/s/kick"), "/other");
        assert_eq!(normalize_endpoint("/v1/chat/rooms/s/join/extra"), "/other");
        assert_eq!(normalize_endpoint("/wp-admin"), "/other");
    }
}
