//! Chat service error types.
//!
//! Every operation of the room registry, membership manager, message channel
//! and rate limiter reports failure through [`ChatError`]. Storage-layer errors
//! never cross this boundary raw: they are folded into `StoreUnavailable` and
//! the actual cause is logged server-side.

use axum::{
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Chat service error type.
///
/// Maps to HTTP status codes:
/// - RoomNotFound, MemberNotFound: 404 Not Found
/// - RoomFull: 403 Forbidden
/// - MemberConflict: 409 Conflict
/// - MessageFailed, InvalidRequest: 400 Bad Request
/// - RateLimited: 429 Too Many Requests
/// - StoreUnavailable: 503 Service Unavailable
#[derive(Debug, Error)]
pub enum ChatError {
    /// No room exists yet for the referenced story or room id.
    /// Callers ensure the room and retry once.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Room is full ({active_members}/{capacity})")]
    RoomFull { capacity: i32, active_members: i64 },

    /// A second live session for the same device in the same room.
    #[error("Member conflict: device already holds a live seat")]
    MemberConflict,

    /// Unknown member, member who left, or member whose presence expired.
    #[error("Member not found")]
    MemberNotFound,

    #[error("Message failed: {0}")]
    MessageFailed(String),

    #[error("Rate limit exceeded")]
    RateLimited {
        limit: u32,
        remaining: u32,
        reset_at: DateTime<Utc>,
        retry_after_secs: u64,
    },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ChatError {
    /// Stable wire code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::RoomNotFound(_) => "ROOM_NOT_FOUND",
            ChatError::RoomFull { .. } => "ROOM_FULL",
            ChatError::MemberConflict => "MEMBER_CONFLICT",
            ChatError::MemberNotFound => "MEMBER_NOT_FOUND",
            ChatError::MessageFailed(_) => "MESSAGE_FAILED",
            ChatError::RateLimited { .. } => "RATE_LIMITED",
            ChatError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            ChatError::InvalidRequest(_) => "INVALID_REQUEST",
        }
    }

    /// Returns the HTTP status code for this error (for metrics recording).
    pub fn status_code(&self) -> u16 {
        match self {
            ChatError::RoomNotFound(_) | ChatError::MemberNotFound => 404,
            ChatError::RoomFull { .. } => 403,
            ChatError::MemberConflict => 409,
            ChatError::MessageFailed(_) | ChatError::InvalidRequest(_) => 400,
            ChatError::RateLimited { .. } => 429,
            ChatError::StoreUnavailable(_) => 503,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let (message, details) = match &self {
            ChatError::RoomNotFound(_) => ("Chat room not found".to_string(), None),
            ChatError::RoomFull {
                capacity,
                active_members,
            } => (
                "Chat room is full".to_string(),
                Some(serde_json::json!({
                    "capacity": capacity,
                    "activeMembers": active_members,
                })),
            ),
            ChatError::MemberConflict => (
                "This device is already participating in the room".to_string(),
                None,
            ),
            ChatError::MemberNotFound => ("Chat membership not found".to_string(), None),
            ChatError::MessageFailed(reason) => (reason.clone(), None),
            ChatError::RateLimited { .. } => (
                "Too many requests. Please try again later.".to_string(),
                None,
            ),
            ChatError::StoreUnavailable(reason) => {
                // Log actual reason server-side, return generic message to client
                tracing::warn!(target: "chat.availability", reason = %reason, "Store unavailable");
                ("Service temporarily unavailable".to_string(), None)
            }
            ChatError::InvalidRequest(reason) => (reason.clone(), None),
        };

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.code(),
                message,
                details,
            },
        };

        let mut response = (status, Json(body)).into_response();

        if let ChatError::RateLimited {
            limit,
            remaining,
            reset_at,
            retry_after_secs,
        } = &self
        {
            let headers = response.headers_mut();
            let pairs = [
                ("retry-after", retry_after_secs.to_string()),
                ("x-ratelimit-limit", limit.to_string()),
                ("x-ratelimit-remaining", remaining.to_string()),
                ("x-ratelimit-reset", reset_at.timestamp_millis().to_string()),
            ];
            for (name, value) in pairs {
                if let Ok(value) = HeaderValue::from_str(&value) {
                    headers.insert(HeaderName::from_static(name), value);
                }
            }
        }

        response
    }
}

/// Convert sqlx errors to ChatError
impl From<sqlx::Error> for ChatError {
    fn from(err: sqlx::Error) -> Self {
        ChatError::StoreUnavailable(err.to_string())
    }
}

impl From<redis::RedisError> for ChatError {
    fn from(err: redis::RedisError) -> Self {
        ChatError::StoreUnavailable(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;

    async fn read_body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_codes_and_status() {
        let cases: Vec<(ChatError, &str, u16)> = vec![
            (ChatError::RoomNotFound("s".into()), "ROOM_NOT_FOUND", 404),
            (
                ChatError::RoomFull {
                    capacity: 2,
                    active_members: 2,
                },
                "ROOM_FULL",
                403,
            ),
            (ChatError::MemberConflict, "MEMBER_CONFLICT", 409),
            (ChatError::MemberNotFound, "MEMBER_NOT_FOUND", 404),
            (ChatError::MessageFailed("x".into()), "MESSAGE_FAILED", 400),
            (
                ChatError::RateLimited {
                    limit: 10,
                    remaining: 0,
                    reset_at: Utc::now(),
                    retry_after_secs: 60,
                },
                "RATE_LIMITED",
                429,
            ),
            (
                ChatError::StoreUnavailable("down".into()),
                "STORE_UNAVAILABLE",
                503,
            ),
            (ChatError::InvalidRequest("x".into()), "INVALID_REQUEST", 400),
        ];

        for (error, code, status) in cases {
            assert_eq!(error.code(), code);
            assert_eq!(error.status_code(), status);
        }
    }

    #[test]
    fn test_display_room_full() {
        let error = ChatError::RoomFull {
            capacity: 30,
            active_members: 30,
        };
        assert_eq!(format!("{}", error), "Room is full (30/30)");
    }

    #[tokio::test]
    async fn test_into_response_room_full_carries_occupancy() {
        let response = ChatError::RoomFull {
            capacity: 2,
            active_members: 2,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "ROOM_FULL");
        assert_eq!(body["error"]["details"]["capacity"], 2);
        assert_eq!(body["error"]["details"]["activeMembers"], 2);
    }

    #[tokio::test]
    async fn test_into_response_rate_limited_sets_headers() {
        let reset_at = DateTime::<Utc>::from_timestamp_millis(1_700_000_060_000).unwrap();
        let response = ChatError::RateLimited {
            limit: 3,
            remaining: 0,
            reset_at,
            retry_after_secs: 42,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let headers = response.headers();
        assert_eq!(headers.get("retry-after").unwrap(), "42");
        assert_eq!(headers.get("x-ratelimit-limit").unwrap(), "3");
        assert_eq!(headers.get("x-ratelimit-remaining").unwrap(), "0");
        assert_eq!(headers.get("x-ratelimit-reset").unwrap(), "1700000060000");

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "RATE_LIMITED");
    }

    #[tokio::test]
    async fn test_into_response_store_unavailable_is_generic() {
        let response =
            ChatError::StoreUnavailable("connection refused at 10.0.0.5".into()).into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "STORE_UNAVAILABLE");
        assert_eq!(body["error"]["message"], "Service temporarily unavailable");
        assert!(body["error"].get("details").is_none());
    }
}
