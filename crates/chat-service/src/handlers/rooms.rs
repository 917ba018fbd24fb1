//! Room and membership handlers.
//!
//! Routes:
//! - `GET /v1/chat/rooms/states?storyIds=a,b`
//! - `GET /v1/chat/rooms/:story_id`
//! - `POST /v1/chat/rooms/:story_id/join`
//! - `POST /v1/chat/rooms/:story_id/presence`
//! - `POST /v1/chat/rooms/:story_id/leave`
//! - `GET /v1/chat/users/:user_id/rooms`
//!
//! The story id in presence and leave paths only routes the request; the
//! member id in the body decides which seat is touched.

use crate::errors::ChatError;
use crate::models::{JoinRequest, MemberRequest, Membership, RoomSnapshot, RoomStatesParams};
use crate::rate_limit::Purpose;
use crate::routes::AppState;
use crate::services::membership::JoinParams;
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Address used for limiter keys when no proxy header is present.
const FALLBACK_CLIENT_IP: &str = "127.0.0.1";

/// Handler for GET /v1/chat/rooms/:story_id
///
/// Creates the room on first access.
#[instrument(skip_all, name = "chat.handler.room_state", fields(story_id = %story_id))]
pub async fn get_room_state(
    State(state): State<Arc<AppState>>,
    Path(story_id): Path<String>,
) -> Result<Json<RoomSnapshot>, ChatError> {
    state.rooms.ensure_room(&story_id).await?;
    let snapshot = state.rooms.get_room_snapshot(&story_id).await?;
    Ok(Json(snapshot))
}

/// Handler for GET /v1/chat/rooms/states
///
/// Ensures a room for every listed story, then returns the snapshots that
/// exist. `storyIds` is comma separated.
#[instrument(skip_all, name = "chat.handler.room_states")]
pub async fn get_room_states(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RoomStatesParams>,
) -> Result<Json<Vec<RoomSnapshot>>, ChatError> {
    let story_ids: Vec<String> = params
        .story_ids
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();

    if story_ids.is_empty() {
        return Err(ChatError::InvalidRequest(
            "storyIds is required".to_string(),
        ));
    }

    state.rooms.ensure_rooms(&story_ids).await?;
    let snapshots = state.rooms.get_room_snapshots(&story_ids).await?;
    Ok(Json(snapshots))
}

/// Handler for POST /v1/chat/rooms/:story_id/join
///
/// Rate limited per story and client address.
#[instrument(skip_all, name = "chat.handler.join", fields(story_id = %story_id))]
pub async fn join_room(
    State(state): State<Arc<AppState>>,
    Path(story_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<JoinRequest>,
) -> Result<Json<Membership>, ChatError> {
    let ip = client_ip(&headers);
    state
        .limiters
        .enforce(Purpose::ChatJoin, &format!("{story_id}:{ip}"))
        .await?;

    let params = JoinParams {
        device_hash: required(request.device_hash, "deviceHash")?,
        nickname: required(request.nickname, "nickname")?,
        session_id: required(request.session_id, "sessionId")?,
        user_id: request.user_id,
    };

    let membership = state
        .members
        .join_story(&state.rooms, &story_id, params)
        .await?;
    Ok(Json(membership))
}

/// Handler for POST /v1/chat/rooms/:story_id/presence
#[instrument(skip_all, name = "chat.handler.presence")]
pub async fn touch_presence(
    State(state): State<Arc<AppState>>,
    Path(_story_id): Path<String>,
    Json(request): Json<MemberRequest>,
) -> Result<Json<RoomSnapshot>, ChatError> {
    let member_id = required_member(request.member_id)?;
    state
        .limiters
        .enforce(Purpose::ChatPresence, &member_id.to_string())
        .await?;

    let snapshot = state.members.touch_presence(member_id).await?;
    Ok(Json(snapshot))
}

/// Handler for POST /v1/chat/rooms/:story_id/leave
#[instrument(skip_all, name = "chat.handler.leave")]
pub async fn leave_room(
    State(state): State<Arc<AppState>>,
    Path(_story_id): Path<String>,
    Json(request): Json<MemberRequest>,
) -> Result<Json<RoomSnapshot>, ChatError> {
    let member_id = required_member(request.member_id)?;
    let snapshot = state.members.leave(member_id).await?;
    Ok(Json(snapshot))
}

/// Handler for GET /v1/chat/users/:user_id/rooms
#[instrument(skip_all, name = "chat.handler.user_rooms")]
pub async fn get_user_rooms(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<RoomSnapshot>>, ChatError> {
    let rooms = state.members.rooms_for_user(&user_id).await?;
    Ok(Json(rooms))
}

/// Client address for limiter keys: first `X-Forwarded-For` entry, then
/// `X-Real-IP`, then loopback.
pub fn client_ip(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(FALLBACK_CLIENT_IP)
        .to_string()
}

fn required(value: Option<String>, field: &str) -> Result<String, ChatError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ChatError::InvalidRequest(format!("{field} is required")))
}

pub(crate) fn required_member(member_id: Option<Uuid>) -> Result<Uuid, ChatError> {
    member_id.ok_or_else(|| ChatError::InvalidRequest("memberId is required".to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, HeaderValue::from_static(value));
        }
        headers
    }

    #[test]
    fn test_client_ip_prefers_first_forwarded_entry() {
        let h = headers(&[
            ("x-forwarded-for", "203.0.113.7, 10.0.0.1"),
            ("x-real-ip", "198.51.100.2"),
        ]);
        assert_eq!(client_ip(&h), "203.0.113.7");
    }

    #[test]
    fn test_client_ip_falls_back_to_real_ip() {
        let h = headers(&[("x-real-ip", " 198.51.100.2 ")]);
        assert_eq!(client_ip(&h), "198.51.100.2");
    }

    #[test]
    fn test_client_ip_defaults_to_loopback() {
        assert_eq!(client_ip(&HeaderMap::new()), "127.0.0.1");
        let h = headers(&[("x-forwarded-for", " ")]);
        assert_eq!(client_ip(&h), "127.0.0.1");
    }

    #[test]
    fn test_required_rejects_missing_and_blank() {
        assert!(matches!(
            required(None, "nickname"),
            Err(ChatError::InvalidRequest(_))
        ));
        assert!(matches!(
            required(Some("  ".to_string()), "nickname"),
            Err(ChatError::InvalidRequest(_))
        ));
        assert_eq!(required(Some("a".to_string()), "nickname").unwrap(), "a");
    }
}
