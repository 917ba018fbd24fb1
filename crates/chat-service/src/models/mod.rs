//! Chat service models.
//!
//! Row types mirror the relational schema in `migrations/`. Response types
//! are the payloads handed up to the HTTP boundary, serialized in camelCase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum message body length, in characters, after trimming.
pub const MAX_MESSAGE_LENGTH: usize = 500;

/// Maximum nickname length, in characters, after trimming.
pub const MAX_NICKNAME_LENGTH: usize = 20;

/// Page size used when a fetch does not specify one.
pub const DEFAULT_MESSAGE_PAGE_SIZE: u32 = 50;

/// Upper bound on a single page of messages.
pub const MAX_MESSAGE_PAGE_SIZE: u32 = 100;

/// Upper bound on story ids in one batch room-state request.
pub const MAX_BATCH_STORY_IDS: usize = 50;

// ============================================================================
// Stored rows
// ============================================================================

/// Chat room bound 1:1 to a story.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RoomRow {
    pub id: Uuid,
    pub story_id: String,
    pub capacity: i32,
    pub created_at: DateTime<Utc>,
}

/// One seat-holding participant. Never hard-deleted.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct MemberRow {
    pub id: Uuid,
    pub room_id: Uuid,
    pub device_hash: String,
    pub nickname: String,
    pub session_id: String,
    pub user_id: Option<String>,
    pub joined_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

impl MemberRow {
    /// True when the member has not left and was seen at or after `live_since`.
    pub fn is_live(&self, live_since: DateTime<Utc>) -> bool {
        self.left_at.is_none() && self.last_seen_at >= live_since
    }
}

/// Immutable chat message. `id` is the pagination cursor.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct MessageRow {
    pub id: i64,
    pub room_id: Uuid,
    pub member_id: Uuid,
    pub author_nick: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Core results
// ============================================================================

/// Current occupancy of a room.
///
/// `active_members` is recomputed from member rows on every read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub room_id: Uuid,
    pub story_id: String,
    pub capacity: i32,
    pub active_members: i64,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// Result of a successful join: the seat plus the room state at join time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub member_id: Uuid,
    pub session_id: String,
    pub nickname: String,
    pub joined_at: DateTime<Utc>,
    #[serde(flatten)]
    pub room: RoomSnapshot,
}

/// Message as returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: i64,
    pub room_id: Uuid,
    pub member_id: Uuid,
    pub author_nick: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl From<MessageRow> for ChatMessage {
    fn from(row: MessageRow) -> Self {
        Self {
            id: row.id,
            room_id: row.room_id,
            member_id: row.member_id,
            author_nick: row.author_nick,
            body: row.body,
            created_at: row.created_at,
        }
    }
}

/// Cursor query for [`crate::services::MessageChannel::fetch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageQuery {
    /// Exclusive upper bound on message id.
    pub before: Option<i64>,
    pub limit: Option<u32>,
}

impl MessageQuery {
    /// Effective page size: default when absent, clamped to `1..=MAX`.
    pub fn effective_limit(&self) -> u32 {
        self.limit
            .unwrap_or(DEFAULT_MESSAGE_PAGE_SIZE)
            .clamp(1, MAX_MESSAGE_PAGE_SIZE)
    }
}

// ============================================================================
// HTTP request/response bodies
// ============================================================================

/// Body of `POST /v1/chat/rooms/{story_id}/join`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub device_hash: Option<String>,
    pub nickname: Option<String>,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
}

/// Body of presence and leave requests.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRequest {
    pub member_id: Option<Uuid>,
}

/// Body of `POST /v1/chat/rooms/{story_id}/messages`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub member_id: Option<Uuid>,
    pub message: Option<String>,
}

/// Response of a successful send: the stored message and the room state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub message: ChatMessage,
    pub room: RoomSnapshot,
}

/// Query of `GET /v1/chat/rooms/{story_id}/messages`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchMessagesParams {
    pub room_id: Option<Uuid>,
    pub before: Option<i64>,
    pub limit: Option<u32>,
}

/// Query of `GET /v1/chat/rooms/states`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStatesParams {
    pub story_ids: Option<String>,
}

/// Readiness probe response.
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub store: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
