//! Repository layer for the chat service.
//!
//! [`ChatStore`] is the persistence seam. It exposes the primitives the core
//! needs from its backing store and nothing more:
//!
//! - idempotent room upsert keyed by `story_id`
//! - an atomic "check device, count live seats, insert if under capacity"
//!   reservation, serialized per room
//! - single-row member updates (leave, touch) and message append
//! - occupancy counting and cursor pagination
//!
//! Two implementations exist: [`PgChatStore`] for PostgreSQL and
//! [`MemoryChatStore`] for single-process development and tests.

pub mod memory;
pub mod postgres;

pub use memory::MemoryChatStore;
pub use postgres::PgChatStore;

use crate::errors::ChatError;
use crate::models::{MemberRow, MessageRow, RoomRow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Seat reservation request for one device in one room.
#[derive(Debug, Clone)]
pub struct SeatRequest {
    pub room_id: Uuid,
    pub device_hash: String,
    pub nickname: String,
    pub session_id: String,
    pub user_id: Option<String>,
}

/// Outcome of [`ChatStore::reserve_seat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeatOutcome {
    /// A new member row was inserted.
    Reserved(MemberRow),
    /// The device already holds a live seat with the same session.
    Existing(MemberRow),
    /// The device holds a live seat under a different session.
    Conflict,
    /// The room has no free seat.
    Full { capacity: i32, active_members: i64 },
    /// No room with this id exists.
    RoomMissing,
}

/// Persistence operations used by the chat core.
///
/// Liveness is always passed in as `live_since` (`now - PRESENCE_TTL`):
/// a member counts toward occupancy iff `left_at IS NULL AND last_seen_at >= live_since`.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Insert a room for `story_id`, or return the existing one.
    ///
    /// Must be a single atomic insert-or-return against the unique constraint
    /// on `story_id`; concurrent callers all observe the same row.
    async fn upsert_room(
        &self,
        story_id: &str,
        capacity: i32,
        now: DateTime<Utc>,
    ) -> Result<RoomRow, ChatError>;

    async fn find_room_by_story(&self, story_id: &str) -> Result<Option<RoomRow>, ChatError>;

    async fn find_room(&self, room_id: Uuid) -> Result<Option<RoomRow>, ChatError>;

    /// Number of live members in a room.
    async fn count_active_members(
        &self,
        room_id: Uuid,
        live_since: DateTime<Utc>,
    ) -> Result<i64, ChatError>;

    /// Creation time of the newest message in a room.
    async fn last_message_at(&self, room_id: Uuid) -> Result<Option<DateTime<Utc>>, ChatError>;

    /// Atomically reserve a seat.
    ///
    /// In one step serialized against other reservations on the same room:
    /// 1. a live row for the device with the same session is returned as
    ///    `Existing`, with a different session as `Conflict`
    /// 2. a stale (TTL-expired, not left) row for the device is closed
    /// 3. live members are counted; at capacity yields `Full`
    /// 4. a new row with `joined_at = last_seen_at = now` is inserted
    async fn reserve_seat(
        &self,
        request: &SeatRequest,
        live_since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<SeatOutcome, ChatError>;

    async fn find_member(&self, member_id: Uuid) -> Result<Option<MemberRow>, ChatError>;

    /// Set `left_at = now` unless already set. `None` if the member does not exist.
    async fn mark_left(
        &self,
        member_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<MemberRow>, ChatError>;

    /// Set `last_seen_at = now` for a live member. `None` if absent, left or expired.
    async fn touch_member(
        &self,
        member_id: Uuid,
        live_since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<MemberRow>, ChatError>;

    /// Append a message for a live member and refresh its `last_seen_at`.
    /// `None` if the member is absent, left or expired.
    async fn insert_message(
        &self,
        member_id: Uuid,
        body: &str,
        live_since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<MessageRow>, ChatError>;

    /// Newest-first page of messages with `id < before` (when given).
    async fn list_messages(
        &self,
        room_id: Uuid,
        before: Option<i64>,
        limit: u32,
    ) -> Result<Vec<MessageRow>, ChatError>;

    /// Rooms in which `user_id` holds a membership that has not been left,
    /// most recently seen first.
    async fn rooms_for_user(&self, user_id: &str) -> Result<Vec<RoomRow>, ChatError>;

    /// Connectivity check for readiness probes.
    async fn ping(&self) -> Result<(), ChatError>;
}
