//! In-process chat store.
//!
//! All state sits behind a single async mutex, so every trait method is
//! trivially atomic with respect to every other. Suitable for development
//! without a database and for tests; it cannot be shared between processes.

use super::{ChatStore, SeatOutcome, SeatRequest};
use crate::errors::ChatError;
use crate::models::{MemberRow, MessageRow, RoomRow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Default)]
struct MemoryState {
    rooms: HashMap<Uuid, RoomRow>,
    rooms_by_story: HashMap<String, Uuid>,
    members: HashMap<Uuid, MemberRow>,
    /// Append-only, ids strictly increasing.
    messages: Vec<MessageRow>,
    next_message_id: i64,
}

impl MemoryState {
    fn live_members(&self, room_id: Uuid, live_since: DateTime<Utc>) -> i64 {
        self.members
            .values()
            .filter(|m| m.room_id == room_id && m.is_live(live_since))
            .count() as i64
    }
}

/// Chat store held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryChatStore {
    state: Mutex<MemoryState>,
    unavailable: AtomicBool,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the backing store going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), ChatError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ChatError::StoreUnavailable(
                "memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    /// Total member rows ever created in a room, left or not.
    pub async fn member_row_count(&self, room_id: Uuid) -> usize {
        let state = self.state.lock().await;
        state
            .members
            .values()
            .filter(|m| m.room_id == room_id)
            .count()
    }

    /// Total rooms created.
    pub async fn room_count(&self) -> usize {
        self.state.lock().await.rooms.len()
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn upsert_room(
        &self,
        story_id: &str,
        capacity: i32,
        now: DateTime<Utc>,
    ) -> Result<RoomRow, ChatError> {
        self.check_available()?;
        let mut state = self.state.lock().await;

        if let Some(room) = state
            .rooms_by_story
            .get(story_id)
            .and_then(|id| state.rooms.get(id))
        {
            return Ok(room.clone());
        }

        let room = RoomRow {
            id: Uuid::new_v4(),
            story_id: story_id.to_string(),
            capacity,
            created_at: now,
        };
        state.rooms_by_story.insert(story_id.to_string(), room.id);
        state.rooms.insert(room.id, room.clone());
        Ok(room)
    }

    async fn find_room_by_story(&self, story_id: &str) -> Result<Option<RoomRow>, ChatError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .rooms_by_story
            .get(story_id)
            .and_then(|id| state.rooms.get(id))
            .cloned())
    }

    async fn find_room(&self, room_id: Uuid) -> Result<Option<RoomRow>, ChatError> {
        self.check_available()?;
        Ok(self.state.lock().await.rooms.get(&room_id).cloned())
    }

    async fn count_active_members(
        &self,
        room_id: Uuid,
        live_since: DateTime<Utc>,
    ) -> Result<i64, ChatError> {
        self.check_available()?;
        Ok(self.state.lock().await.live_members(room_id, live_since))
    }

    async fn last_message_at(&self, room_id: Uuid) -> Result<Option<DateTime<Utc>>, ChatError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .messages
            .iter()
            .rev()
            .find(|m| m.room_id == room_id)
            .map(|m| m.created_at))
    }

    async fn reserve_seat(
        &self,
        request: &SeatRequest,
        live_since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<SeatOutcome, ChatError> {
        self.check_available()?;
        let mut state = self.state.lock().await;

        let Some(capacity) = state.rooms.get(&request.room_id).map(|r| r.capacity) else {
            return Ok(SeatOutcome::RoomMissing);
        };

        let open_seat = state
            .members
            .values()
            .find(|m| {
                m.room_id == request.room_id
                    && m.device_hash == request.device_hash
                    && m.left_at.is_none()
            })
            .cloned();

        if let Some(existing) = open_seat {
            if existing.last_seen_at >= live_since {
                return Ok(if existing.session_id == request.session_id {
                    SeatOutcome::Existing(existing)
                } else {
                    SeatOutcome::Conflict
                });
            }
            // Stale seat for this device: close it before taking a new one.
            if let Some(stale) = state.members.get_mut(&existing.id) {
                stale.left_at = Some(now);
            }
        }

        let active_members = state.live_members(request.room_id, live_since);
        if active_members >= i64::from(capacity) {
            return Ok(SeatOutcome::Full {
                capacity,
                active_members,
            });
        }

        let member = MemberRow {
            id: Uuid::new_v4(),
            room_id: request.room_id,
            device_hash: request.device_hash.clone(),
            nickname: request.nickname.clone(),
            session_id: request.session_id.clone(),
            user_id: request.user_id.clone(),
            joined_at: now,
            last_seen_at: now,
            left_at: None,
        };
        state.members.insert(member.id, member.clone());
        Ok(SeatOutcome::Reserved(member))
    }

    async fn find_member(&self, member_id: Uuid) -> Result<Option<MemberRow>, ChatError> {
        self.check_available()?;
        Ok(self.state.lock().await.members.get(&member_id).cloned())
    }

    async fn mark_left(
        &self,
        member_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<MemberRow>, ChatError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        Ok(state.members.get_mut(&member_id).map(|member| {
            member.left_at.get_or_insert(now);
            member.clone()
        }))
    }

    async fn touch_member(
        &self,
        member_id: Uuid,
        live_since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<MemberRow>, ChatError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        Ok(state
            .members
            .get_mut(&member_id)
            .filter(|m| m.is_live(live_since))
            .map(|member| {
                member.last_seen_at = now;
                member.clone()
            }))
    }

    async fn insert_message(
        &self,
        member_id: Uuid,
        body: &str,
        live_since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<MessageRow>, ChatError> {
        self.check_available()?;
        let mut state = self.state.lock().await;

        let Some(member) = state
            .members
            .get_mut(&member_id)
            .filter(|m| m.is_live(live_since))
        else {
            return Ok(None);
        };
        member.last_seen_at = now;
        let (room_id, author_nick) = (member.room_id, member.nickname.clone());

        state.next_message_id += 1;
        let message = MessageRow {
            id: state.next_message_id,
            room_id,
            member_id,
            author_nick,
            body: body.to_string(),
            created_at: now,
        };
        state.messages.push(message.clone());
        Ok(Some(message))
    }

    async fn list_messages(
        &self,
        room_id: Uuid,
        before: Option<i64>,
        limit: u32,
    ) -> Result<Vec<MessageRow>, ChatError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .messages
            .iter()
            .rev()
            .filter(|m| m.room_id == room_id && before.map_or(true, |cursor| m.id < cursor))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn rooms_for_user(&self, user_id: &str) -> Result<Vec<RoomRow>, ChatError> {
        self.check_available()?;
        let state = self.state.lock().await;

        let mut memberships: Vec<&MemberRow> = state
            .members
            .values()
            .filter(|m| m.left_at.is_none() && m.user_id.as_deref() == Some(user_id))
            .collect();
        memberships.sort_by(|a, b| b.last_seen_at.cmp(&a.last_seen_at));

        let mut seen = HashSet::new();
        Ok(memberships
            .into_iter()
            .filter(|m| seen.insert(m.room_id))
            .filter_map(|m| state.rooms.get(&m.room_id).cloned())
            .collect())
    }

    async fn ping(&self) -> Result<(), ChatError> {
        self.check_available()
    }
}
