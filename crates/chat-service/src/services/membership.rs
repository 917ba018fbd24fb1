//! Membership manager.
//!
//! Per `(room, device)` a seat moves absent -> active -> (leave | TTL expiry)
//! -> absent. Expiry is never written back; it is derived from
//! `last_seen_at` at read time. The only operation that can raise occupancy
//! is [`MembershipManager::join`], and it does so through the store's atomic
//! seat reservation.

use super::{ChatContext, RoomRegistry};
use crate::errors::ChatError;
use crate::models::{Membership, MemberRow, RoomSnapshot, MAX_NICKNAME_LENGTH};
use crate::observability::metrics::record_join;
use crate::repositories::{SeatOutcome, SeatRequest};
use tracing::instrument;
use uuid::Uuid;

/// Caller-supplied identity for a join.
#[derive(Debug, Clone)]
pub struct JoinParams {
    pub device_hash: String,
    pub nickname: String,
    pub session_id: String,
    pub user_id: Option<String>,
}

impl JoinParams {
    /// Trim and check the fields; produces the seat request for `room_id`.
    fn into_seat_request(self, room_id: Uuid) -> Result<SeatRequest, ChatError> {
        let device_hash = self.device_hash.trim().to_string();
        if device_hash.is_empty() {
            return Err(ChatError::InvalidRequest(
                "deviceHash is required".to_string(),
            ));
        }

        let session_id = self.session_id.trim().to_string();
        if session_id.is_empty() {
            return Err(ChatError::InvalidRequest(
                "sessionId is required".to_string(),
            ));
        }

        let nickname = self.nickname.trim().to_string();
        let nickname_len = nickname.chars().count();
        if nickname_len == 0 || nickname_len > MAX_NICKNAME_LENGTH {
            return Err(ChatError::InvalidRequest(format!(
                "nickname must be 1 to {MAX_NICKNAME_LENGTH} characters"
            )));
        }

        let user_id = self
            .user_id
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());

        Ok(SeatRequest {
            room_id,
            device_hash,
            nickname,
            session_id,
            user_id,
        })
    }
}

#[derive(Clone)]
pub struct MembershipManager {
    ctx: ChatContext,
}

impl MembershipManager {
    pub fn new(ctx: ChatContext) -> Self {
        Self { ctx }
    }

    /// Take a seat in `room_id`.
    ///
    /// A repeat join from a device that still holds a live seat under the same
    /// session returns that seat unchanged. A device whose seat has expired
    /// gets a fresh one.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` - blank device hash or session, bad nickname
    /// - `RoomNotFound` - no room with this id
    /// - `MemberConflict` - the device holds a live seat under another session
    /// - `RoomFull` - live members already at capacity
    /// - `StoreUnavailable` - store unreachable or timed out; no seat is
    ///   assumed to have been reserved
    #[instrument(skip_all, fields(room_id = %room_id))]
    pub async fn join(&self, room_id: Uuid, params: JoinParams) -> Result<Membership, ChatError> {
        let request = params.into_seat_request(room_id)?;
        let now = self.ctx.now();
        let live_since = self.ctx.live_since(now);

        let outcome = self
            .ctx
            .call(
                "reserve_seat",
                self.ctx.store().reserve_seat(&request, live_since, now),
            )
            .await
            .inspect_err(|_| record_join("error"))?;

        let member = match outcome {
            SeatOutcome::Reserved(member) => {
                record_join("joined");
                tracing::info!(
                    target: "chat.service.membership",
                    room_id = %room_id,
                    member_id = %member.id,
                    "Member joined"
                );
                member
            }
            SeatOutcome::Existing(member) => {
                record_join("rejoined");
                tracing::debug!(
                    target: "chat.service.membership",
                    room_id = %room_id,
                    member_id = %member.id,
                    "Idempotent rejoin"
                );
                member
            }
            SeatOutcome::Conflict => {
                record_join("conflict");
                return Err(ChatError::MemberConflict);
            }
            SeatOutcome::Full {
                capacity,
                active_members,
            } => {
                record_join("full");
                tracing::info!(
                    target: "chat.service.membership",
                    room_id = %room_id,
                    capacity = capacity,
                    active_members = active_members,
                    "Join rejected, room full"
                );
                return Err(ChatError::RoomFull {
                    capacity,
                    active_members,
                });
            }
            SeatOutcome::RoomMissing => {
                record_join("error");
                return Err(ChatError::RoomNotFound(room_id.to_string()));
            }
        };

        let room = self.ctx.snapshot_by_id(room_id, now).await?;
        Ok(membership(member, room))
    }

    /// Ensure the story's room and join it.
    ///
    /// If the join reports the room missing, the room is ensured again and the
    /// join retried exactly once. A second `RoomNotFound` is returned as is.
    #[instrument(skip_all, fields(story_id = %story_id))]
    pub async fn join_story(
        &self,
        registry: &RoomRegistry,
        story_id: &str,
        params: JoinParams,
    ) -> Result<Membership, ChatError> {
        let room = registry.ensure_room(story_id).await?;

        match self.join(room.id, params.clone()).await {
            Err(ChatError::RoomNotFound(_)) => {
                tracing::warn!(
                    target: "chat.service.membership",
                    story_id = %story_id,
                    "Room missing on join, ensuring and retrying once"
                );
                let room = registry.ensure_room(story_id).await?;
                self.join(room.id, params).await
            }
            result => result,
        }
    }

    /// Give up a seat. Leaving twice is not an error.
    ///
    /// # Errors
    ///
    /// - `MemberNotFound` - no member with this id
    #[instrument(skip_all, fields(member_id = %member_id))]
    pub async fn leave(&self, member_id: Uuid) -> Result<RoomSnapshot, ChatError> {
        let now = self.ctx.now();

        let member = self
            .ctx
            .call("mark_left", self.ctx.store().mark_left(member_id, now))
            .await?
            .ok_or(ChatError::MemberNotFound)?;

        tracing::info!(
            target: "chat.service.membership",
            room_id = %member.room_id,
            member_id = %member_id,
            "Member left"
        );

        self.ctx.snapshot_by_id(member.room_id, now).await
    }

    /// Refresh a member's liveness.
    ///
    /// # Errors
    ///
    /// - `MemberNotFound` - unknown, left, or already past the presence TTL.
    ///   An expired member must rejoin so the capacity check runs again.
    #[instrument(skip_all, fields(member_id = %member_id))]
    pub async fn touch_presence(&self, member_id: Uuid) -> Result<RoomSnapshot, ChatError> {
        let now = self.ctx.now();
        let live_since = self.ctx.live_since(now);

        let member = self
            .ctx
            .call(
                "touch_member",
                self.ctx.store().touch_member(member_id, live_since, now),
            )
            .await?
            .ok_or(ChatError::MemberNotFound)?;

        self.ctx.snapshot_by_id(member.room_id, now).await
    }

    /// Snapshots of the rooms a signed-in user has not left, most recently
    /// seen first.
    #[instrument(skip_all)]
    pub async fn rooms_for_user(&self, user_id: &str) -> Result<Vec<RoomSnapshot>, ChatError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(ChatError::InvalidRequest("userId is required".to_string()));
        }

        let now = self.ctx.now();
        let rooms = self
            .ctx
            .call("rooms_for_user", self.ctx.store().rooms_for_user(user_id))
            .await?;

        let mut snapshots = Vec::with_capacity(rooms.len());
        for room in &rooms {
            snapshots.push(self.ctx.snapshot(room, now).await?);
        }
        Ok(snapshots)
    }
}

fn membership(member: MemberRow, room: RoomSnapshot) -> Membership {
    Membership {
        member_id: member.id,
        session_id: member.session_id,
        nickname: member.nickname,
        joined_at: member.joined_at,
        room,
    }
}
