//! Room registry.
//!
//! Exactly one room exists per story. Rooms are created on first access via
//! the store's insert-or-return upsert and are never deleted. Occupancy in a
//! snapshot is always recomputed from member rows.

use super::ChatContext;
use crate::errors::ChatError;
use crate::models::{RoomRow, RoomSnapshot, MAX_BATCH_STORY_IDS};
use std::collections::HashSet;
use tracing::instrument;

#[derive(Clone)]
pub struct RoomRegistry {
    ctx: ChatContext,
    default_capacity: i32,
}

impl RoomRegistry {
    pub fn new(ctx: ChatContext, default_capacity: i32) -> Self {
        Self {
            ctx,
            default_capacity,
        }
    }

    pub fn default_capacity(&self) -> i32 {
        self.default_capacity
    }

    /// Return the room for `story_id`, creating it with the default capacity
    /// if none exists. Concurrent callers for a new story all get the same room.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` - blank story id
    /// - `StoreUnavailable` - store unreachable or timed out (not retried)
    #[instrument(skip_all, fields(story_id = %story_id))]
    pub async fn ensure_room(&self, story_id: &str) -> Result<RoomRow, ChatError> {
        let story_id = validate_story_id(story_id)?;
        let now = self.ctx.now();

        let room = self
            .ctx
            .call(
                "upsert_room",
                self.ctx
                    .store()
                    .upsert_room(story_id, self.default_capacity, now),
            )
            .await?;

        tracing::debug!(
            target: "chat.service.rooms",
            story_id = %story_id,
            room_id = %room.id,
            "Room ensured"
        );

        Ok(room)
    }

    /// Current occupancy for `story_id` without creating anything.
    ///
    /// # Errors
    ///
    /// - `RoomNotFound` - no room has been created for the story yet
    #[instrument(skip_all, fields(story_id = %story_id))]
    pub async fn get_room_snapshot(&self, story_id: &str) -> Result<RoomSnapshot, ChatError> {
        let story_id = validate_story_id(story_id)?;
        let now = self.ctx.now();

        let room = self
            .ctx
            .call(
                "find_room_by_story",
                self.ctx.store().find_room_by_story(story_id),
            )
            .await?
            .ok_or_else(|| ChatError::RoomNotFound(story_id.to_string()))?;

        self.ctx.snapshot(&room, now).await
    }

    /// Ensure a room for every story id. Individual failures are logged and
    /// skipped so that one bad id does not fail a listing page.
    ///
    /// Returns the number of rooms ensured.
    #[instrument(skip_all, fields(count = story_ids.len()))]
    pub async fn ensure_rooms(&self, story_ids: &[String]) -> Result<usize, ChatError> {
        let story_ids = normalize_story_ids(story_ids)?;
        let mut ensured = 0;

        for story_id in &story_ids {
            match self.ensure_room(story_id).await {
                Ok(_) => ensured += 1,
                Err(e) => {
                    tracing::warn!(
                        target: "chat.service.rooms",
                        story_id = %story_id,
                        error = %e,
                        "Failed to ensure room in batch"
                    );
                }
            }
        }

        Ok(ensured)
    }

    /// Snapshots for each story that has a room, in input order with
    /// duplicates removed. Stories without a room are omitted.
    #[instrument(skip_all, fields(count = story_ids.len()))]
    pub async fn get_room_snapshots(
        &self,
        story_ids: &[String],
    ) -> Result<Vec<RoomSnapshot>, ChatError> {
        let story_ids = normalize_story_ids(story_ids)?;
        let mut snapshots = Vec::with_capacity(story_ids.len());

        for story_id in &story_ids {
            match self.get_room_snapshot(story_id).await {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(ChatError::RoomNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(snapshots)
    }
}

fn validate_story_id(story_id: &str) -> Result<&str, ChatError> {
    let trimmed = story_id.trim();
    if trimmed.is_empty() {
        return Err(ChatError::InvalidRequest(
            "story id is required".to_string(),
        ));
    }
    Ok(trimmed)
}

/// Trim, drop blanks, dedupe preserving order, and bound the batch size.
fn normalize_story_ids(story_ids: &[String]) -> Result<Vec<String>, ChatError> {
    let mut seen = HashSet::new();
    let ids: Vec<String> = story_ids
        .iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .filter(|id| seen.insert(id.to_string()))
        .map(str::to_string)
        .collect();

    if ids.len() > MAX_BATCH_STORY_IDS {
        return Err(ChatError::InvalidRequest(format!(
            "at most {MAX_BATCH_STORY_IDS} story ids per request"
        )));
    }

    Ok(ids)
}
