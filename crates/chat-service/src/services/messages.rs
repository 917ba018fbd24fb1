//! Message channel: append-only per-room log, pulled newest-first by cursor.

use super::ChatContext;
use crate::errors::ChatError;
use crate::models::{ChatMessage, MessageQuery, SendMessageResponse, MAX_MESSAGE_LENGTH};
use crate::observability::metrics::record_message;
use tracing::instrument;
use uuid::Uuid;

#[derive(Clone)]
pub struct MessageChannel {
    ctx: ChatContext,
}

impl MessageChannel {
    pub fn new(ctx: ChatContext) -> Self {
        Self { ctx }
    }

    /// Append a message from a live member. Sending refreshes the member's
    /// presence.
    ///
    /// The trimmed body is what gets stored.
    ///
    /// # Errors
    ///
    /// - `MessageFailed` - trimmed body empty or over the length limit
    /// - `MemberNotFound` - author unknown, left, or expired
    /// - `StoreUnavailable` - store unreachable or timed out
    #[instrument(skip_all, fields(member_id = %member_id))]
    pub async fn send(&self, member_id: Uuid, body: &str) -> Result<SendMessageResponse, ChatError> {
        let body = match validate_body(body) {
            Ok(body) => body,
            Err(e) => {
                record_message("rejected");
                return Err(e);
            }
        };

        let now = self.ctx.now();
        let live_since = self.ctx.live_since(now);

        let row = self
            .ctx
            .call(
                "insert_message",
                self.ctx
                    .store()
                    .insert_message(member_id, body, live_since, now),
            )
            .await
            .inspect_err(|_| record_message("error"))?;

        let Some(row) = row else {
            record_message("rejected");
            return Err(ChatError::MemberNotFound);
        };
        record_message("sent");

        tracing::debug!(
            target: "chat.service.messages",
            room_id = %row.room_id,
            message_id = row.id,
            "Message appended"
        );

        let room = self.ctx.snapshot_by_id(row.room_id, now).await?;
        Ok(SendMessageResponse {
            message: row.into(),
            room,
        })
    }

    /// Page of messages newest-first. `before` is an exclusive id cursor;
    /// the oldest id of one page is the `before` of the next.
    ///
    /// # Errors
    ///
    /// - `RoomNotFound` - no room with this id
    #[instrument(skip_all, fields(room_id = %room_id))]
    pub async fn fetch(
        &self,
        room_id: Uuid,
        query: MessageQuery,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        self.ctx
            .call("find_room", self.ctx.store().find_room(room_id))
            .await?
            .ok_or_else(|| ChatError::RoomNotFound(room_id.to_string()))?;

        let rows = self
            .ctx
            .call(
                "list_messages",
                self.ctx
                    .store()
                    .list_messages(room_id, query.before, query.effective_limit()),
            )
            .await?;

        Ok(rows.into_iter().map(ChatMessage::from).collect())
    }
}

fn validate_body(body: &str) -> Result<&str, ChatError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(ChatError::MessageFailed(
            "Message must not be empty".to_string(),
        ));
    }
    if trimmed.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(ChatError::MessageFailed(format!(
            "Message must be at most {MAX_MESSAGE_LENGTH} characters"
        )));
    }
    Ok(trimmed)
}
