//! Message handlers.

use super::rooms::required_member;
use crate::errors::ChatError;
use crate::models::{
    ChatMessage, FetchMessagesParams, MessageQuery, SendMessageRequest, SendMessageResponse,
};
use crate::rate_limit::Purpose;
use crate::routes::AppState;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use std::sync::Arc;
use tracing::instrument;

/// Handler for GET /v1/chat/rooms/:story_id/messages
///
/// Uses `roomId` when given, otherwise the room of the story in the path.
/// Fetching never creates a room.
#[instrument(skip_all, name = "chat.handler.fetch_messages", fields(story_id = %story_id))]
pub async fn fetch_messages(
    State(state): State<Arc<AppState>>,
    Path(story_id): Path<String>,
    Query(params): Query<FetchMessagesParams>,
) -> Result<Json<Vec<ChatMessage>>, ChatError> {
    let room_id = match params.room_id {
        Some(room_id) => room_id,
        None => state.rooms.get_room_snapshot(&story_id).await?.room_id,
    };

    let query = MessageQuery {
        before: params.before,
        limit: params.limit,
    };
    let messages = state.messages.fetch(room_id, query).await?;
    Ok(Json(messages))
}

/// Handler for POST /v1/chat/rooms/:story_id/messages
///
/// Rate limited per member.
#[instrument(skip_all, name = "chat.handler.send_message")]
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(_story_id): Path<String>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, ChatError> {
    let member_id = required_member(request.member_id)?;
    let body = request
        .message
        .ok_or_else(|| ChatError::InvalidRequest("message is required".to_string()))?;

    state
        .limiters
        .enforce(Purpose::ChatSend, &member_id.to_string())
        .await?;

    let sent = state.messages.send(member_id, &body).await?;
    Ok(Json(sent))
}
