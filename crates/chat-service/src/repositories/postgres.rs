//! PostgreSQL chat store.
//!
//! Schema lives in `migrations/`. All timestamps are bound from the injected
//! clock rather than `NOW()` so that liveness is evaluated against the same
//! instant the service layer used to compute `live_since`.
//!
//! # Concurrency
//!
//! - Room creation is a single `INSERT .. ON CONFLICT (story_id) DO UPDATE ..
//!   RETURNING`, so concurrent creators all receive the same row.
//! - Seat reservation takes a row lock on the room (`SELECT .. FOR UPDATE`)
//!   for the duration of its transaction. Reservations on one room are
//!   therefore serialized, and the live count read inside the transaction
//!   cannot be raced past capacity.
//! - A partial unique index on `(room_id, device_hash) WHERE left_at IS NULL`
//!   backs the one-open-seat-per-device rule at the schema level.

use super::{ChatStore, SeatOutcome, SeatRequest};
use crate::errors::ChatError;
use crate::models::{MemberRow, MessageRow, RoomRow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

/// Chat store backed by a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgChatStore {
    pool: PgPool,
}

impl PgChatStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ChatStore for PgChatStore {
    #[instrument(skip_all, fields(story_id = %story_id))]
    async fn upsert_room(
        &self,
        story_id: &str,
        capacity: i32,
        now: DateTime<Utc>,
    ) -> Result<RoomRow, ChatError> {
        // DO UPDATE (not DO NOTHING) so RETURNING yields the existing row too.
        let room: RoomRow = sqlx::query_as(
            r#"
            INSERT INTO chat_rooms (id, story_id, capacity, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (story_id) DO UPDATE
            SET story_id = EXCLUDED.story_id
            RETURNING id, story_id, capacity, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(story_id)
        .bind(capacity)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(room)
    }

    #[instrument(skip_all, fields(story_id = %story_id))]
    async fn find_room_by_story(&self, story_id: &str) -> Result<Option<RoomRow>, ChatError> {
        let room: Option<RoomRow> = sqlx::query_as(
            r#"
            SELECT id, story_id, capacity, created_at
            FROM chat_rooms
            WHERE story_id = $1
            "#,
        )
        .bind(story_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(room)
    }

    #[instrument(skip_all, fields(room_id = %room_id))]
    async fn find_room(&self, room_id: Uuid) -> Result<Option<RoomRow>, ChatError> {
        let room: Option<RoomRow> = sqlx::query_as(
            r#"
            SELECT id, story_id, capacity, created_at
            FROM chat_rooms
            WHERE id = $1
            "#,
        )
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(room)
    }

    #[instrument(skip_all, fields(room_id = %room_id))]
    async fn count_active_members(
        &self,
        room_id: Uuid,
        live_since: DateTime<Utc>,
    ) -> Result<i64, ChatError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM chat_members
            WHERE room_id = $1
              AND left_at IS NULL
              AND last_seen_at >= $2
            "#,
        )
        .bind(room_id)
        .bind(live_since)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    #[instrument(skip_all, fields(room_id = %room_id))]
    async fn last_message_at(&self, room_id: Uuid) -> Result<Option<DateTime<Utc>>, ChatError> {
        let last: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            SELECT MAX(created_at)
            FROM chat_messages
            WHERE room_id = $1
            "#,
        )
        .bind(room_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(last)
    }

    #[instrument(skip_all, fields(room_id = %request.room_id))]
    async fn reserve_seat(
        &self,
        request: &SeatRequest,
        live_since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<SeatOutcome, ChatError> {
        let mut tx = self.pool.begin().await?;

        // Row lock on the room serializes every reservation for it.
        let capacity: Option<i32> = sqlx::query_scalar(
            r#"
            SELECT capacity
            FROM chat_rooms
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(request.room_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(capacity) = capacity else {
            tx.rollback().await?;
            return Ok(SeatOutcome::RoomMissing);
        };

        let open_seat: Option<MemberRow> = sqlx::query_as(
            r#"
            SELECT id, room_id, device_hash, nickname, session_id, user_id,
                   joined_at, last_seen_at, left_at
            FROM chat_members
            WHERE room_id = $1
              AND device_hash = $2
              AND left_at IS NULL
            "#,
        )
        .bind(request.room_id)
        .bind(&request.device_hash)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(existing) = open_seat {
            if existing.last_seen_at >= live_since {
                tx.rollback().await?;
                return Ok(if existing.session_id == request.session_id {
                    SeatOutcome::Existing(existing)
                } else {
                    SeatOutcome::Conflict
                });
            }

            sqlx::query(
                r#"
                UPDATE chat_members
                SET left_at = $2
                WHERE id = $1
                "#,
            )
            .bind(existing.id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            tracing::debug!(
                target: "chat.repository.members",
                member_id = %existing.id,
                "Closed stale seat before rejoin"
            );
        }

        let active_members: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM chat_members
            WHERE room_id = $1
              AND left_at IS NULL
              AND last_seen_at >= $2
            "#,
        )
        .bind(request.room_id)
        .bind(live_since)
        .fetch_one(&mut *tx)
        .await?;

        if active_members >= i64::from(capacity) {
            tx.rollback().await?;
            return Ok(SeatOutcome::Full {
                capacity,
                active_members,
            });
        }

        let member: MemberRow = sqlx::query_as(
            r#"
            INSERT INTO chat_members
                (id, room_id, device_hash, nickname, session_id, user_id,
                 joined_at, last_seen_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            RETURNING id, room_id, device_hash, nickname, session_id, user_id,
                      joined_at, last_seen_at, left_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.room_id)
        .bind(&request.device_hash)
        .bind(&request.nickname)
        .bind(&request.session_id)
        .bind(request.user_id.as_deref())
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(SeatOutcome::Reserved(member))
    }

    #[instrument(skip_all, fields(member_id = %member_id))]
    async fn find_member(&self, member_id: Uuid) -> Result<Option<MemberRow>, ChatError> {
        let member: Option<MemberRow> = sqlx::query_as(
            r#"
            SELECT id, room_id, device_hash, nickname, session_id, user_id,
                   joined_at, last_seen_at, left_at
            FROM chat_members
            WHERE id = $1
            "#,
        )
        .bind(member_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(member)
    }

    #[instrument(skip_all, fields(member_id = %member_id))]
    async fn mark_left(
        &self,
        member_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<MemberRow>, ChatError> {
        let member: Option<MemberRow> = sqlx::query_as(
            r#"
            UPDATE chat_members
            SET left_at = COALESCE(left_at, $2)
            WHERE id = $1
            RETURNING id, room_id, device_hash, nickname, session_id, user_id,
                      joined_at, last_seen_at, left_at
            "#,
        )
        .bind(member_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(member)
    }

    #[instrument(skip_all, fields(member_id = %member_id))]
    async fn touch_member(
        &self,
        member_id: Uuid,
        live_since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<MemberRow>, ChatError> {
        let member: Option<MemberRow> = sqlx::query_as(
            r#"
            UPDATE chat_members
            SET last_seen_at = $3
            WHERE id = $1
              AND left_at IS NULL
              AND last_seen_at >= $2
            RETURNING id, room_id, device_hash, nickname, session_id, user_id,
                      joined_at, last_seen_at, left_at
            "#,
        )
        .bind(member_id)
        .bind(live_since)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(member)
    }

    #[instrument(skip_all, fields(member_id = %member_id))]
    async fn insert_message(
        &self,
        member_id: Uuid,
        body: &str,
        live_since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<MessageRow>, ChatError> {
        // Presence refresh and append happen in one statement; no row comes
        // back when the author is absent, left or expired.
        let message: Option<MessageRow> = sqlx::query_as(
            r#"
            WITH author AS (
                UPDATE chat_members
                SET last_seen_at = $4
                WHERE id = $1
                  AND left_at IS NULL
                  AND last_seen_at >= $3
                RETURNING id, room_id, nickname
            )
            INSERT INTO chat_messages (room_id, member_id, author_nick, body, created_at)
            SELECT room_id, id, nickname, $2, $4
            FROM author
            RETURNING id, room_id, member_id, author_nick, body, created_at
            "#,
        )
        .bind(member_id)
        .bind(body)
        .bind(live_since)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(message)
    }

    #[instrument(skip_all, fields(room_id = %room_id, before = ?before, limit = limit))]
    async fn list_messages(
        &self,
        room_id: Uuid,
        before: Option<i64>,
        limit: u32,
    ) -> Result<Vec<MessageRow>, ChatError> {
        let messages: Vec<MessageRow> = sqlx::query_as(
            r#"
            SELECT id, room_id, member_id, author_nick, body, created_at
            FROM chat_messages
            WHERE room_id = $1
              AND ($2::BIGINT IS NULL OR id < $2)
            ORDER BY id DESC
            LIMIT $3
            "#,
        )
        .bind(room_id)
        .bind(before)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    #[instrument(skip_all)]
    async fn rooms_for_user(&self, user_id: &str) -> Result<Vec<RoomRow>, ChatError> {
        let rooms: Vec<RoomRow> = sqlx::query_as(
            r#"
            SELECT r.id, r.story_id, r.capacity, r.created_at
            FROM chat_rooms r
            JOIN (
                SELECT room_id, MAX(last_seen_at) AS last_seen_at
                FROM chat_members
                WHERE user_id = $1
                  AND left_at IS NULL
                GROUP BY room_id
            ) m ON m.room_id = r.id
            ORDER BY m.last_seen_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rooms)
    }

    async fn ping(&self) -> Result<(), ChatError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
