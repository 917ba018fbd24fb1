//! Service layer for the chat core.
//!
//! # Components
//!
//! - `room_registry` - one room per story, created lazily and race-safe
//! - `membership` - join / leave / presence under the capacity invariant
//! - `messages` - append-only message log with cursor pagination
//!
//! All three share a [`ChatContext`]: the store, the clock, the presence TTL
//! and the per-call store timeout. Every store call goes through
//! [`ChatContext::call`], which bounds it and records its latency.

pub mod membership;
pub mod messages;
pub mod room_registry;

pub use membership::MembershipManager;
pub use messages::MessageChannel;
pub use room_registry::RoomRegistry;

use crate::clock::Clock;
use crate::config::Config;
use crate::errors::ChatError;
use crate::models::{RoomRow, RoomSnapshot};
use crate::observability::metrics::record_store_operation;
use crate::repositories::ChatStore;
use chrono::{DateTime, TimeDelta, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Handles shared by the core services.
#[derive(Clone)]
pub struct ChatContext {
    store: Arc<dyn ChatStore>,
    clock: Arc<dyn Clock>,
    presence_ttl: TimeDelta,
    store_timeout: Duration,
}

impl ChatContext {
    pub fn new(
        store: Arc<dyn ChatStore>,
        clock: Arc<dyn Clock>,
        presence_ttl: Duration,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            presence_ttl: TimeDelta::from_std(presence_ttl).unwrap_or(TimeDelta::MAX),
            store_timeout,
        }
    }

    pub fn from_config(store: Arc<dyn ChatStore>, clock: Arc<dyn Clock>, config: &Config) -> Self {
        Self::new(
            store,
            clock,
            Duration::from_secs(config.presence_ttl_seconds),
            Duration::from_millis(config.store_timeout_ms),
        )
    }

    pub fn store(&self) -> &Arc<dyn ChatStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Oldest `last_seen_at` that still counts as live at `now`.
    pub(crate) fn live_since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.presence_ttl)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Run one store call under the configured timeout.
    ///
    /// A timeout is reported as `StoreUnavailable`; whatever the call may have
    /// done server-side is not assumed to have happened.
    pub(crate) async fn call<T, F>(&self, operation: &'static str, fut: F) -> Result<T, ChatError>
    where
        F: Future<Output = Result<T, ChatError>>,
    {
        let start = Instant::now();
        match tokio::time::timeout(self.store_timeout, fut).await {
            Ok(Ok(value)) => {
                record_store_operation(operation, "success", start.elapsed());
                Ok(value)
            }
            Ok(Err(e)) => {
                record_store_operation(operation, "error", start.elapsed());
                tracing::warn!(
                    target: "chat.service.store",
                    operation = operation,
                    error = %e,
                    "Store call failed"
                );
                Err(e)
            }
            Err(_) => {
                record_store_operation(operation, "timeout", start.elapsed());
                tracing::warn!(
                    target: "chat.service.store",
                    operation = operation,
                    timeout_ms = self.store_timeout.as_millis() as u64,
                    "Store call timed out"
                );
                Err(ChatError::StoreUnavailable(format!(
                    "{operation} timed out after {}ms",
                    self.store_timeout.as_millis()
                )))
            }
        }
    }

    /// Recompute the occupancy snapshot of `room` at `now`.
    pub(crate) async fn snapshot(
        &self,
        room: &RoomRow,
        now: DateTime<Utc>,
    ) -> Result<RoomSnapshot, ChatError> {
        let live_since = self.live_since(now);
        let active_members = self
            .call(
                "count_active_members",
                self.store.count_active_members(room.id, live_since),
            )
            .await?;
        let last_message_at = self
            .call("last_message_at", self.store.last_message_at(room.id))
            .await?;

        Ok(RoomSnapshot {
            room_id: room.id,
            story_id: room.story_id.clone(),
            capacity: room.capacity,
            active_members,
            last_message_at,
        })
    }

    /// Snapshot of the room with id `room_id`.
    pub(crate) async fn snapshot_by_id(
        &self,
        room_id: uuid::Uuid,
        now: DateTime<Utc>,
    ) -> Result<RoomSnapshot, ChatError> {
        let room = self
            .call("find_room", self.store.find_room(room_id))
            .await?
            .ok_or_else(|| ChatError::RoomNotFound(room_id.to_string()))?;
        self.snapshot(&room, now).await
    }
}
