//! Redis-backed window counter shared by every instance.
//!
//! # Connection Pattern
//!
//! `MultiplexedConnection` is cheap to clone and safe to use concurrently;
//! each hit clones it rather than locking a shared connection.

use super::lua_scripts;
use super::{CounterStore, WindowCount};
use crate::errors::ChatError;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use redis::aio::MultiplexedConnection;
use redis::{Client, Script};
use std::time::Duration;
use tracing::{error, instrument, warn};

#[derive(Clone)]
pub struct RedisCounterStore {
    connection: MultiplexedConnection,
    window_hit_script: Script,
}

impl RedisCounterStore {
    /// Connect, giving up after `connect_timeout`.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::StoreUnavailable` if the URL is invalid, the
    /// server refuses, or the timeout elapses.
    pub async fn connect(redis_url: &str, connect_timeout: Duration) -> Result<Self, ChatError> {
        let client = Client::open(redis_url).map_err(|e| {
            // Do NOT log redis_url, it may carry credentials.
            error!(
                target: "chat.rate_limit.redis",
                error = %e,
                "Failed to open Redis client"
            );
            ChatError::StoreUnavailable(format!("Failed to open Redis client: {e}"))
        })?;

        let connection =
            tokio::time::timeout(connect_timeout, client.get_multiplexed_async_connection())
                .await
                .map_err(|_| {
                    ChatError::StoreUnavailable(format!(
                        "Redis connect timed out after {}ms",
                        connect_timeout.as_millis()
                    ))
                })?
                .map_err(|e| {
                    ChatError::StoreUnavailable(format!("Failed to connect to Redis: {e}"))
                })?;

        Ok(Self {
            connection,
            window_hit_script: Script::new(lua_scripts::WINDOW_HIT),
        })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    #[instrument(skip_all)]
    async fn hit(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<WindowCount, ChatError> {
        let mut conn = self.connection.clone();
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);

        let (count, start_ms): (i64, i64) = self
            .window_hit_script
            .key(key)
            .arg(now.timestamp_millis())
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(
                    target: "chat.rate_limit.redis",
                    error = %e,
                    "Rate-limit counter hit failed"
                );
                ChatError::StoreUnavailable(format!("Rate-limit counter unavailable: {e}"))
            })?;

        let window_start = DateTime::<Utc>::from_timestamp_millis(start_ms).unwrap_or(now);
        let reset_at = TimeDelta::try_milliseconds(window_ms)
            .and_then(|w| window_start.checked_add_signed(w))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Ok(WindowCount {
            count: u64::try_from(count).unwrap_or(0),
            window_start,
            reset_at,
        })
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
