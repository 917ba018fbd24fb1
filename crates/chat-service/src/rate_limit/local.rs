//! Single-process window counter.
//!
//! Only sees traffic hitting this process, so it under-counts behind more
//! than one instance. Used in development and when no Redis is configured
//! outside production. Expired keys are dropped by
//! [`LocalCounterStore::sweep_expired`], driven from
//! [`crate::tasks::limiter_sweep`].

use super::{CounterStore, WindowCount};
use crate::errors::ChatError;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
struct LocalWindow {
    count: u64,
    window_start: DateTime<Utc>,
    reset_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct LocalCounterStore {
    windows: Mutex<HashMap<String, LocalWindow>>,
}

impl LocalCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every window whose reset time has passed. Returns how many.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let before = windows.len();
        windows.retain(|_, w| w.reset_at > now);
        before - windows.len()
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CounterStore for LocalCounterStore {
    async fn hit(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<WindowCount, ChatError> {
        let window = TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX);
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);

        let fresh = || LocalWindow {
            count: 0,
            window_start: now,
            reset_at: now.checked_add_signed(window).unwrap_or(DateTime::<Utc>::MAX_UTC),
        };

        let entry = windows.entry(key.to_string()).or_insert_with(fresh);
        if now >= entry.reset_at {
            *entry = fresh();
        }
        entry.count = entry.count.saturating_add(1);

        Ok(WindowCount {
            count: entry.count,
            window_start: entry.window_start,
            reset_at: entry.reset_at,
        })
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}
