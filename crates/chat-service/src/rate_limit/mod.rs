//! Rate limiting for every mutating endpoint.
//!
//! Each [`Purpose`] has its own key prefix (`ratelimit:<purpose>`) and its own
//! [`RateLimitPolicy`]. A key `ratelimit:<purpose>:<identifier>` counts hits
//! in a window: the first hit opens a window of `policy.window`, hits inside
//! it increment the count, and a hit at or after `reset_at` opens a new window
//! with count 1. A hit is allowed while `count <= limit`.
//!
//! # Backends
//!
//! - [`RedisCounterStore`] - shared across instances, required in production
//! - [`LocalCounterStore`] - per-process, development only
//! - fail-closed - production without a reachable Redis; every check denied
//!
//! Falling back to the local counter in production is never done: behind
//! several instances it would under-count every key.

pub mod distributed;
pub mod local;
pub mod lua_scripts;

pub use distributed::RedisCounterStore;
pub use local::LocalCounterStore;

use crate::clock::Clock;
use crate::config::{Config, Environment};
use crate::errors::ChatError;
use crate::observability::metrics::record_rate_limit_decision;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use secrecy::ExposeSecret;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Bound on the Redis connect attempt at startup.
pub const REDIS_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Counter state after one hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Hits in the current window, including this one.
    pub count: u64,
    pub window_start: DateTime<Utc>,
    /// `window_start + window`.
    pub reset_at: DateTime<Utc>,
}

/// Atomic per-key window counter.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Count one hit for `key` at `now` and return the window state.
    async fn hit(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<WindowCount, ChatError>;

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;
}

/// What a limiter is guarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
    ChatJoin,
    ChatSend,
    ChatPresence,
    Comment,
    Vote,
    AdminAuth,
    Curious,
}

impl Purpose {
    pub fn as_str(self) -> &'static str {
        match self {
            Purpose::ChatJoin => "chat-join",
            Purpose::ChatSend => "chat-send",
            Purpose::ChatPresence => "chat-presence",
            Purpose::Comment => "comment",
            Purpose::Vote => "vote",
            Purpose::AdminAuth => "admin-auth",
            Purpose::Curious => "curious",
        }
    }

    /// Counter key for `identifier` under this purpose.
    pub fn key(self, identifier: &str) -> String {
        format!("ratelimit:{}:{identifier}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub limit: u32,
    pub window: Duration,
}

impl RateLimitPolicy {
    pub const fn per_minute(limit: u32) -> Self {
        Self {
            limit,
            window: Duration::from_secs(60),
        }
    }
}

/// Limits for the chat purposes; the other purposes use fixed policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatLimits {
    pub join: RateLimitPolicy,
    pub send: RateLimitPolicy,
    pub presence: RateLimitPolicy,
}

impl ChatLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            join: RateLimitPolicy::per_minute(config.join_limit_per_minute),
            send: RateLimitPolicy::per_minute(config.send_limit_per_minute),
            presence: RateLimitPolicy::per_minute(config.presence_limit_per_minute),
        }
    }
}

/// Result of one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    /// Convert a denial into `ChatError::RateLimited`, with `Retry-After`
    /// rounded up to whole seconds and at least 1.
    pub fn into_result(self, now: DateTime<Utc>) -> Result<Self, ChatError> {
        if self.allowed {
            return Ok(self);
        }
        let wait_ms = (self.reset_at - now).num_milliseconds().max(0);
        let retry_after_secs = u64::try_from((wait_ms + 999) / 1000).unwrap_or(1).max(1);
        Err(ChatError::RateLimited {
            limit: self.limit,
            remaining: self.remaining,
            reset_at: self.reset_at,
            retry_after_secs,
        })
    }
}

/// Counter backend chosen at startup.
#[derive(Clone)]
pub enum LimiterBackend {
    Distributed(Arc<dyn CounterStore>),
    Local(Arc<LocalCounterStore>),
    /// No trustworthy counter; deny everything.
    FailClosed,
}

impl LimiterBackend {
    /// Pick the backend from the deployment mode and the outcome of the Redis
    /// connect attempt (`None` when no Redis URL is configured).
    pub fn choose(
        environment: Environment,
        redis: Option<Result<Arc<dyn CounterStore>, ChatError>>,
    ) -> Self {
        match (redis, environment.is_production()) {
            (Some(Ok(store)), _) => {
                info!(target: "chat.rate_limit", "Rate limiter using Redis counters");
                LimiterBackend::Distributed(store)
            }
            (Some(Err(e)), true) => {
                error!(
                    target: "chat.rate_limit",
                    error = %e,
                    "Redis unreachable in production, rate limiter failing closed"
                );
                LimiterBackend::FailClosed
            }
            (None, true) => {
                error!(
                    target: "chat.rate_limit",
                    "No Redis configured in production, rate limiter failing closed"
                );
                LimiterBackend::FailClosed
            }
            (Some(Err(e)), false) => {
                warn!(
                    target: "chat.rate_limit",
                    error = %e,
                    "Redis unreachable, using in-process rate limiter"
                );
                LimiterBackend::Local(Arc::new(LocalCounterStore::new()))
            }
            (None, false) => {
                info!(target: "chat.rate_limit", "Using in-process rate limiter");
                LimiterBackend::Local(Arc::new(LocalCounterStore::new()))
            }
        }
    }

    fn name(&self) -> &'static str {
        match self {
            LimiterBackend::Distributed(store) => store.backend_name(),
            LimiterBackend::Local(store) => store.backend_name(),
            LimiterBackend::FailClosed => "fail-closed",
        }
    }
}

/// The set of per-purpose limiters sharing one backend.
#[derive(Clone)]
pub struct RateLimiters {
    backend: LimiterBackend,
    environment: Environment,
    clock: Arc<dyn Clock>,
    chat: ChatLimits,
}

impl RateLimiters {
    pub fn new(
        backend: LimiterBackend,
        environment: Environment,
        clock: Arc<dyn Clock>,
        chat: ChatLimits,
    ) -> Self {
        Self {
            backend,
            environment,
            clock,
            chat,
        }
    }

    /// Build from configuration, connecting to Redis when a URL is given.
    pub async fn connect(config: &Config, clock: Arc<dyn Clock>) -> Self {
        let redis = match &config.redis_url {
            Some(url) => Some(
                RedisCounterStore::connect(url.expose_secret(), REDIS_CONNECT_TIMEOUT)
                    .await
                    .map(|store| Arc::new(store) as Arc<dyn CounterStore>),
            ),
            None => None,
        };
        let backend = LimiterBackend::choose(config.environment, redis);
        Self::new(
            backend,
            config.environment,
            clock,
            ChatLimits::from_config(config),
        )
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// The in-process counter, if that is the active backend.
    pub fn local_store(&self) -> Option<Arc<LocalCounterStore>> {
        match &self.backend {
            LimiterBackend::Local(store) => Some(store.clone()),
            _ => None,
        }
    }

    pub fn policy(&self, purpose: Purpose) -> RateLimitPolicy {
        match purpose {
            Purpose::ChatJoin => self.chat.join,
            Purpose::ChatSend => self.chat.send,
            Purpose::ChatPresence => self.chat.presence,
            Purpose::Comment => RateLimitPolicy::per_minute(5),
            Purpose::Vote => RateLimitPolicy::per_minute(3),
            Purpose::AdminAuth => RateLimitPolicy::per_minute(5),
            Purpose::Curious => RateLimitPolicy::per_minute(3),
        }
    }

    /// Count one request for `identifier` and decide whether it may proceed.
    ///
    /// Never errors: a counter failure is a denial in production and an
    /// allowance in development.
    pub async fn check(&self, purpose: Purpose, identifier: &str) -> RateLimitDecision {
        let policy = self.policy(purpose);
        let now = self.clock.now();
        let window_end = TimeDelta::from_std(policy.window)
            .ok()
            .and_then(|w| now.checked_add_signed(w))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let store: &dyn CounterStore = match &self.backend {
            LimiterBackend::Distributed(store) => store.as_ref(),
            LimiterBackend::Local(store) => store.as_ref(),
            LimiterBackend::FailClosed => {
                record_rate_limit_decision(purpose.as_str(), false);
                return RateLimitDecision {
                    allowed: false,
                    limit: policy.limit,
                    remaining: 0,
                    reset_at: window_end,
                };
            }
        };

        let decision = match store.hit(&purpose.key(identifier), policy.window, now).await {
            Ok(window) => {
                let remaining = u64::from(policy.limit).saturating_sub(window.count);
                RateLimitDecision {
                    allowed: window.count <= u64::from(policy.limit),
                    limit: policy.limit,
                    remaining: u32::try_from(remaining).unwrap_or(u32::MAX),
                    reset_at: window.reset_at,
                }
            }
            Err(e) => {
                let allowed = !self.environment.is_production();
                warn!(
                    target: "chat.rate_limit",
                    purpose = purpose.as_str(),
                    backend = store.backend_name(),
                    error = %e,
                    allowed = allowed,
                    "Rate-limit counter failed"
                );
                RateLimitDecision {
                    allowed,
                    limit: policy.limit,
                    remaining: if allowed { policy.limit } else { 0 },
                    reset_at: window_end,
                }
            }
        };

        record_rate_limit_decision(purpose.as_str(), decision.allowed);
        if !decision.allowed {
            tracing::debug!(
                target: "chat.rate_limit",
                purpose = purpose.as_str(),
                reset_at = %decision.reset_at,
                "Request rate limited"
            );
        }
        decision
    }

    /// [`RateLimiters::check`], with a denial turned into `RateLimited`.
    pub async fn enforce(
        &self,
        purpose: Purpose,
        identifier: &str,
    ) -> Result<RateLimitDecision, ChatError> {
        let decision = self.check(purpose, identifier).await;
        decision.into_result(self.clock.now())
    }
}
