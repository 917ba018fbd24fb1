//! Chat service configuration.
//!
//! Configuration is loaded from environment variables. Connection URLs are
//! redacted in Debug output.

use secrecy::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default presence TTL in seconds.
pub const DEFAULT_PRESENCE_TTL_SECONDS: u64 = 30;

/// Default seat count for lazily created rooms.
pub const DEFAULT_ROOM_CAPACITY: i32 = 30;

/// Default bound on a single backing-store call in milliseconds.
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 5000;

/// Default room join attempts per minute per story and client IP.
pub const DEFAULT_JOIN_LIMIT_PER_MINUTE: u32 = 10;

/// Default messages per minute per member.
pub const DEFAULT_SEND_LIMIT_PER_MINUTE: u32 = 20;

/// Default presence touches per minute per member.
pub const DEFAULT_PRESENCE_LIMIT_PER_MINUTE: u32 = 30;

/// Default interval between sweeps of the local limiter map.
pub const DEFAULT_LIMITER_SWEEP_INTERVAL_SECONDS: u64 = 60;

/// Deployment mode.
///
/// Production makes a database mandatory and makes the rate limiter fail
/// closed when its distributed counter store is unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// Chat service configuration.
#[derive(Clone)]
pub struct Config {
    /// Deployment mode (`APP_ENV`).
    pub environment: Environment,

    /// PostgreSQL connection URL. `None` selects the in-process store.
    pub database_url: Option<SecretString>,

    /// Redis URL for the distributed rate-limit counters.
    pub redis_url: Option<SecretString>,

    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Seconds of silence after which a member no longer holds a seat.
    pub presence_ttl_seconds: u64,

    /// Capacity given to rooms created on first access.
    pub default_room_capacity: i32,

    /// Bound on each backing-store call.
    pub store_timeout_ms: u64,

    pub join_limit_per_minute: u32,
    pub send_limit_per_minute: u32,
    pub presence_limit_per_minute: u32,

    /// Interval for sweeping expired keys from the local limiter.
    pub limiter_sweep_interval_seconds: u64,
}

/// Custom Debug implementation that redacts connection URLs.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<SecretString>| v.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("Config")
            .field("environment", &self.environment)
            .field("database_url", &redact(&self.database_url))
            .field("redis_url", &redact(&self.redis_url))
            .field("bind_address", &self.bind_address)
            .field("presence_ttl_seconds", &self.presence_ttl_seconds)
            .field("default_room_capacity", &self.default_room_capacity)
            .field("store_timeout_ms", &self.store_timeout_ms)
            .field("join_limit_per_minute", &self.join_limit_per_minute)
            .field("send_limit_per_minute", &self.send_limit_per_minute)
            .field("presence_limit_per_minute", &self.presence_limit_per_minute)
            .field(
                "limiter_sweep_interval_seconds",
                &self.limiter_sweep_interval_seconds,
            )
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let environment = match vars.get("APP_ENV").map(|s| s.trim().to_ascii_lowercase()) {
            None => Environment::Development,
            Some(value) => match value.as_str() {
                "production" | "prod" => Environment::Production,
                "development" | "dev" | "test" => Environment::Development,
                other => {
                    return Err(ConfigError::InvalidValue {
                        name: "APP_ENV".to_string(),
                        reason: format!("expected 'production' or 'development', got '{other}'"),
                    })
                }
            },
        };

        let database_url = non_empty(vars, "DATABASE_URL").map(SecretString::from);
        if environment.is_production() && database_url.is_none() {
            return Err(ConfigError::MissingEnvVar("DATABASE_URL".to_string()));
        }

        let redis_url = non_empty(vars, "REDIS_URL").map(SecretString::from);

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let presence_ttl_seconds = parse_positive(
            vars,
            "CHAT_PRESENCE_TTL_SECONDS",
            DEFAULT_PRESENCE_TTL_SECONDS,
        )?;

        let default_room_capacity =
            parse_positive(vars, "CHAT_DEFAULT_ROOM_CAPACITY", DEFAULT_ROOM_CAPACITY)?;

        let store_timeout_ms = parse_positive(vars, "STORE_TIMEOUT_MS", DEFAULT_STORE_TIMEOUT_MS)?;

        let join_limit_per_minute = parse_positive(
            vars,
            "RATE_LIMIT_JOIN_PER_MINUTE",
            DEFAULT_JOIN_LIMIT_PER_MINUTE,
        )?;
        let send_limit_per_minute = parse_positive(
            vars,
            "RATE_LIMIT_SEND_PER_MINUTE",
            DEFAULT_SEND_LIMIT_PER_MINUTE,
        )?;
        let presence_limit_per_minute = parse_positive(
            vars,
            "RATE_LIMIT_PRESENCE_PER_MINUTE",
            DEFAULT_PRESENCE_LIMIT_PER_MINUTE,
        )?;

        let limiter_sweep_interval_seconds = parse_positive(
            vars,
            "LIMITER_SWEEP_INTERVAL_SECONDS",
            DEFAULT_LIMITER_SWEEP_INTERVAL_SECONDS,
        )?;

        Ok(Config {
            environment,
            database_url,
            redis_url,
            bind_address,
            presence_ttl_seconds,
            default_room_capacity,
            store_timeout_ms,
            join_limit_per_minute,
            send_limit_per_minute,
            presence_limit_per_minute,
            limiter_sweep_interval_seconds,
        })
    }
}

fn non_empty(vars: &HashMap<String, String>, name: &str) -> Option<String> {
    vars.get(name)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Parse an optional strictly positive integer variable.
fn parse_positive<T>(vars: &HashMap<String, String>, name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default + Copy,
    T::Err: fmt::Display,
{
    let Some(value_str) = vars.get(name) else {
        return Ok(default);
    };

    let value: T = value_str.trim().parse().map_err(|e| ConfigError::InvalidValue {
        name: name.to_string(),
        reason: format!("must be a valid positive integer, got '{value_str}': {e}"),
    })?;

    if value <= T::default() {
        return Err(ConfigError::InvalidValue {
            name: name.to_string(),
            reason: "must be greater than 0".to_string(),
        });
    }

    Ok(value)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&HashMap::new()).expect("Config should load successfully");

        assert_eq!(config.environment, Environment::Development);
        assert!(config.database_url.is_none());
        assert!(config.redis_url.is_none());
        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.presence_ttl_seconds, 30);
        assert_eq!(config.default_room_capacity, 30);
        assert_eq!(config.store_timeout_ms, 5000);
        assert_eq!(config.join_limit_per_minute, 10);
        assert_eq!(config.send_limit_per_minute, 20);
        assert_eq!(config.presence_limit_per_minute, 30);
        assert_eq!(config.limiter_sweep_interval_seconds, 60);
    }

    #[test]
    fn test_production_requires_database_url() {
        let vars = HashMap::from([("APP_ENV".to_string(), "production".to_string())]);
        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(ref v)) if v == "DATABASE_URL"));
    }

    #[test]
    fn test_production_with_database_url() {
        let vars = HashMap::from([
            ("APP_ENV".to_string(), "Production".to_string()),
            (
                "DATABASE_URL".to_string(),
                "postgresql://localhost/chat".to_string(),
            ),
            ("REDIS_URL".to_string(), "redis://localhost:6379".to_string()),
        ]);
        let config = Config::from_vars(&vars).unwrap();
        assert!(config.environment.is_production());
        assert_eq!(
            config.database_url.as_ref().unwrap().expose_secret(),
            "postgresql://localhost/chat"
        );
        assert_eq!(
            config.redis_url.as_ref().unwrap().expose_secret(),
            "redis://localhost:6379"
        );
    }

    #[test]
    fn test_invalid_app_env_rejected() {
        let vars = HashMap::from([("APP_ENV".to_string(), "staging".to_string())]);
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue { ref name, .. }) if name == "APP_ENV"
        ));
    }

    #[test]
    fn test_zero_presence_ttl_rejected() {
        let vars = HashMap::from([("CHAT_PRESENCE_TTL_SECONDS".to_string(), "0".to_string())]);
        let err = Config::from_vars(&vars).unwrap_err();
        assert!(err.to_string().contains("CHAT_PRESENCE_TTL_SECONDS"));
        assert!(err.to_string().contains("greater than 0"));
    }

    #[test]
    fn test_negative_capacity_rejected() {
        let vars = HashMap::from([("CHAT_DEFAULT_ROOM_CAPACITY".to_string(), "-4".to_string())]);
        assert!(Config::from_vars(&vars).is_err());
    }

    #[test]
    fn test_non_numeric_limit_rejected() {
        let vars = HashMap::from([("RATE_LIMIT_SEND_PER_MINUTE".to_string(), "lots".to_string())]);
        let err = Config::from_vars(&vars).unwrap_err();
        assert!(err.to_string().contains("RATE_LIMIT_SEND_PER_MINUTE"));
    }

    #[test]
    fn test_empty_urls_treated_as_absent() {
        let vars = HashMap::from([
            ("DATABASE_URL".to_string(), "  ".to_string()),
            ("REDIS_URL".to_string(), String::new()),
        ]);
        let config = Config::from_vars(&vars).unwrap();
        assert!(config.database_url.is_none());
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn test_debug_redacts_urls() {
        let vars = HashMap::from([
            (
                "DATABASE_URL".to_string(),
                "postgresql://user:hunter2@db/chat".to_string(),
            ),
            ("REDIS_URL".to_string(), "redis://:hunter2@cache".to_string()),
        ]);
        let config = Config::from_vars(&vars).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }
}
