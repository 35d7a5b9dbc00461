use crate::fanout::FanoutPolicy;
use crate::retry::ExponentialBackoff;
use std::env;
use std::time::Duration;

/// Configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    /// Path to SQLite database file
    pub db_path: String,

    /// Total attempts for a conditional write before surfacing ConflictOnUpdate
    pub conflict_attempts: u32,

    /// Deadline for every alias/history store call, in milliseconds
    pub store_timeout_ms: u64,

    pub retry_initial_delay_ms: u64,
    pub retry_max_delay_ms: u64,

    /// What to do when one per-UID history query fails
    pub fanout_policy: FanoutPolicy,

    /// Limit used when a fan-out caller does not pass one
    pub fanout_default_limit: usize,

    /// Channel buffer size for inbound device events
    pub ingest_channel_buffer: usize,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            db_path: "data/fleetid.db".to_string(),
            conflict_attempts: 3,
            store_timeout_ms: 5_000,
            retry_initial_delay_ms: 10,
            retry_max_delay_ms: 250,
            fanout_policy: FanoutPolicy::Partial,
            fanout_default_limit: 100,
            ingest_channel_buffer: 1_000,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl IdentityConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `FLEETID_DB_PATH` (default: data/fleetid.db)
    /// - `ALIAS_CONFLICT_ATTEMPTS` (default: 3, minimum 1)
    /// - `STORE_TIMEOUT_MS` (default: 5000)
    /// - `RETRY_INITIAL_DELAY_MS` (default: 10)
    /// - `RETRY_MAX_DELAY_MS` (default: 250)
    /// - `FANOUT_POLICY` (`partial` | `fail_fast`, default: partial)
    /// - `FANOUT_DEFAULT_LIMIT` (default: 100)
    /// - `INGEST_CHANNEL_BUFFER` (default: 1000)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let fanout_policy = match env::var("FANOUT_POLICY") {
            Ok(raw) => raw.parse::<FanoutPolicy>().map_err(ConfigError::InvalidValue)?,
            Err(_) => defaults.fanout_policy,
        };

        Ok(Self {
            db_path: env::var("FLEETID_DB_PATH").unwrap_or(defaults.db_path),
            conflict_attempts: parse_env("ALIAS_CONFLICT_ATTEMPTS", defaults.conflict_attempts)
                .max(1),
            store_timeout_ms: parse_env("STORE_TIMEOUT_MS", defaults.store_timeout_ms),
            retry_initial_delay_ms: parse_env(
                "RETRY_INITIAL_DELAY_MS",
                defaults.retry_initial_delay_ms,
            ),
            retry_max_delay_ms: parse_env("RETRY_MAX_DELAY_MS", defaults.retry_max_delay_ms),
            fanout_policy,
            fanout_default_limit: parse_env("FANOUT_DEFAULT_LIMIT", defaults.fanout_default_limit),
            ingest_channel_buffer: parse_env(
                "INGEST_CHANNEL_BUFFER",
                defaults.ingest_channel_buffer,
            ),
        })
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Backoff allowing `conflict_attempts - 1` sleeps between attempts
    pub fn conflict_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            self.retry_initial_delay_ms,
            self.retry_max_delay_ms,
            self.conflict_attempts.saturating_sub(1),
        )
    }
}
