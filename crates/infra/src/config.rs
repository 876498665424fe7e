//! Configuration loading and representation.
//!
//! Values come from the process environment, optionally primed from a `.env`
//! file. Unset keys take their defaults; set but unparseable keys are errors.

use std::time::Duration;

use pulse_core::{ConsumerIdentity, DEFAULT_CONSUMER_NAME, DEFAULT_STREAM};
use pulse_queue::{BackoffPolicy, WorkerConfig};

pub const REDIS_URL: &str = "REDIS_URL";
pub const STREAM: &str = "PULSE_STREAM";
pub const GROUP: &str = "PULSE_GROUP";
pub const CONSUMER_NAME: &str = "PULSE_CONSUMER_NAME";
pub const BLOCK_MS: &str = "PULSE_BLOCK_MS";
pub const MIN_IDLE_MS: &str = "PULSE_MIN_IDLE_MS";
pub const RECLAIM_INTERVAL_MS: &str = "PULSE_RECLAIM_INTERVAL_MS";
pub const RETRY_ATTEMPTS: &str = "PULSE_RETRY_ATTEMPTS";
pub const RETRY_BASE_MS: &str = "PULSE_RETRY_BASE_MS";

pub const DEFAULT_GROUP: &str = "workers";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Everything a queue process needs to connect and run a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub redis_url: String,
    pub stream: String,
    pub group: String,
    pub consumer_name: String,
    pub worker: WorkerConfig,
}

impl QueueConfig {
    /// Defaults for everything but the Redis URL.
    pub fn new(redis_url: impl Into<String>) -> Self {
        Self {
            redis_url: redis_url.into(),
            stream: DEFAULT_STREAM.to_string(),
            group: DEFAULT_GROUP.to_string(),
            consumer_name: DEFAULT_CONSUMER_NAME.to_string(),
            worker: WorkerConfig::default(),
        }
    }

    /// Load from the environment, reading `.env` first if there is one.
    ///
    /// Variables already set in the environment win over `.env` entries.
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env is the normal case outside development.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through `lookup`; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let redis_url = get(REDIS_URL).ok_or(ConfigError::Missing(REDIS_URL))?;
        let mut config = Self::new(redis_url);

        if let Some(stream) = get(STREAM) {
            config.stream = stream;
        }
        if let Some(group) = get(GROUP) {
            config.group = group;
        }
        if let Some(name) = get(CONSUMER_NAME) {
            config.consumer_name = name;
        }

        let worker = &mut config.worker;
        if let Some(ms) = parse::<u64>(BLOCK_MS, get(BLOCK_MS))? {
            worker.block = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64>(MIN_IDLE_MS, get(MIN_IDLE_MS))? {
            worker.min_idle = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64>(RECLAIM_INTERVAL_MS, get(RECLAIM_INTERVAL_MS))? {
            if ms == 0 {
                return Err(invalid(RECLAIM_INTERVAL_MS, "0", "must be positive"));
            }
            worker.reclaim_interval = Duration::from_millis(ms);
        }
        if let Some(n) = parse::<u32>(RETRY_ATTEMPTS, get(RETRY_ATTEMPTS))? {
            worker.backoff.max_attempts = n;
        }
        if let Some(ms) = parse::<u64>(RETRY_BASE_MS, get(RETRY_BASE_MS))? {
            worker.backoff.base_delay = Duration::from_millis(ms);
        }

        Ok(config)
    }

    pub fn identity(&self) -> ConsumerIdentity {
        ConsumerIdentity::new(&self.stream, &self.group, &self.consumer_name)
    }

    pub fn backoff(&self) -> BackoffPolicy {
        self.worker.backoff
    }
}

fn parse<T>(key: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    raw.map(|value| {
        value
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(key, &value, e.to_string()))
    })
    .transpose()
}

fn invalid(key: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.into(),
    }
}
