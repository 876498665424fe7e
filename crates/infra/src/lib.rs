//! Infrastructure layer: the Redis stream log, configuration and wiring.

pub mod bootstrap;
pub mod config;
pub mod redis_streams;

pub use bootstrap::{QueueClient, connect};
pub use config::{ConfigError, QueueConfig};
pub use redis_streams::RedisStreamLog;
