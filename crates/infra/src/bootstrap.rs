//! Wiring a producer and a consumer to Redis from a [`QueueConfig`].

use tracing::info;

use pulse_core::QueueResult;
use pulse_queue::{Consumer, Producer};
use tokio_util::sync::CancellationToken;

use crate::config::QueueConfig;
use crate::redis_streams::RedisStreamLog;

/// A connected producer/consumer pair for one stream and group.
///
/// The consumer has its own connection so that its blocking reads never
/// stall the producer.
#[derive(Debug, Clone)]
pub struct QueueClient {
    pub producer: Producer<RedisStreamLog>,
    pub consumer: Consumer<RedisStreamLog>,
}

/// Connect to Redis and make sure the configured group exists.
pub async fn connect(config: &QueueConfig, cancel: &CancellationToken) -> QueueResult<QueueClient> {
    let log = RedisStreamLog::connect(&config.redis_url).await?;
    let producer = Producer::new(log.clone());
    producer
        .ensure_consumer_group(cancel, &config.stream, &config.group)
        .await?;

    let consumer = Consumer::new(log.dedicated().await?, config.identity());
    info!(consumer = %consumer.identity(), "queue client connected");

    Ok(QueueClient { producer, consumer })
}
