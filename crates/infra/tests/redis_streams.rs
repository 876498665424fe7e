//! Against a live Redis. Run with:
//!
//! ```text
//! REDIS_URL=redis://127.0.0.1:6379 cargo test -p pulse-infra -- --ignored
//! ```

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use pulse_infra::{QueueConfig, RedisStreamLog, connect};
use pulse_queue::{
    Consumer, ConsumerIdentity, GroupCreation, Payload, Producer, QueueError, RecordId, StreamLog,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

fn unique_stream(test: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("pulse-test:{test}:{}:{nanos}", std::process::id())
}

async fn drop_stream(stream: &str) {
    let client = redis::Client::open(redis_url()).unwrap();
    let mut conn = client.get_multiplexed_tokio_connection().await.unwrap();
    let _: i64 = redis::cmd("DEL").arg(stream).query_async(&mut conn).await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running Redis (REDIS_URL)"]
async fn group_creation_is_idempotent() {
    let stream = unique_stream("group");
    let log = RedisStreamLog::connect(redis_url()).await.unwrap();

    assert!(!log.stream_exists(&stream).await.unwrap());
    let first = log.create_group(&stream, "g", RecordId::ZERO).await.unwrap();
    let second = log.create_group(&stream, "g", RecordId::ZERO).await.unwrap();

    assert_eq!(first, GroupCreation::Created);
    assert_eq!(second, GroupCreation::AlreadyExists);
    assert!(log.stream_exists(&stream).await.unwrap());
    drop_stream(&stream).await;
}

#[tokio::test]
#[ignore = "requires a running Redis (REDIS_URL)"]
async fn produce_read_ack_reclaim() {
    let stream = unique_stream("flow");
    let token = CancellationToken::new();
    let log = RedisStreamLog::connect(redis_url()).await.unwrap();
    let producer = Producer::new(log.clone());
    producer.ensure_consumer_group(&token, &stream, "g").await.unwrap();

    let mut payload = Payload::new();
    payload.insert("foo".into(), json!("bar"));
    let first = producer.add_job(&token, &stream, &payload).await.unwrap();
    let second = producer.add_raw_job(&token, &stream, r#"{"n":2}"#).await.unwrap();
    assert!(first < second);

    let crashed = Consumer::new(
        log.dedicated().await.unwrap(),
        ConsumerIdentity::new(&stream, "g", "crashed"),
    );
    let record = crashed.read(&token, Duration::from_millis(100)).await.unwrap().unwrap();
    assert_eq!(record.id, first);
    assert_eq!(record.payload().unwrap(), payload);

    let rescuer = Consumer::new(
        log.dedicated().await.unwrap(),
        ConsumerIdentity::new(&stream, "g", "rescuer"),
    );
    let own = rescuer.read(&token, Duration::ZERO).await.unwrap().unwrap();
    assert_eq!(own.id, second);
    rescuer.ack(&token, own.id).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let claimed = rescuer
        .reclaim_all(&token, Duration::from_millis(20))
        .await
        .unwrap();
    assert_eq!(claimed.iter().map(|r| r.id).collect::<Vec<_>>(), [first]);

    rescuer.ack(&token, first).await.unwrap();
    assert!(rescuer.reclaim_all(&token, Duration::ZERO).await.unwrap().is_empty());
    drop_stream(&stream).await;
}

#[tokio::test]
#[ignore = "requires a running Redis (REDIS_URL)"]
async fn blocking_read_times_out_empty() {
    let stream = unique_stream("block");
    let token = CancellationToken::new();
    let log = RedisStreamLog::connect(redis_url()).await.unwrap();
    Producer::new(log.clone())
        .ensure_consumer_group(&token, &stream, "g")
        .await
        .unwrap();

    let consumer = Consumer::new(log, ConsumerIdentity::new(&stream, "g", ""));
    let got = consumer.read(&token, Duration::from_millis(50)).await.unwrap();
    assert!(got.is_none());
    drop_stream(&stream).await;
}

#[tokio::test]
#[ignore = "requires a running Redis (REDIS_URL)"]
async fn bootstrap_connects_and_creates_the_group() {
    let stream = unique_stream("bootstrap");
    let mut config = QueueConfig::new(redis_url());
    config.stream = stream.clone();

    let client = connect(&config, &CancellationToken::new()).await.unwrap();
    assert!(client
        .producer
        .stream_exists(&CancellationToken::new(), &stream)
        .await
        .unwrap());
    assert_eq!(client.consumer.identity().consumer(), "consumer-1");
    drop_stream(&stream).await;
}

#[tokio::test]
async fn unreachable_server_is_a_connection_error() {
    let err = RedisStreamLog::connect("redis://127.0.0.1:1").await.unwrap_err();
    assert!(matches!(err, QueueError::Connection(_)), "got {err:?}");
}

#[tokio::test]
async fn invalid_url_is_a_connection_error() {
    let err = RedisStreamLog::connect("not a url").await.unwrap_err();
    assert!(matches!(err, QueueError::Connection(_)));
}
