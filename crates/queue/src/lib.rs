//! `pulse-queue`: producer/consumer mechanics over a stream log.
//!
//! Delivery is at-least-once: a record is redelivered only through reclaim,
//! and a reclaim can race a slow owner. Job handlers must be idempotent.
//!
//! Everything here is written against [`StreamLog`]; the Redis backend lives
//! in `pulse-infra`, and [`InMemoryStreamLog`] covers tests and local runs.

pub mod cancel;
pub mod consumer;
pub mod in_memory_log;
pub mod log;
pub mod producer;
pub mod retry;
pub mod worker;

pub use consumer::{Consumer, DEFAULT_RECLAIM_BATCH, parse_payload};
pub use in_memory_log::{InMemoryStreamLog, PendingInfo};
pub use log::{GroupCreation, StreamLog};
pub use producer::Producer;
pub use retry::{BackoffPolicy, MAX_BACKOFF, RetryError, retry_with_backoff};
pub use worker::{Delivery, IDLE_POLL_INTERVAL, QueueWorker, WorkerConfig, WorkerHandle};

pub use pulse_core::{
    ConsumerIdentity, DEFAULT_CONSUMER_NAME, DEFAULT_STREAM, Job, Payload, QueueError,
    QueueResult, ReclaimBatch, RecordId, StreamRecord, job_types, task_payload,
};
