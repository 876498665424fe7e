//! Stream log abstraction (mechanics only).
//!
//! A [`StreamLog`] is the broker side of the queue: a durable, ordered,
//! append-only log with consumer groups. Producers and consumers only ever
//! talk to this trait, so the same code runs against Redis Streams in
//! production and against [`crate::InMemoryStreamLog`] in tests.
//!
//! ## Delivery model
//!
//! - **Group cursor**: each group remembers the last record it handed out.
//!   A new record goes to exactly one consumer of the group.
//! - **Pending Entries List (PEL)**: every delivered record stays pending,
//!   owned by the consumer that received it, until acknowledged.
//! - **Reclaim**: pending entries idle for long enough can be claimed by
//!   another consumer. This is the only path to redelivery.
//!
//! Delivery is at-least-once. A slow but alive owner can race a reclaiming
//! peer, so handlers must tolerate duplicates.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use pulse_core::{ConsumerIdentity, QueueResult, ReclaimBatch, RecordId, StreamRecord};

/// Outcome of an idempotent group creation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GroupCreation {
    Created,
    AlreadyExists,
}

/// Broker capability consumed by producers and consumers.
///
/// Every method is a single round trip; only [`StreamLog::read_group`] may
/// block, and only for up to `block`.
///
/// The trait requires `Send + Sync`; implementations are shared across tasks.
#[async_trait]
pub trait StreamLog: Send + Sync {
    /// Create `group` on `stream` positioned at `start`, creating the stream
    /// if needed.
    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: RecordId,
    ) -> QueueResult<GroupCreation>;

    /// Append a record and return its id.
    async fn append(&self, stream: &str, fields: &[(String, String)]) -> QueueResult<RecordId>;

    /// Deliver up to `count` never-delivered records to `consumer`.
    ///
    /// Waits up to `block` for a record to arrive; `Duration::ZERO` polls.
    /// An empty result means the wait timed out.
    async fn read_group(
        &self,
        consumer: &ConsumerIdentity,
        count: usize,
        block: Duration,
    ) -> QueueResult<Vec<StreamRecord>>;

    /// Acknowledge records, returning how many were actually pending.
    async fn ack(&self, stream: &str, group: &str, ids: &[RecordId]) -> QueueResult<u64>;

    /// Claim up to `count` pending entries idle for at least `min_idle`,
    /// scanning the PEL from `start` (inclusive).
    async fn auto_claim(
        &self,
        consumer: &ConsumerIdentity,
        min_idle: Duration,
        start: RecordId,
        count: usize,
    ) -> QueueResult<ReclaimBatch>;

    async fn stream_exists(&self, stream: &str) -> QueueResult<bool>;
}

#[async_trait]
impl<L> StreamLog for Arc<L>
where
    L: StreamLog + ?Sized,
{
    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: RecordId,
    ) -> QueueResult<GroupCreation> {
        (**self).create_group(stream, group, start).await
    }

    async fn append(&self, stream: &str, fields: &[(String, String)]) -> QueueResult<RecordId> {
        (**self).append(stream, fields).await
    }

    async fn read_group(
        &self,
        consumer: &ConsumerIdentity,
        count: usize,
        block: Duration,
    ) -> QueueResult<Vec<StreamRecord>> {
        (**self).read_group(consumer, count, block).await
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[RecordId]) -> QueueResult<u64> {
        (**self).ack(stream, group, ids).await
    }

    async fn auto_claim(
        &self,
        consumer: &ConsumerIdentity,
        min_idle: Duration,
        start: RecordId,
        count: usize,
    ) -> QueueResult<ReclaimBatch> {
        (**self).auto_claim(consumer, min_idle, start, count).await
    }

    async fn stream_exists(&self, stream: &str) -> QueueResult<bool> {
        (**self).stream_exists(stream).await
    }
}
