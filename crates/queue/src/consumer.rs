//! Consumer-group reader: read, acknowledge, reclaim.
//!
//! A [`Consumer`] holds nothing but its identity; all delivery state (group
//! cursor, Pending Entries List) lives in the log.
//!
//! ## Crash recovery
//!
//! A record that was read but never acked stays in the PEL under its original
//! owner. [`Consumer::reclaim_pending`] moves entries idle for at least
//! `min_idle` to the calling consumer. Reading does not reclaim on its own;
//! callers schedule reclaim separately (a periodic sweep or a check before
//! reading, see [`crate::worker`]).
//!
//! Reclaim and read are not coordinated: a record whose owner is slow rather
//! than dead can be processed twice. Treat `min_idle` as a liveness
//! heuristic and keep job handling idempotent.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info_span};

use pulse_core::{ConsumerIdentity, QueueResult, ReclaimBatch, RecordId, StreamRecord};

use crate::cancel::cancellable;
use crate::log::StreamLog;

pub use pulse_core::parse_payload;

/// Entries claimed per `reclaim_pending` page (the `XAUTOCLAIM` default).
pub const DEFAULT_RECLAIM_BATCH: usize = 100;

/// One consumer identity within a group.
///
/// With a Redis backend, `read` parks its connection for up to `block`, so
/// give every consumer its own connection.
#[derive(Debug, Clone)]
pub struct Consumer<L> {
    log: L,
    identity: ConsumerIdentity,
    reclaim_batch: usize,
    span: Span,
}

impl<L: StreamLog> Consumer<L> {
    pub fn new(log: L, identity: ConsumerIdentity) -> Self {
        let span = info_span!(
            "consumer",
            stream = identity.stream(),
            group = identity.group(),
            consumer = identity.consumer()
        );
        Self {
            log,
            identity,
            reclaim_batch: DEFAULT_RECLAIM_BATCH,
            span,
        }
    }

    pub fn with_reclaim_batch(mut self, batch: usize) -> Self {
        self.reclaim_batch = batch.max(1);
        self
    }

    /// Log under `span` instead of the default `consumer` span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn identity(&self) -> &ConsumerIdentity {
        &self.identity
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    /// Wait up to `block` for one never-delivered record.
    ///
    /// `Ok(None)` means the wait timed out. The returned record is pending
    /// under this identity until acked or reclaimed by someone else.
    pub async fn read(
        &self,
        cancel: &CancellationToken,
        block: Duration,
    ) -> QueueResult<Option<StreamRecord>> {
        let records = cancellable(cancel, self.log.read_group(&self.identity, 1, block))
            .instrument(self.span.clone())
            .await?;

        let record = records.into_iter().next();
        if let Some(record) = &record {
            debug!(parent: &self.span, record_id = %record.id, "record delivered");
        }
        Ok(record)
    }

    /// Acknowledge `id`, removing it from the group's PEL.
    ///
    /// Not atomic with whatever the caller did before: a crash between the
    /// side effect and this call means the record will be reclaimed and
    /// processed again.
    pub async fn ack(&self, cancel: &CancellationToken, id: RecordId) -> QueueResult<()> {
        let acked = cancellable(
            cancel,
            self.log
                .ack(self.identity.stream(), self.identity.group(), &[id]),
        )
        .instrument(self.span.clone())
        .await?;

        if acked == 0 {
            // Already acked, or the entry was reclaimed and acked elsewhere.
            debug!(parent: &self.span, record_id = %id, "ack for a record that was not pending");
        }
        Ok(())
    }

    /// Claim one page of PEL entries idle for at least `min_idle`.
    ///
    /// Start from [`RecordId::ZERO`] and keep passing the returned
    /// `next_cursor` back in until it is `ZERO` again. Entries acked or
    /// deleted between pages are simply not returned.
    pub async fn reclaim_pending(
        &self,
        cancel: &CancellationToken,
        min_idle: Duration,
        start: RecordId,
    ) -> QueueResult<ReclaimBatch> {
        let batch = cancellable(
            cancel,
            self.log
                .auto_claim(&self.identity, min_idle, start, self.reclaim_batch),
        )
        .instrument(self.span.clone())
        .await?;

        if !batch.records.is_empty() {
            debug!(
                parent: &self.span,
                claimed = batch.records.len(),
                start = %start,
                next_cursor = %batch.next_cursor,
                "reclaimed idle pending records"
            );
        }
        Ok(batch)
    }

    /// Page through the whole PEL, claiming everything idle for `min_idle`.
    pub async fn reclaim_all(
        &self,
        cancel: &CancellationToken,
        min_idle: Duration,
    ) -> QueueResult<Vec<StreamRecord>> {
        let mut claimed = Vec::new();
        let mut cursor = RecordId::ZERO;

        loop {
            let batch = self.reclaim_pending(cancel, min_idle, cursor).await?;
            claimed.extend(batch.records);
            if batch.next_cursor.is_zero() {
                break;
            }
            cursor = batch.next_cursor;
        }

        Ok(claimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use pulse_core::QueueError;

    use crate::{InMemoryStreamLog, Producer};

    async fn setup() -> (Producer<Arc<InMemoryStreamLog>>, Arc<InMemoryStreamLog>) {
        let log = Arc::new(InMemoryStreamLog::new());
        let producer = Producer::new(log.clone());
        producer
            .ensure_consumer_group(&CancellationToken::new(), "s", "g")
            .await
            .unwrap();
        (producer, log)
    }

    fn consumer(log: &Arc<InMemoryStreamLog>, name: &str) -> Consumer<Arc<InMemoryStreamLog>> {
        Consumer::new(log.clone(), ConsumerIdentity::new("s", "g", name))
    }

    #[tokio::test]
    async fn read_returns_at_most_one_record() {
        let (producer, log) = setup().await;
        let token = CancellationToken::new();
        for _ in 0..3 {
            producer.add_raw_job(&token, "s", "{}").await.unwrap();
        }

        let c = consumer(&log, "c");
        assert!(c.read(&token, Duration::ZERO).await.unwrap().is_some());
        assert_eq!(log.pending("s", "g").unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn read_times_out_with_none() {
        let (_, log) = setup().await;
        let c = consumer(&log, "c");
        let got = c.read(&CancellationToken::new(), Duration::from_secs(5)).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn read_is_cancellable_while_blocked() {
        let (_, log) = setup().await;
        let c = consumer(&log, "c");
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        let err = c.read(&token, Duration::from_secs(60)).await.unwrap_err();

        assert_eq!(err, QueueError::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn double_ack_is_harmless() {
        let (producer, log) = setup().await;
        let token = CancellationToken::new();
        producer.add_raw_job(&token, "s", "{}").await.unwrap();

        let c = consumer(&log, "c");
        let record = c.read(&token, Duration::ZERO).await.unwrap().unwrap();
        c.ack(&token, record.id).await.unwrap();
        c.ack(&token, record.id).await.unwrap();
        assert!(log.pending("s", "g").unwrap().is_empty());
    }

    #[tokio::test]
    async fn reclaim_all_drains_every_page() {
        let (producer, log) = setup().await;
        let token = CancellationToken::new();
        for i in 0..7 {
            producer.add_raw_job(&token, "s", &format!(r#"{{"i":{i}}}"#)).await.unwrap();
        }
        let dead = consumer(&log, "dead");
        for _ in 0..7 {
            dead.read(&token, Duration::ZERO).await.unwrap().unwrap();
        }

        let rescuer = consumer(&log, "rescuer").with_reclaim_batch(3);
        let claimed = rescuer.reclaim_all(&token, Duration::ZERO).await.unwrap();

        assert_eq!(claimed.len(), 7);
        assert!(log
            .pending("s", "g")
            .unwrap()
            .iter()
            .all(|p| p.consumer == "rescuer"));
    }

    #[tokio::test]
    async fn reclaim_without_group_is_a_transport_error() {
        let log = Arc::new(InMemoryStreamLog::new());
        let c = consumer(&log, "c");
        let err = c
            .reclaim_pending(&CancellationToken::new(), Duration::ZERO, RecordId::ZERO)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
