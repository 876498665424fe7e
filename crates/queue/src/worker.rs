//! Generic queue worker loop.
//!
//! Ties the consumer operations together for a dedicated worker task:
//!
//! - reclaim sweep on start and every `reclaim_interval`
//! - blocking reads in between
//! - ack after the handler succeeds, leave pending when it fails
//! - graceful shutdown through a cancellation token

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, warn};

use pulse_core::{Job, RecordId, StreamRecord};

use crate::consumer::Consumer;
use crate::log::StreamLog;
use crate::retry::{BackoffPolicy, RetryError, retry_with_backoff};

/// Pause between empty polls when `WorkerConfig::block` is zero.
pub const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A decoded job handed to the worker's handler.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Stable across redeliveries; usable as an idempotency key.
    pub id: RecordId,
    pub job: Job,
    /// `true` when the record came from a reclaim sweep.
    pub reclaimed: bool,
}

/// Worker loop configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Upper bound for one blocking read. Zero polls, pausing
    /// [`IDLE_POLL_INTERVAL`] between empty polls.
    pub block: Duration,
    /// Idle time after which another consumer's pending record is reclaimed.
    pub min_idle: Duration,
    /// Time between reclaim sweeps.
    pub reclaim_interval: Duration,
    /// Backoff for reads, sweeps and acks that fail in transport.
    pub backoff: BackoffPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            block: Duration::from_secs(5),
            min_idle: Duration::from_secs(60),
            reclaim_interval: Duration::from_secs(30),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Handle to control and join a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    ///
    /// A job already inside the handler is allowed to finish.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(j) = self.join.take() {
            let _ = j.await;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

/// Spawns worker loops.
#[derive(Debug)]
pub struct QueueWorker;

impl QueueWorker {
    /// Spawn a worker task that processes records for `consumer`.
    ///
    /// - `cancel`: parent token; cancelling it stops the worker too
    /// - `handler`: must be idempotent (at-least-once delivery safe)
    pub fn spawn<L, H, Fut>(
        consumer: Consumer<L>,
        config: WorkerConfig,
        handler: H,
        cancel: &CancellationToken,
    ) -> WorkerHandle
    where
        L: StreamLog + 'static,
        H: FnMut(Delivery) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let shutdown = cancel.child_token();
        let span = consumer.span().clone();
        let join = tokio::spawn(
            worker_loop(consumer, config, handler, shutdown.clone()).instrument(span),
        );

        WorkerHandle {
            shutdown,
            join: Some(join),
        }
    }
}

async fn worker_loop<L, H, Fut>(
    consumer: Consumer<L>,
    config: WorkerConfig,
    mut handler: H,
    cancel: CancellationToken,
) where
    L: StreamLog,
    H: FnMut(Delivery) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let consumer = &consumer;
    let cancel = &cancel;
    let mut next_sweep = Instant::now();

    info!("queue worker started");

    while !cancel.is_cancelled() {
        if Instant::now() >= next_sweep {
            let swept = retry_with_backoff(cancel, config.backoff, move || {
                consumer.reclaim_all(cancel, config.min_idle)
            })
            .await;

            match swept {
                Ok(records) => {
                    for record in records {
                        process(consumer, &config, cancel, &mut handler, record, true).await;
                    }
                }
                Err(RetryError::Cancelled) => break,
                Err(err) => warn!(error = %err, "reclaim sweep failed"),
            }
            next_sweep = Instant::now() + config.reclaim_interval;
        }

        // Never block past the next sweep.
        let block = config
            .block
            .min(next_sweep.saturating_duration_since(Instant::now()));

        let read =
            retry_with_backoff(cancel, config.backoff, move || consumer.read(cancel, block)).await;

        match read {
            Ok(Some(record)) => process(consumer, &config, cancel, &mut handler, record, false).await,
            Ok(None) if config.block.is_zero() => {
                let pause =
                    IDLE_POLL_INTERVAL.min(next_sweep.saturating_duration_since(Instant::now()));
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
                // A due sweep makes the pause zero; still give the runtime a turn.
                tokio::task::yield_now().await;
            }
            Ok(None) => {}
            Err(RetryError::Cancelled) => break,
            Err(err) => warn!(error = %err, "read failed"),
        }
    }

    info!("queue worker stopped");
}

async fn process<L, H, Fut>(
    consumer: &Consumer<L>,
    config: &WorkerConfig,
    cancel: &CancellationToken,
    handler: &mut H,
    record: StreamRecord,
    reclaimed: bool,
) where
    L: StreamLog,
    H: FnMut(Delivery) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let id = record.id;

    let job = match record.job() {
        Ok(job) => job,
        Err(err) => {
            // Redelivering a record that cannot be decoded never helps.
            error!(record_id = %id, error = %err, "dropping undecodable record");
            ack(consumer, config, cancel, id).await;
            return;
        }
    };

    match handler(Delivery { id, job, reclaimed }).await {
        Ok(()) => ack(consumer, config, cancel, id).await,
        Err(err) => {
            warn!(record_id = %id, error = ?err, "job handler failed; record left pending");
        }
    }
}

async fn ack<L: StreamLog>(
    consumer: &Consumer<L>,
    config: &WorkerConfig,
    cancel: &CancellationToken,
    id: RecordId,
) {
    let acked = retry_with_backoff(cancel, config.backoff, move || consumer.ack(cancel, id)).await;
    if let Err(err) = acked {
        warn!(record_id = %id, error = %err, "ack failed; record will be reclaimed");
    }
}
