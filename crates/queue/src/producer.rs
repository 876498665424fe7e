//! Job producer: appends encoded jobs to a stream.

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info_span};

use pulse_core::{DEFAULT_STREAM, Payload, QueueResult, RecordId, payload, task_payload};

use crate::cancel::cancellable;
use crate::log::{GroupCreation, StreamLog};

/// Appends jobs to streams of a [`StreamLog`].
///
/// Every call is a single round trip raced against the caller's token; a
/// fired token yields [`pulse_core::QueueError::Cancelled`].
#[derive(Debug, Clone)]
pub struct Producer<L> {
    log: L,
    span: Span,
}

impl<L: StreamLog> Producer<L> {
    pub fn new(log: L) -> Self {
        Self {
            log,
            span: info_span!("producer"),
        }
    }

    /// Log under `span` instead of the default `producer` span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    /// Create `stream` and `group` if missing, with the group positioned at
    /// the start of history.
    ///
    /// Safe to call from every process at startup: an existing group is
    /// success.
    pub async fn ensure_consumer_group(
        &self,
        cancel: &CancellationToken,
        stream: &str,
        group: &str,
    ) -> QueueResult<()> {
        let created = cancellable(cancel, self.log.create_group(stream, group, RecordId::ZERO))
            .instrument(self.span.clone())
            .await?;

        match created {
            GroupCreation::Created => {
                debug!(parent: &self.span, stream, group, "consumer group created")
            }
            GroupCreation::AlreadyExists => {
                debug!(parent: &self.span, stream, group, "consumer group already exists")
            }
        }
        Ok(())
    }

    /// Encode `payload` and append it under both payload field names.
    pub async fn add_job(
        &self,
        cancel: &CancellationToken,
        stream: &str,
        payload: &Payload,
    ) -> QueueResult<RecordId> {
        let body = payload::encode(payload)?;
        self.add_raw_job(cancel, stream, &body).await
    }

    /// Append an already-encoded JSON body under both payload field names.
    ///
    /// The body is stored as given; readers will reject it at decode time if
    /// it is not a JSON object.
    pub async fn add_raw_job(
        &self,
        cancel: &CancellationToken,
        stream: &str,
        body: &str,
    ) -> QueueResult<RecordId> {
        let fields = payload::record_fields(body);
        let id = cancellable(cancel, self.log.append(stream, &fields))
            .instrument(self.span.clone())
            .await?;

        debug!(parent: &self.span, stream, record_id = %id, bytes = body.len(), "job appended");
        Ok(id)
    }

    /// Append a task job to [`DEFAULT_STREAM`].
    ///
    /// `job_type` is written as both `job_type` and `type`, next to
    /// `workspace_id`. `None` is an empty payload.
    pub async fn add_task_job(
        &self,
        cancel: &CancellationToken,
        job_type: &str,
        workspace_id: &str,
        payload: Option<Payload>,
    ) -> QueueResult<RecordId> {
        let payload = task_payload(job_type, workspace_id, payload);
        self.add_job(cancel, DEFAULT_STREAM, &payload).await
    }

    pub async fn stream_exists(&self, cancel: &CancellationToken, stream: &str) -> QueueResult<bool> {
        cancellable(cancel, self.log.stream_exists(stream))
            .instrument(self.span.clone())
            .await
    }
}
