//! `pulse-core`: queue building blocks.
//!
//! Identifiers, records, the payload codec and the error model. No IO.

pub mod error;
pub mod id;
pub mod job;
pub mod payload;
pub mod record;

pub use error::{QueueError, QueueResult};
pub use id::{ConsumerIdentity, RecordId, DEFAULT_CONSUMER_NAME};
pub use job::{job_types, task_payload, Job, DEFAULT_STREAM};
pub use payload::{parse_payload, Payload, LEGACY_PAYLOAD_FIELD, PAYLOAD_FIELD};
pub use record::{ReclaimBatch, StreamRecord};
