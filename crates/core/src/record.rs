//! Records as seen by producers and consumers.

use std::collections::HashMap;

use crate::error::{QueueError, QueueResult};
use crate::id::RecordId;
use crate::job::Job;
use crate::payload::{self, LEGACY_PAYLOAD_FIELD, PAYLOAD_FIELD, Payload};

/// An immutable entry of a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRecord {
    pub id: RecordId,
    pub fields: HashMap<String, String>,
    /// Fields whose stored bytes were not UTF-8; absent from `fields`.
    pub invalid_fields: Vec<String>,
}

impl StreamRecord {
    pub fn new(id: RecordId, fields: HashMap<String, String>) -> Self {
        Self {
            id,
            fields,
            invalid_fields: Vec::new(),
        }
    }

    /// Record a field that could not be read as text.
    pub fn with_invalid_field(mut self, name: impl Into<String>) -> Self {
        self.invalid_fields.push(name.into());
        self
    }

    /// Decode the payload, primary field first.
    ///
    /// A payload field holding non-UTF-8 bytes is a decode error, unless the
    /// primary field already carries a usable value.
    pub fn payload(&self) -> QueueResult<Payload> {
        for name in [PAYLOAD_FIELD, LEGACY_PAYLOAD_FIELD] {
            if self.invalid_fields.iter().any(|f| f == name) {
                return Err(QueueError::decode(format!(
                    "field {name:?} is not valid UTF-8"
                )));
            }
            if self.fields.get(name).is_some_and(|v| !v.is_empty()) {
                break;
            }
        }
        payload::parse_payload(&self.fields)
    }

    pub fn job(&self) -> QueueResult<Job> {
        self.payload().map(Job::new)
    }
}

/// One page of a PEL reclaim scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReclaimBatch {
    /// Records now owned by the claiming consumer.
    pub records: Vec<StreamRecord>,
    /// Where the next page starts; [`RecordId::ZERO`] once the scan is done.
    pub next_cursor: RecordId,
}

impl ReclaimBatch {
    pub fn is_exhausted(&self) -> bool {
        self.next_cursor.is_zero()
    }
}
