//! Strongly-typed identifiers used across the queue.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QueueError;

/// Consumer name used when the caller does not supply one.
pub const DEFAULT_CONSUMER_NAME: &str = "consumer-1";

/// Identifier of a record within a stream.
///
/// Rendered as `<milliseconds>-<sequence>`. Ids are totally ordered and
/// strictly increasing within one stream. [`RecordId::ZERO`] (`0-0`) sorts
/// before every real record and doubles as the reclaim cursor sentinel.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct RecordId {
    ms: u64,
    seq: u64,
}

impl RecordId {
    /// The lowest id; start and end of a PEL scan.
    pub const ZERO: RecordId = RecordId { ms: 0, seq: 0 };

    pub fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    pub fn millis(&self) -> u64 {
        self.ms
    }

    pub fn sequence(&self) -> u64 {
        self.seq
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Smallest id strictly greater than `self`.
    pub fn successor(&self) -> Self {
        match self.seq.checked_add(1) {
            Some(seq) => Self { ms: self.ms, seq },
            None => Self {
                ms: self.ms.saturating_add(1),
                seq: 0,
            },
        }
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::ZERO
    }
}

impl core::fmt::Display for RecordId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for RecordId {
    type Err = QueueError;

    /// Accepts `<ms>-<seq>` or a bare `<ms>` (sequence 0).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || QueueError::decode(format!("RecordId: invalid stream id {s:?}"));

        let (ms, seq) = match s.split_once('-') {
            Some((ms, seq)) => (ms, seq),
            None => (s, "0"),
        };
        let ms = ms.parse::<u64>().map_err(|_| invalid())?;
        let seq = seq.parse::<u64>().map_err(|_| invalid())?;
        Ok(Self { ms, seq })
    }
}

impl From<RecordId> for String {
    fn from(value: RecordId) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for RecordId {
    type Error = QueueError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Who owns a pending entry: `{stream, group, consumer name}`.
///
/// Stable for the lifetime of a process. Two identities that differ only in
/// consumer name share the group's cursor but never receive the same new
/// record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsumerIdentity {
    stream: String,
    group: String,
    consumer: String,
}

impl ConsumerIdentity {
    /// An empty consumer name falls back to [`DEFAULT_CONSUMER_NAME`].
    pub fn new(
        stream: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
    ) -> Self {
        let consumer = consumer.into();
        Self {
            stream: stream.into(),
            group: group.into(),
            consumer: if consumer.is_empty() {
                DEFAULT_CONSUMER_NAME.to_string()
            } else {
                consumer
            },
        }
    }

    /// Identity with a process-unique consumer name (`consumer-<uuid v7>`).
    pub fn unique(stream: impl Into<String>, group: impl Into<String>) -> Self {
        Self::new(stream, group, format!("consumer-{}", Uuid::now_v7()))
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }
}

impl core::fmt::Display for ConsumerIdentity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}/{}", self.stream, self.group, self.consumer)
    }
}
