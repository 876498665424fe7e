//! Queue error model.

use thiserror::Error;

/// Result type used across the queue layer.
pub type QueueResult<T> = Result<T, QueueError>;

/// Queue-level error.
///
/// Variants follow the failure's recoverability rather than its origin:
/// only [`QueueError::Transport`] is worth retrying. Decode/encode failures
/// point at a caller bug or corrupted data, and cancellation is a caller
/// decision, not a failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The log could not be reached at construction time.
    #[error("connection error: {0}")]
    Connection(String),

    /// A single round trip to the log failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The payload could not be serialized.
    #[error("encode error: {0}")]
    Encode(String),

    /// A record field held bytes that are not a valid encoded payload.
    #[error("decode error: {0}")]
    Decode(String),

    /// The record carries neither the primary nor the legacy payload field.
    #[error("no payload in record")]
    MissingPayload,

    /// The caller's cancellation token fired before the operation finished.
    #[error("operation cancelled")]
    Cancelled,
}

impl QueueError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Whether a retry of the same operation can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Whether the payload itself is at fault (a missing field counts).
    pub fn is_payload_error(&self) -> bool {
        matches!(self, Self::Encode(_) | Self::Decode(_) | Self::MissingPayload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_is_retryable() {
        assert!(QueueError::transport("reset by peer").is_retryable());
        assert!(!QueueError::connection("refused").is_retryable());
        assert!(!QueueError::decode("eof").is_retryable());
        assert!(!QueueError::MissingPayload.is_retryable());
        assert!(!QueueError::Cancelled.is_retryable());
    }

    #[test]
    fn missing_payload_is_a_payload_error() {
        assert!(QueueError::MissingPayload.is_payload_error());
        assert!(QueueError::encode("nan").is_payload_error());
        assert!(!QueueError::transport("timeout").is_payload_error());
    }
}
