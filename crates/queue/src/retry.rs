//! Retry with exponential backoff, jitter and cancellation.
//!
//! The retrier never looks at the error it gets back: every failure is
//! retried until attempts run out. Callers that only want to retry some
//! failures (say, [`pulse_core::QueueError::is_retryable`]) filter inside the
//! operation.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use pulse_core::QueueError;

/// Upper bound on the un-jittered wait between attempts.
pub const MAX_BACKOFF: Duration = Duration::from_secs(8);

/// Jitter is uniform in `±JITTER_FRACTION` of the computed wait.
pub const JITTER_FRACTION: f64 = 0.25;

/// Retry policy configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Total attempts including the first one (0 is treated as 1).
    pub max_attempts: u32,
    /// Wait after the first failure; doubled after each further failure.
    pub base_delay: Duration,
    /// Cap applied before jitter.
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: MAX_BACKOFF,
        }
    }
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay: MAX_BACKOFF,
        }
    }

    /// `min(base * 2^retry, max_delay)` for the `retry`-th wait (0-indexed).
    pub fn nominal_delay(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// [`Self::nominal_delay`] shifted by uniform jitter of up to ±25%.
    pub fn jittered_delay<R: Rng + ?Sized>(&self, retry: u32, rng: &mut R) -> Duration {
        let nominal = self.nominal_delay(retry);
        let nanos = nominal.as_nanos() as f64;
        let spread = nanos * JITTER_FRACTION;
        if spread < 1.0 {
            return nominal;
        }

        let offset = rng.gen_range(-spread..=spread);
        Duration::from_nanos((nanos + offset).max(0.0) as u64)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Why [`retry_with_backoff`] gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// The token fired; the operation was not retried further.
    Cancelled,
    /// Every attempt failed; `source` is the last failure.
    Exhausted { attempts: u32, source: E },
}

impl<E> RetryError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The last operation failure, if attempts ran out.
    pub fn into_source(self) -> Option<E> {
        match self {
            Self::Cancelled => None,
            Self::Exhausted { source, .. } => Some(source),
        }
    }
}

impl<E: core::fmt::Display> core::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Cancelled => f.write_str("retry cancelled"),
            Self::Exhausted { attempts, source } => {
                write!(f, "failed after {attempts} attempts: {source}")
            }
        }
    }
}

impl<E> std::error::Error for RetryError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Cancelled => None,
            Self::Exhausted { source, .. } => Some(source),
        }
    }
}

impl From<RetryError<QueueError>> for QueueError {
    fn from(err: RetryError<QueueError>) -> Self {
        match err {
            RetryError::Cancelled => QueueError::Cancelled,
            RetryError::Exhausted { source, .. } => source,
        }
    }
}

/// Run `operation` until it succeeds or `policy.max_attempts` is reached.
///
/// The wait after failed attempt `k` is [`BackoffPolicy::jittered_delay`]`(k)`.
/// Only the wait is raced against `cancel`; an in-flight attempt is left to
/// finish (operations that should stop early take the token themselves). A
/// token that is already cancelled returns before the first attempt.
pub async fn retry_with_backoff<T, E, F, Fut>(
    cancel: &CancellationToken,
    policy: BackoffPolicy,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: core::fmt::Display,
{
    if cancel.is_cancelled() {
        return Err(RetryError::Cancelled);
    }

    let attempts = policy.attempts();
    let mut failed = 0;

    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        failed += 1;
        if failed >= attempts {
            return Err(RetryError::Exhausted {
                attempts,
                source: err,
            });
        }

        let delay = next_delay(&policy, failed - 1);
        debug!(
            attempt = failed,
            max_attempts = attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "operation failed; backing off"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

fn next_delay(policy: &BackoffPolicy, retry: u32) -> Duration {
    policy.jittered_delay(retry, &mut rand::thread_rng())
}
