//! Racing log operations against a caller's cancellation token.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use pulse_core::{QueueError, QueueResult};

/// Run `fut` unless `cancel` fires first.
///
/// An already-cancelled token wins without polling `fut`.
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> QueueResult<T>
where
    F: Future<Output = QueueResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(QueueError::Cancelled),
        res = fut => res,
    }
}
