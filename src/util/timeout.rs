//! Timeout helpers.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::KilnError;

/// Wrap a future with a timeout.
pub async fn with_timeout<T>(
    duration: Duration,
    future: impl Future<Output = Result<T, KilnError>>,
) -> Result<T, KilnError> {
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(KilnError::Timeout(duration.as_millis() as u64)),
    }
}

/// Race a future against a timeout and a cancellation token.
///
/// Cancellation wins over completion when both are ready.
pub async fn with_timeout_or_cancel<T>(
    duration: Duration,
    cancel: &CancellationToken,
    future: impl Future<Output = Result<T, KilnError>>,
) -> Result<T, KilnError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(KilnError::Canceled),
        result = with_timeout(duration, future) => result,
    }
}
