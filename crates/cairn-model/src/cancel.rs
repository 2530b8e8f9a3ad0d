//! Cancellation helpers shared by every blocking call.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::CollectionError;
use crate::CollectionResult;

/// Race `fut` against `cancel`.
///
/// Returns `CollectionError::Cancelled` as soon as the token fires; the
/// inner future is dropped at that point.
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> CollectionResult<T>
where
    F: Future<Output = CollectionResult<T>>,
{
    if cancel.is_cancelled() {
        return Err(CollectionError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CollectionError::Cancelled),
        out = fut => out,
    }
}
