//! Per-call timeout for collaborator requests.

use std::future::Future;
use std::time::Duration;

use formalizer_core::CollaboratorError;

/// Awaits `call`, turning an elapsed `limit` into [`CollaboratorError::Timeout`].
pub async fn bounded<T, F>(
    collaborator: &'static str,
    limit: Duration,
    call: F,
) -> Result<T, CollaboratorError>
where
    F: Future<Output = Result<T, CollaboratorError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(CollaboratorError::Timeout {
            collaborator,
            seconds: limit.as_secs(),
        }),
    }
}
