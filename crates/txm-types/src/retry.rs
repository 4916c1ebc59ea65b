use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::TmError;

/// Retries `op` with exponential backoff (capped at `max_backoff`) until it
/// succeeds, returns a non-retriable error, or `cancel` fires.
///
/// Grounded on `updateInflightSet`'s use of `m.retry.Do` in the original
/// implementation: persistence/connector transient failures are retried
/// indefinitely, bounded only by context cancellation — the backoff cap here
/// bounds wait time between attempts, not the number of attempts.
pub async fn retry_until_cancelled<F, Fut, T>(
    label: &str,
    cancel: &CancellationToken,
    mut op: F
) -> Result<T, TmError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, TmError>>
{
    let mut backoff = Duration::from_millis(50);
    let max_backoff = Duration::from_secs(5);
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retriable() => {
                debug!(%label, error = %e, ?backoff, "retrying after transient failure");
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancel.cancelled() => return Err(TmError::Fatal),
                }
                backoff = (backoff * 2).min(max_backoff);
            }
            Err(e) => return Err(e)
        }
        if cancel.is_cancelled() {
            return Err(TmError::Fatal);
        }
    }
}
