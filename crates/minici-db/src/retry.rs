//! Retry of transient store failures.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::DbResult;

const ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(250);

/// Run `op` up to three times, doubling the pause after each transient
/// failure. Permanent failures are returned immediately.
pub async fn with_retry<T, F, Fut>(what: &str, mut op: F) -> DbResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DbResult<T>>,
{
    let mut backoff = INITIAL_BACKOFF;
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < ATTEMPTS => {
                warn!(attempt, error = %err, "{what} failed, retrying in {backoff:?}");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
