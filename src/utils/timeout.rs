//! Timeout helpers around `tokio::time::timeout`.

use crate::error::{BounceError, Result};
use std::future::Future;
use std::time::Duration;

/// Default per-phase I/O timeout (connect, send, ACK wait)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Run `future`, mapping an elapsed deadline to `BounceError::Timeout`.
pub async fn with_timeout_error<F, T>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(BounceError::Timeout),
    }
}

/// Like [`with_timeout_error`] but a `None` duration waits indefinitely.
pub async fn with_optional_timeout<F, T>(future: F, duration: Option<Duration>) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match duration {
        Some(d) => with_timeout_error(future, d).await,
        None => future.await,
    }
}
