//! Deadline enforcement for upstream operations.
//!
//! Only dialing the responder carries a deadline; an established exchange
//! runs until the responder finishes or the socket fails.

use std::future::Future;
use std::time::Duration;

use tokio::time::error::Elapsed;

/// Run `fut` under an optional deadline. `None` waits indefinitely.
pub async fn with_deadline<F>(limit: Option<Duration>, fut: F) -> Result<F::Output, Elapsed>
where
    F: Future,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await,
        None => Ok(fut.await),
    }
}

/// Interpret a seconds setting where zero disables the deadline.
pub fn from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
