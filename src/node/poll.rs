//! Bounded polling
//!
//! Evaluates a condition immediately and then at a fixed interval until it
//! yields a value or the deadline passes. Time comes from `tokio::time`, so
//! tests drive it with a paused clock instead of real delay.

use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Poll `condition` every `interval` until it returns `Some` or `timeout`
/// elapses
///
/// Returns `Ok(None)` on timeout. An error from the condition aborts the
/// poll and is returned as-is.
pub async fn poll_immediate<T, F, Fut>(
    interval: Duration,
    timeout: Duration,
    mut condition: F,
) -> Result<Option<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = condition().await? {
            return Ok(Some(value));
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        sleep(interval.min(deadline - now)).await;
    }
}
