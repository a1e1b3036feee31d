//! Runtime Helpers
//!
//! Thin wrappers over the tokio scheduler: run blocking work on a worker
//! thread, and start a future after a delay.

use std::future::Future;
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};

/// Runs `f` on the blocking thread pool and waits for its result without
/// stalling the cooperative scheduler.
pub async fn run_blocking<F, T>(f: F) -> Result<T, JoinError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await
}

/// Spawns `fut` so that it starts running only after `delay`.
///
/// Must be called from within a tokio runtime.
pub fn start_after<F>(delay: Duration, fut: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        fut.await
    })
}
