//! Interval Task
//!
//! Background task that runs a unit of work at a fixed interval.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What an interval run asks the runner to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Continue,
    Stop,
}

/// Spawns a background task that calls `work` every `interval`.
///
/// The task sleeps first, then runs `work`. A failed run is logged and the
/// loop keeps going. The loop ends when `work` returns [`Tick::Stop`] or when
/// the returned handle is aborted.
///
/// # Example
/// ```ignore
/// let handle = spawn_interval_task("sweeper", Duration::from_secs(1), || async {
///     Ok::<_, String>(Tick::Continue)
/// });
/// // Later, during shutdown:
/// handle.abort();
/// ```
pub fn spawn_interval_task<F, Fut, E>(
    name: &'static str,
    interval: Duration,
    mut work: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Tick, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    tokio::spawn(async move {
        info!(task = name, ?interval, "starting interval task");

        loop {
            tokio::time::sleep(interval).await;

            match work().await {
                Ok(Tick::Continue) => debug!(task = name, "interval run finished"),
                Ok(Tick::Stop) => break,
                Err(err) => warn!(task = name, "interval run failed: {}", err),
            }
        }

        info!(task = name, "interval task stopped");
    })
}
