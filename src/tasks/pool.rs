//! Bounded Task Pool
//!
//! Runs independently scheduled tasks with a ceiling on how many may be
//! outstanding at once. Admission waits for a running task to finish, and
//! every finished task's outcome is kept in completion order until drained.

use std::collections::VecDeque;
use std::fmt::Display;
use std::future::Future;

use futures::stream::{self, Stream, StreamExt};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, warn};

use crate::error::TaskError;

/// Result of one task: its value, or why it did not produce one.
pub type Outcome<T, E> = Result<T, TaskError<E>>;

// == Task Pool ==
pub struct TaskPool<T, E> {
    /// Tasks admitted and not yet harvested
    running: JoinSet<Result<T, E>>,
    /// Ceiling on `running`, None = unbounded
    max_concurrency: Option<usize>,
    /// Harvested outcomes, oldest completion first
    finished: VecDeque<Outcome<T, E>>,
}

impl<T, E> TaskPool<T, E>
where
    T: Send + 'static,
    E: Display + Send + 'static,
{
    /// Creates a pool. A ceiling of zero is treated as one.
    pub fn new(max_concurrency: Option<usize>) -> Self {
        Self {
            running: JoinSet::new(),
            max_concurrency: max_concurrency.map(|max| max.max(1)),
            finished: VecDeque::new(),
        }
    }

    pub fn bounded(max_concurrency: usize) -> Self {
        Self::new(Some(max_concurrency))
    }

    pub fn unbounded() -> Self {
        Self::new(None)
    }

    // == Submit ==
    /// Admits an async task, first waiting for room under the ceiling.
    ///
    /// While waiting, every task that has finished is harvested, failures
    /// included; a failed task never aborts the pool.
    pub async fn submit<F>(&mut self, task: F)
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.make_room().await;
        self.running.spawn(task);
    }

    /// Admits a blocking task to run on a worker thread, first waiting for
    /// room under the ceiling.
    pub async fn submit_blocking<F>(&mut self, task: F)
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        self.make_room().await;
        self.running.spawn_blocking(task);
    }

    async fn make_room(&mut self) {
        self.harvest();

        let Some(max) = self.max_concurrency else {
            return;
        };

        while self.running.len() >= max {
            debug!(running = self.running.len(), max, "pool full, waiting");
            match self.running.join_next().await {
                Some(result) => self.record(result),
                None => break,
            }
            self.harvest();
        }
    }

    // == Harvest ==
    /// Collects every task that has already finished, without waiting.
    ///
    /// Returns the number of tasks harvested.
    pub fn harvest(&mut self) -> usize {
        let mut harvested = 0;
        while let Some(result) = self.running.try_join_next() {
            self.record(result);
            harvested += 1;
        }
        harvested
    }

    fn record(&mut self, result: Result<Result<T, E>, JoinError>) {
        let outcome = match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                warn!("pool task failed: {}", err);
                Err(TaskError::Failed(err))
            }
            Err(err) => {
                let err = TaskError::from(err);
                warn!("pool task did not finish: {}", err);
                Err(err)
            }
        };
        self.finished.push_back(outcome);
    }

    // == Accessors ==
    /// Tasks admitted and not yet harvested.
    pub fn running(&self) -> usize {
        self.running.len()
    }

    /// Outcomes harvested and not yet drained.
    pub fn finished(&self) -> usize {
        self.finished.len()
    }

    pub fn max_concurrency(&self) -> Option<usize> {
        self.max_concurrency
    }

    pub fn is_empty(&self) -> bool {
        self.running.is_empty() && self.finished.is_empty()
    }

    // == Drain ==
    /// Yields the outcome of every task, in completion order, waiting for
    /// running tasks as needed.
    ///
    /// The stream consumes the pool and can be walked only once. Running
    /// tasks are awaited, never cancelled.
    pub fn drain_all(self) -> impl Stream<Item = Outcome<T, E>> {
        stream::unfold(self, |mut pool| async move {
            if let Some(outcome) = pool.finished.pop_front() {
                return Some((outcome, pool));
            }

            match pool.running.join_next().await {
                Some(result) => pool.record(result),
                None => return None,
            }
            pool.harvest();
            pool.finished.pop_front().map(|outcome| (outcome, pool))
        })
    }

    /// Drains the pool into a vector of outcomes in completion order.
    pub async fn finish(self) -> Vec<Outcome<T, E>> {
        self.drain_all().collect().await
    }
}
