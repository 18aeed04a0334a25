//! Fixed-size worker pool with explicit join and error collection.
//!
//! Each unit of work runs on its own tokio task, at most `size` at a time.
//! Results are merged on the calling task after each join, so the merged
//! accumulator is never shared between workers.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

/// A unit of work that failed or panicked.
#[derive(Debug, Clone)]
pub struct WorkerFailure {
    /// Position of the work item in the input list.
    pub index: usize,
    pub error: String,
}

/// Joined result of a pool run.
#[derive(Debug)]
pub struct PoolOutcome<A> {
    pub merged: A,
    pub completed: usize,
    pub failures: Vec<WorkerFailure>,
}

impl<A> PoolOutcome<A> {
    pub fn all_failed(&self) -> bool {
        self.completed == 0 && !self.failures.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    name: &'static str,
    size: usize,
}

impl WorkerPool {
    pub fn new(name: &'static str, size: usize) -> Self {
        Self {
            name,
            size: size.max(1),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `work` over every item, folding successful results into `init`
    /// with `merge`. Returns once every task has joined.
    pub async fn run<I, T, A, W, Fut, M>(
        &self,
        items: Vec<I>,
        work: W,
        init: A,
        mut merge: M,
    ) -> PoolOutcome<A>
    where
        I: Send + 'static,
        T: Send + 'static,
        W: Fn(usize, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        M: FnMut(&mut A, T),
    {
        let permits = Arc::new(Semaphore::new(self.size));
        let work = Arc::new(work);
        let mut tasks = JoinSet::new();

        for (index, item) in items.into_iter().enumerate() {
            let permits = Arc::clone(&permits);
            let work = Arc::clone(&work);
            tasks.spawn(async move {
                // The semaphore is never closed.
                let _permit = permits.acquire_owned().await;
                (index, work(index, item).await)
            });
        }

        let mut outcome = PoolOutcome {
            merged: init,
            completed: 0,
            failures: Vec::new(),
        };

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(value))) => {
                    debug!(pool = self.name, worker = index, "worker finished");
                    merge(&mut outcome.merged, value);
                    outcome.completed += 1;
                }
                Ok((index, Err(e))) => {
                    error!(pool = self.name, worker = index, error = %format!("{:#}", e), "worker failed");
                    outcome.failures.push(WorkerFailure {
                        index,
                        error: format!("{:#}", e),
                    });
                }
                Err(join_err) => {
                    error!(pool = self.name, error = %join_err, "worker panicked");
                    outcome.failures.push(WorkerFailure {
                        index: usize::MAX,
                        error: join_err.to_string(),
                    });
                }
            }
        }

        outcome
    }
}
