//! Pool owning the spawned worker tasks of a harness.

use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::bench_error;
use crate::error::{BenchResult, ErrorKind};

/// Identifies a worker within its harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerId {
    /// A producer worker, numbered from zero.
    Producer(u32),
    /// A consumer worker, numbered from zero.
    Consumer(u32),
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerId::Producer(index) => write!(f, "producer-{index}"),
            WorkerId::Consumer(index) => write!(f, "consumer-{index}"),
        }
    }
}

#[derive(Debug)]
struct WorkerPoolInner {
    /// Owns all spawned worker tasks.
    join_set: JoinSet<(WorkerId, BenchResult<()>)>,
}

/// Pool of load worker tasks.
///
/// Workers are spawned into the pool and awaited collectively: [`WorkerPool::wait_all`]
/// blocks until every worker has finished and aggregates their failures.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    inner: Arc<Mutex<WorkerPoolInner>>,
}

impl WorkerPool {
    /// Creates a new empty worker pool.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(WorkerPoolInner {
                join_set: JoinSet::new(),
            })),
        }
    }

    /// Spawns a worker task into the pool.
    pub async fn spawn<F>(&self, worker_id: WorkerId, future: F)
    where
        F: Future<Output = BenchResult<()>> + Send + 'static,
    {
        let mut inner = self.inner.lock().await;
        inner.join_set.spawn(async move {
            let result = future.await;
            (worker_id, result)
        });

        debug!(%worker_id, "spawned worker in pool");
    }

    /// Waits for all workers to complete.
    ///
    /// Worker errors are collected and returned together once every worker has
    /// finished; a single failing worker does not cut the others short.
    pub async fn wait_all(&self) -> BenchResult<()> {
        let mut errors = Vec::new();

        loop {
            let result = {
                let mut inner = self.inner.lock().await;
                inner.join_set.join_next().await
            };

            let Some(result) = result else {
                // JoinSet is empty, all workers have completed.
                break;
            };

            match result {
                Ok((worker_id, worker_result)) => {
                    if let Err(err) = worker_result {
                        error!(%worker_id, error = %err, "worker completed with error");
                        errors.push(err);
                    }
                }
                Err(join_err) => {
                    if join_err.is_cancelled() {
                        debug!("worker task was cancelled");
                    } else {
                        errors.push(bench_error!(
                            ErrorKind::WorkerPanic,
                            "Load worker panicked",
                            source: join_err
                        ));
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into())
        }
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}
