//! Execution bridge - runs blocking venue calls on a bounded worker pool
//!
//! Jobs are handed to a fixed set of OS threads over a flume channel and the
//! result comes back over a one-shot flume channel the caller awaits, so the
//! async scheduler never blocks. A call that outlives its deadline is
//! abandoned: the caller gets `Error::Timeout`, the worker keeps running the
//! job to completion and its result is dropped.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{debug, error};

use crate::core::{Error, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    name: String,
    jobs: flume::Sender<Job>,
    workers: usize,
    in_flight: AtomicUsize,
}

/// Counts one job as in flight until it is dropped, whether it ran, was
/// refused by a closed pool, or was abandoned while still queued.
struct InFlight(Arc<Shared>);

impl InFlight {
    fn enter(shared: Arc<Shared>) -> Self {
        shared.in_flight.fetch_add(1, Ordering::Relaxed);
        Self(shared)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Cloneable handle to a worker pool. Workers exit once every handle is dropped
/// and the queue drains.
#[derive(Clone)]
pub struct ExecutionBridge {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ExecutionBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionBridge")
            .field("name", &self.shared.name)
            .field("workers", &self.shared.workers)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl ExecutionBridge {
    /// Spawn `workers` threads (at least one) named after `name`.
    pub fn new(name: impl Into<String>, workers: usize) -> Result<Self> {
        let name = name.into();
        let workers = workers.max(1);
        // Queue depth bounds how many callers can wait on a saturated pool.
        let (tx, rx) = flume::bounded::<Job>(workers * 16);

        for idx in 0..workers {
            let rx = rx.clone();
            thread::Builder::new()
                .name(format!("{name}-bridge-{idx}"))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        job();
                    }
                })
                .map_err(|e| Error::Bridge(format!("failed to spawn worker for {name}: {e}")))?;
        }
        debug!(bridge = %name, workers, "execution bridge started");

        Ok(Self {
            shared: Arc::new(Shared {
                name,
                jobs: tx,
                workers,
                in_flight: AtomicUsize::new(0),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn workers(&self) -> usize {
        self.shared.workers
    }

    /// Jobs queued or running, including abandoned ones still on a worker.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::Relaxed)
    }

    /// Run `f` on the pool and await its result for at most `timeout`,
    /// queueing time included. A panic inside `f` surfaces as `Error::Bridge`.
    pub async fn run_blocking<F, T>(&self, operation: &str, f: F, timeout: Duration) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = flume::bounded(1);
        let guard = InFlight::enter(self.shared.clone());
        let op = operation.to_string();
        let job: Job = Box::new(move || {
            let outcome = catch_unwind(AssertUnwindSafe(f));
            if outcome.is_err() {
                error!(bridge = %guard.0.name, operation = %op, "blocking call panicked");
            }
            drop(guard);
            // Receiver is gone when the caller timed out.
            let _ = done_tx.send(outcome);
        });

        let call = async {
            if self.shared.jobs.send_async(job).await.is_err() {
                return Err(Error::Bridge(format!("{} worker pool is closed", self.shared.name)));
            }
            match done_rx.recv_async().await {
                Ok(Ok(result)) => result,
                Ok(Err(_panic)) => Err(Error::Bridge(format!("{operation} panicked on {}", self.shared.name))),
                Err(_) => Err(Error::Bridge(format!("{operation} dropped its result"))),
            }
        };

        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                debug!(bridge = %self.shared.name, operation, ?timeout, "blocking call abandoned");
                Err(Error::timeout(format!("{}.{}", self.shared.name, operation), timeout))
            }
        }
    }
}
