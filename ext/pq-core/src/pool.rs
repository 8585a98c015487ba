//! Reusable worker pool sized on demand
//!
//! The pool is recreated whenever a call asks for a different thread count.
//! A retired pool is drained for a bounded grace period and then abandoned;
//! its threads exit once they run out of work.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rayon::{Scope, ThreadPool, ThreadPoolBuilder};

use crate::logger::Logger;
use crate::Result;

/// Count of tasks submitted to one pool that have not finished
#[derive(Debug, Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    /// Wait until no task is running, or the grace period ends.
    /// Returns whether the pool went idle.
    fn wait_idle(&self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        let mut count = self.count.lock();
        while *count > 0 {
            if self.idle.wait_until(&mut count, deadline).timed_out() {
                return *count == 0;
            }
        }
        true
    }
}

/// Marks one task as running until dropped
pub(crate) struct TaskGuard(Arc<InFlight>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        let mut count = self.0.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.0.idle.notify_all();
        }
    }
}

/// A live pool of a fixed number of threads
#[derive(Clone)]
pub struct PoolHandle {
    pool: Arc<ThreadPool>,
    in_flight: Arc<InFlight>,
    threads: usize,
}

impl std::fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolHandle")
            .field("threads", &self.threads)
            .finish()
    }
}

impl PoolHandle {
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Register a task; the returned guard must live until it finishes
    pub(crate) fn track(&self) -> TaskGuard {
        *self.in_flight.count.lock() += 1;
        TaskGuard(Arc::clone(&self.in_flight))
    }

    /// Run `op` on the pool; every task spawned in the scope is joined on return
    pub(crate) fn scope<'scope, OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce(&Scope<'scope>) -> R + Send,
        R: Send,
    {
        self.pool.scope(op)
    }
}

/// Owner of the current pool; `acquire` and `shutdown` are mutually exclusive
pub struct WorkerPool {
    current: Mutex<Option<PoolHandle>>,
    resize_grace: Duration,
    shutdown_grace: Duration,
}

impl WorkerPool {
    pub fn new(resize_grace: Duration, shutdown_grace: Duration) -> Self {
        Self {
            current: Mutex::new(None),
            resize_grace,
            shutdown_grace,
        }
    }

    /// Pool with exactly `threads` workers, rebuilding it when the count changes
    pub fn acquire(&self, threads: usize, logger: &Logger) -> Result<PoolHandle> {
        let threads = threads.max(1);
        let mut current = self.current.lock();

        if let Some(handle) = current.as_ref() {
            if handle.threads == threads {
                return Ok(handle.clone());
            }
        }

        if let Some(old) = current.take() {
            logger.debug(|| {
                format!(
                    "Resizing worker pool from {} to {} threads",
                    old.threads, threads
                )
            });
            Self::retire(old, self.resize_grace, logger);
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("pq-worker-{}", i))
            .build()?;
        let handle = PoolHandle {
            pool: Arc::new(pool),
            in_flight: Arc::new(InFlight::default()),
            threads,
        };
        *current = Some(handle.clone());
        Ok(handle)
    }

    /// Drain and drop the current pool
    pub fn shutdown(&self, logger: &Logger) {
        let mut current = self.current.lock();
        if let Some(old) = current.take() {
            Self::retire(old, self.shutdown_grace, logger);
        }
    }

    /// Thread count of the live pool, if any
    pub fn current_threads(&self) -> Option<usize> {
        self.current.lock().as_ref().map(|h| h.threads)
    }

    fn retire(old: PoolHandle, grace: Duration, logger: &Logger) {
        if !old.in_flight.wait_idle(grace) {
            logger.warn(|| {
                format!(
                    "Worker pool of {} threads still busy after {:?}; abandoning it",
                    old.threads, grace
                )
            });
        }
    }
}
