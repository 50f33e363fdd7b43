//! `FixedPool`: default `WorkerPool` implementation.
//!
//! Spawns N OS threads at creation. Workers pop tasks from a bounded
//! lock-free MPMC queue and run them; a panicking task is caught and
//! logged, and the worker moves on.
//!
//! No dynamic scaling. Simple, predictable, safe.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;

use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;

use nioloop_core::config::defaults;
use nioloop_core::error::{Rejection, Result};
use nioloop_core::worker::{Task, WorkerPool};

/// Shared state between submitters and workers.
struct PoolInner {
    /// Work queue: loops → workers.
    work_queue: ArrayQueue<Task>,
    /// Number of workers currently running a task.
    active: AtomicUsize,
    /// Once set, `execute` rejects and workers exit after draining.
    shutdown: AtomicBool,
    /// Tasks that panicked.
    panics: AtomicUsize,
}

pub struct FixedPool {
    inner: Arc<PoolInner>,
    threads: Vec<Thread>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    next: AtomicUsize,
}

impl FixedPool {
    /// Create a pool with `n` workers.
    ///
    /// `queue_depth`: max pending tasks before `execute` rejects.
    pub fn new(n: usize, queue_depth: usize) -> Result<Self> {
        let n = n.max(1);
        let inner = Arc::new(PoolInner {
            work_queue: ArrayQueue::new(queue_depth.max(1)),
            active: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            panics: AtomicUsize::new(0),
        });

        let mut handles = Vec::with_capacity(n);
        for worker_id in 0..n {
            let worker_inner = Arc::clone(&inner);
            let spawned = thread::Builder::new()
                .name(format!("nioloop-worker-{}", worker_id))
                .spawn(move || worker_loop(worker_inner, worker_id));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    // Let the workers that did start exit on their own.
                    inner.shutdown.store(true, Ordering::Release);
                    for h in &handles {
                        h.thread().unpark();
                    }
                    return Err(e.into());
                }
            }
        }
        let threads = handles.iter().map(|h| h.thread().clone()).collect();

        Ok(FixedPool {
            inner,
            threads,
            handles: Mutex::new(handles),
            next: AtomicUsize::new(0),
        })
    }

    /// Default pool sizing: one worker per available CPU.
    pub fn auto_sized(queue_depth: usize) -> Result<Self> {
        Self::new(defaults::parallelism(), queue_depth)
    }

    /// Tasks that panicked since creation.
    pub fn panics(&self) -> usize {
        self.inner.panics.load(Ordering::Relaxed)
    }

    /// Shut down and wait for every worker to exit.
    pub fn join(&self) {
        self.shutdown();
        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
        for h in handles {
            let _ = h.join();
        }
    }
}

impl WorkerPool for FixedPool {
    fn execute(&self, task: Task) -> std::result::Result<(), Rejection> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(Rejection::PoolStopped);
        }
        self.inner
            .work_queue
            .push(task)
            .map_err(|_| Rejection::QueueFull)?;
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.threads.len();
        self.threads[i].unpark();
        Ok(())
    }

    fn queued(&self) -> usize {
        self.inner.work_queue.len()
    }

    fn active_workers(&self) -> usize {
        self.inner.active.load(Ordering::Relaxed)
    }

    fn total_workers(&self) -> usize {
        self.threads.len()
    }

    fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        for t in &self.threads {
            t.unpark();
        }
    }
}

impl Drop for FixedPool {
    fn drop(&mut self) {
        self.join();
    }
}

/// Worker thread main loop.
fn worker_loop(inner: Arc<PoolInner>, worker_id: usize) {
    loop {
        match inner.work_queue.pop() {
            Some(task) => {
                inner.active.fetch_add(1, Ordering::Relaxed);
                if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                    inner.panics.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(worker_id, "task panicked");
                }
                inner.active.fetch_sub(1, Ordering::Relaxed);
            }
            None => {
                if inner.shutdown.load(Ordering::Acquire) {
                    break;
                }
                // Submitters unpark one worker per task; the timeout covers
                // an unpark that lands on a busy worker.
                thread::park_timeout(Duration::from_millis(1));
            }
        }
    }
    tracing::trace!(worker_id, "worker exiting");
}

/// Runs every task synchronously on the submitting thread.
///
/// Only for tests: a slow task blocks whichever loop submitted it.
#[derive(Default)]
pub struct InlinePool {
    stopped: AtomicBool,
    executed: AtomicUsize,
}

impl InlinePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks run so far, panicked ones included.
    pub fn executed(&self) -> usize {
        self.executed.load(Ordering::Relaxed)
    }
}

impl WorkerPool for InlinePool {
    fn execute(&self, task: Task) -> std::result::Result<(), Rejection> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(Rejection::PoolStopped);
        }
        self.executed.fetch_add(1, Ordering::Relaxed);
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            tracing::error!("inline task panicked");
        }
        Ok(())
    }

    fn queued(&self) -> usize {
        0
    }

    fn active_workers(&self) -> usize {
        0
    }

    fn total_workers(&self) -> usize {
        0
    }

    fn shutdown(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}
