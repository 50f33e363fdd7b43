//! Worker pool abstraction.
//!
//! A `WorkerPool` runs decoded requests away from the reactor threads so
//! a slow handler never stalls readiness processing. Workers may block.
//!
//! # Implementors
//!
//! - `FixedPool` (default): N OS threads sharing a bounded lock-free
//!   queue. No dynamic scaling.
//! - `InlinePool` (testing): runs the task synchronously in the caller.
//!   Only for unit tests: blocks the event loop!

use crate::error::Rejection;

/// A unit of work handed to the pool. Owns everything it touches.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Executes tasks on pool threads.
///
/// **Contract:**
/// - `execute()` must NEVER block the caller. If the pool is full it
///   returns `Err(Rejection::QueueFull)`; after `shutdown()` it returns
///   `Err(Rejection::PoolStopped)`.
/// - A rejected task is dropped, releasing whatever it owned.
/// - Tasks are started in submission order.
pub trait WorkerPool: Send + Sync {
    fn execute(&self, task: Task) -> Result<(), Rejection>;

    /// Tasks waiting for a worker.
    fn queued(&self) -> usize;

    /// Workers currently running a task.
    fn active_workers(&self) -> usize;

    fn total_workers(&self) -> usize;

    /// Stop accepting tasks and let workers exit.
    fn shutdown(&self);
}
