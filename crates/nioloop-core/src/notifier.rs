//! Cross-thread wakeup abstraction.
//!
//! A `Notifier` interrupts an event loop that is blocked inside its
//! selector so that freshly submitted events are seen promptly.
//!
//! # Implementors
//!
//! - `EventFdNotifier` (default): writes 1 to an eventfd that the
//!   selector watches under `WAKE_TOKEN`.

use std::os::fd::BorrowedFd;

use crate::error::Result;

/// Wakes a loop blocked in its selector.
///
/// **Contract:**
/// - `notify()` must NEVER block.
/// - Multiple calls before the loop wakes are coalesced into one wakeup.
/// - A notify that lands before the loop starts waiting is not lost: the
///   next wait returns immediately.
pub trait Notifier: Send + Sync {
    /// Signal the loop.
    fn notify(&self) -> Result<()>;

    /// Consume pending signals. Called by the loop after a wakeup.
    fn drain(&self);

    /// Descriptor the selector registers under `WAKE_TOKEN`.
    fn fd(&self) -> BorrowedFd<'_>;
}
