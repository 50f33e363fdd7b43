//! Readiness selector abstraction (the loop's polling primitive).
//!
//! A `Selector` watches non-blocking descriptors and reports which of
//! them are ready. The event loop owns exactly one and never shares it.
//!
//! # Implementors
//!
//! - `EpollSelector` (default): level-triggered epoll, with the loop's
//!   notifier registered under `WAKE_TOKEN`.
//!
//! Tests drive the loop with scripted selectors to exercise the
//! rebuild path without a misbehaving kernel.

use std::os::fd::BorrowedFd;
use std::time::Duration;

use crate::error::Result;

/// Registration key; the loop uses session ids.
pub type Token = u64;

/// Reserved for the wakeup descriptor. Never reported in `Readiness`.
pub const WAKE_TOKEN: Token = u64::MAX;

/// Readiness interest for a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub const READABLE: Self = Self { readable: true, writable: false };
    pub const WRITABLE: Self = Self { readable: false, writable: true };
    pub const BOTH: Self = Self { readable: true, writable: true };
}

/// One ready descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
    /// Peer hung up or the descriptor is in an error state.
    pub closed: bool,
}

/// Result of one `select` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectOutcome {
    /// Entries appended to the readiness vector.
    pub ready: usize,
    /// The notifier fired during this call.
    pub woken: bool,
}

/// Polling primitive driven by one event loop.
///
/// **Contract:**
/// - `select` clears `events`, fills it, and blocks at most `timeout`
///   (`Duration::ZERO` means do not block).
/// - Wakeups are drained internally and reported via `woken`, never as
///   readiness.
/// - `rebuild` returns a fresh, empty selector that shares the same
///   notifier. The caller re-registers its descriptors.
pub trait Selector: Send {
    fn register(&mut self, fd: BorrowedFd<'_>, token: Token, interest: Interest) -> Result<()>;

    fn reregister(&mut self, fd: BorrowedFd<'_>, token: Token, interest: Interest) -> Result<()>;

    fn deregister(&mut self, fd: BorrowedFd<'_>) -> Result<()>;

    fn select(&mut self, events: &mut Vec<Readiness>, timeout: Duration) -> Result<SelectOutcome>;

    fn rebuild(&self) -> Result<Self>
    where
        Self: Sized;
}
