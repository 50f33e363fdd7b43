//! `EpollSelector`: default `Selector` implementation.
//!
//! Level-triggered epoll. The loop's notifier is registered under
//! `WAKE_TOKEN` at construction, so a rebuilt selector keeps receiving
//! the same wakeups without any cooperation from submitters.

use std::os::fd::BorrowedFd;
use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};

use nioloop_core::error::{NioError, Result};
use nioloop_core::notifier::Notifier;
use nioloop_core::selector::{Interest, Readiness, SelectOutcome, Selector, Token, WAKE_TOKEN};

/// Default number of readiness slots per `epoll_wait`.
pub const DEFAULT_EVENTS: usize = 1024;

pub struct EpollSelector {
    epoll: Epoll,
    notifier: Arc<dyn Notifier>,
    events: Vec<EpollEvent>,
}

impl EpollSelector {
    pub fn new(notifier: Arc<dyn Notifier>) -> Result<Self> {
        Self::with_capacity(notifier, DEFAULT_EVENTS)
    }

    pub fn with_capacity(notifier: Arc<dyn Notifier>, capacity: usize) -> Result<Self> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC).map_err(os)?;
        epoll
            .add(notifier.fd(), event(WAKE_TOKEN, Interest::READABLE))
            .map_err(os)?;
        Ok(Self {
            epoll,
            events: vec![EpollEvent::empty(); capacity.max(1)],
            notifier,
        })
    }
}

fn os(e: Errno) -> NioError {
    NioError::Io(e.into())
}

fn event(token: Token, interest: Interest) -> EpollEvent {
    let mut flags = EpollFlags::EPOLLRDHUP;
    if interest.readable {
        flags |= EpollFlags::EPOLLIN;
    }
    if interest.writable {
        flags |= EpollFlags::EPOLLOUT;
    }
    EpollEvent::new(flags, token)
}

/// Round up so a sub-millisecond timeout still blocks.
fn timeout_ms(timeout: Duration) -> EpollTimeout {
    if timeout.is_zero() {
        return EpollTimeout::ZERO;
    }
    let ms = timeout.as_nanos().div_ceil(1_000_000);
    EpollTimeout::try_from(ms).unwrap_or(EpollTimeout::MAX)
}

impl Selector for EpollSelector {
    fn register(&mut self, fd: BorrowedFd<'_>, token: Token, interest: Interest) -> Result<()> {
        self.epoll.add(fd, event(token, interest)).map_err(os)
    }

    fn reregister(&mut self, fd: BorrowedFd<'_>, token: Token, interest: Interest) -> Result<()> {
        self.epoll.modify(fd, &mut event(token, interest)).map_err(os)
    }

    fn deregister(&mut self, fd: BorrowedFd<'_>) -> Result<()> {
        self.epoll.delete(fd).map_err(os)
    }

    fn select(&mut self, events: &mut Vec<Readiness>, timeout: Duration) -> Result<SelectOutcome> {
        events.clear();
        let n = match self.epoll.wait(&mut self.events, timeout_ms(timeout)) {
            Ok(n) => n,
            Err(Errno::EINTR) => return Ok(SelectOutcome::default()),
            Err(e) => return Err(os(e)),
        };

        let mut outcome = SelectOutcome::default();
        for ev in &self.events[..n] {
            let token = ev.data();
            if token == WAKE_TOKEN {
                outcome.woken = true;
                self.notifier.drain();
                continue;
            }
            let flags = ev.events();
            events.push(Readiness {
                token,
                readable: flags.contains(EpollFlags::EPOLLIN),
                writable: flags.contains(EpollFlags::EPOLLOUT),
                closed: flags.intersects(
                    EpollFlags::EPOLLHUP | EpollFlags::EPOLLERR | EpollFlags::EPOLLRDHUP,
                ),
            });
        }
        outcome.ready = events.len();
        Ok(outcome)
    }

    fn rebuild(&self) -> Result<Self> {
        Self::with_capacity(self.notifier.clone(), self.events.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventfd_notifier::EventFdNotifier;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};
    use std::os::fd::AsFd;
    use std::time::Instant;

    fn selector() -> (EpollSelector, Arc<dyn Notifier>) {
        let notifier: Arc<dyn Notifier> = Arc::new(EventFdNotifier::create().unwrap());
        (EpollSelector::new(notifier.clone()).unwrap(), notifier)
    }

    #[test]
    fn test_timeout_rounding() {
        assert_eq!(timeout_ms(Duration::ZERO), EpollTimeout::ZERO);
        assert_eq!(timeout_ms(Duration::from_micros(10)), EpollTimeout::from(1u8));
        assert_eq!(timeout_ms(Duration::from_millis(16)), EpollTimeout::from(16u8));
        assert_eq!(timeout_ms(Duration::from_secs(u64::MAX)), EpollTimeout::MAX);
    }

    #[test]
    fn test_wakeup_is_reported_not_as_readiness() {
        let (mut sel, notifier) = selector();
        notifier.notify().unwrap();
        let mut events = Vec::new();
        let out = sel.select(&mut events, Duration::from_secs(5)).unwrap();
        assert!(out.woken);
        assert_eq!(out.ready, 0);
        assert!(events.is_empty());

        // drained: the next zero-timeout select sees nothing
        let out = sel.select(&mut events, Duration::ZERO).unwrap();
        assert!(!out.woken);
    }

    #[test]
    fn test_readable_socket_reported_under_token() {
        let (mut sel, _n) = selector();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        sel.register(server.as_fd(), 42, Interest::READABLE).unwrap();

        client.write_all(b"x").unwrap();
        let mut events = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        while events.is_empty() && Instant::now() < deadline {
            sel.select(&mut events, Duration::from_millis(50)).unwrap();
        }
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].token, 42);
        assert!(events[0].readable);

        sel.deregister(server.as_fd()).unwrap();

        // deregistered: more data is no longer reported
        client.write_all(b"y").unwrap();
        sel.select(&mut events, Duration::from_millis(20)).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_rebuild_keeps_notifier() {
        let (sel, notifier) = selector();
        let mut fresh = sel.rebuild().unwrap();
        drop(sel);
        notifier.notify().unwrap();
        let mut events = Vec::new();
        let out = fresh.select(&mut events, Duration::from_secs(5)).unwrap();
        assert!(out.woken);
    }
}
