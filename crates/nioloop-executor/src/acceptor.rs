//! Listening socket thread.
//!
//! Polls a non-blocking listener and hands every accepted stream to a
//! callback. The thread parks briefly when there is nothing to accept
//! and checks its stop flag between polls.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use nioloop_core::error::Result;

const IDLE_PARK: Duration = Duration::from_millis(5);

pub struct Acceptor {
    local_addr: SocketAddr,
    stop: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Acceptor {
    /// Bind `addr` and start accepting on a thread named `nioloop-<name>-accept`.
    pub fn bind<A, F>(addr: A, name: &str, mut on_accept: F) -> Result<Self>
    where
        A: ToSocketAddrs,
        F: FnMut(TcpStream, SocketAddr) + Send + 'static,
    {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let stop = Arc::new(AtomicBool::new(false));

        let flag = stop.clone();
        let thread = thread::Builder::new()
            .name(format!("nioloop-{}-accept", name))
            .spawn(move || {
                while !flag.load(Ordering::Acquire) {
                    match listener.accept() {
                        Ok((stream, peer)) => on_accept(stream, peer),
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            thread::park_timeout(IDLE_PARK);
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => {
                            // EMFILE and friends: back off instead of spinning.
                            tracing::warn!(addr = %local_addr, error = %e, "accept failed");
                            thread::park_timeout(IDLE_PARK);
                        }
                    }
                }
                tracing::debug!(addr = %local_addr, "acceptor exiting");
            })?;

        tracing::info!(addr = %local_addr, "listening");
        Ok(Self {
            local_addr,
            stop,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_bound(&self) -> bool {
        !self.stop.load(Ordering::Acquire)
    }

    /// Stop accepting and close the listener. Safe to call repeatedly.
    pub fn unbind(&self) {
        self.stop.store(true, Ordering::Release);
        let thread = self.thread.lock().take();
        if let Some(t) = thread {
            t.thread().unpark();
            let _ = t.join();
            tracing::info!(addr = %self.local_addr, "unbound");
        }
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        self.unbind();
    }
}
