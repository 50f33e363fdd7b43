//! `ReactorGroup`: a fixed set of Reactor Cores.
//!
//! Each core runs on its own thread (`nioloop-<name>-<i>`); core 0 is the
//! primary and schedules liveness sweeps for the whole group. New
//! channels are spread over the cores round robin.
//!
//! ```rust,ignore
//! let group = ReactorGroup::builder("echo")
//!     .config(ReactorConfig::from_env())
//!     .buffers(pool.clone())
//!     .start()?;
//! let acceptor = group.bind("0.0.0.0:9000", factory)?;
//! ```

use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::Mutex;

use nioloop_core::buffer::BufferProvider;
use nioloop_core::config::ReactorConfig;
use nioloop_core::error::Result;
use nioloop_core::notifier::Notifier;
use nioloop_module::{connect_nonblocking, EpollSelector, EventFdNotifier, SizeClassPool};

use crate::acceptor::Acceptor;
use crate::channel::NewChannel;
use crate::event_loop::{EventLoop, LoopHandle};
use crate::inbound::{Inbound, InboundFactory};
use crate::session::{Session, SessionListener};

/// Builder for a `ReactorGroup`. Unset components get defaults.
pub struct GroupBuilder {
    name: String,
    config: Option<ReactorConfig>,
    buffers: Option<Arc<dyn BufferProvider>>,
    listeners: Vec<Arc<dyn SessionListener>>,
}

impl GroupBuilder {
    pub fn config(mut self, config: ReactorConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn buffers(mut self, pool: Arc<dyn BufferProvider>) -> Self {
        self.buffers = Some(pool);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn SessionListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Build every core, then start their threads. Nothing runs if any
    /// core fails to build.
    pub fn start(self) -> Result<Arc<ReactorGroup>> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let pool = self
            .buffers
            .unwrap_or_else(|| Arc::new(SizeClassPool::default()));

        let mut handles = Vec::with_capacity(config.core_count);
        let mut loops = Vec::with_capacity(config.core_count);
        for core in 0..config.core_count {
            let notifier: Arc<dyn Notifier> = Arc::new(EventFdNotifier::create()?);
            let selector = EpollSelector::new(notifier.clone())?;
            let handle = LoopHandle::new(core, &self.name, config.event_queue_bound, notifier);
            let event_loop = EventLoop::new(
                &handle,
                selector,
                pool.clone(),
                config.clone(),
                self.listeners.clone(),
            )?;
            handles.push(handle);
            loops.push(event_loop);
        }

        let mut threads = Vec::with_capacity(loops.len());
        for (core, event_loop) in loops.into_iter().enumerate() {
            let event_loop = if core == 0 {
                event_loop.with_peers(handles.clone())
            } else {
                event_loop
            };
            let spawned = thread::Builder::new()
                .name(format!("nioloop-{}-{}", self.name, core))
                .spawn(move || {
                    let _ = event_loop.run();
                });
            match spawned {
                Ok(t) => threads.push(t),
                Err(e) => {
                    for h in &handles {
                        h.stop();
                    }
                    for t in threads {
                        let _ = t.join();
                    }
                    return Err(e.into());
                }
            }
        }

        tracing::info!(group = %self.name, cores = handles.len(), "reactor group started");
        Ok(Arc::new(ReactorGroup {
            name: self.name,
            config,
            pool,
            handles,
            threads: Mutex::new(threads),
            next: AtomicUsize::new(0),
            started: Instant::now(),
        }))
    }
}

pub struct ReactorGroup {
    name: String,
    config: ReactorConfig,
    pool: Arc<dyn BufferProvider>,
    handles: Vec<LoopHandle>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    next: AtomicUsize,
    started: Instant,
}

impl ReactorGroup {
    pub fn builder(name: &str) -> GroupBuilder {
        GroupBuilder {
            name: name.to_string(),
            config: None,
            buffers: None,
            listeners: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ReactorConfig {
        &self.config
    }

    pub fn buffers(&self) -> &Arc<dyn BufferProvider> {
        &self.pool
    }

    pub fn cores(&self) -> &[LoopHandle] {
        &self.handles
    }

    /// Round-robin core chooser.
    pub fn next(&self) -> &LoopHandle {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.handles.len();
        &self.handles[i]
    }

    /// Sessions currently registered across all cores.
    pub fn session_count(&self) -> usize {
        self.handles
            .iter()
            .map(|h| h.stats().sessions.load(Ordering::Relaxed))
            .sum()
    }

    /// Assign `stream` to the next core without handing it off yet, so the
    /// caller can build its inbound handler around the session.
    pub fn prepare(&self, stream: TcpStream) -> Result<Prepared> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let session = self.next().new_session(peer);
        Ok(Prepared {
            stream,
            session,
            connecting: false,
        })
    }

    /// Start an outbound connection and prepare it. Returns without
    /// waiting for the handshake: the owning core finishes it, holding
    /// writes until then, and evicts the session if it fails. A
    /// handshake that never completes is evicted by the liveness sweep.
    pub fn prepare_connect(&self, addr: SocketAddr) -> Result<Prepared> {
        let stream = connect_nonblocking(addr)?;
        stream.set_nodelay(true)?;
        let session = self.next().new_session(addr);
        Ok(Prepared {
            stream,
            session,
            connecting: true,
        })
    }

    /// Prepare and hand off in one step.
    pub fn adopt(&self, stream: TcpStream, factory: &dyn InboundFactory) -> Result<Arc<Session>> {
        let prepared = self.prepare(stream)?;
        let inbound = factory.create(prepared.session());
        prepared.attach(inbound)
    }

    /// Start an outbound connection and adopt it; see `prepare_connect`.
    pub fn connect(&self, addr: SocketAddr, factory: &dyn InboundFactory) -> Result<Arc<Session>> {
        let prepared = self.prepare_connect(addr)?;
        let inbound = factory.create(prepared.session());
        prepared.attach(inbound)
    }

    /// Accept on `addr`, adopting every connection with `factory`.
    pub fn bind<A: ToSocketAddrs>(
        self: &Arc<Self>,
        addr: A,
        factory: Arc<dyn InboundFactory>,
    ) -> Result<Acceptor> {
        let group = Arc::clone(self);
        Acceptor::bind(addr, &self.name, move |stream, peer: SocketAddr| {
            if let Err(e) = group.adopt(stream, &*factory) {
                tracing::warn!(group = %group.name, %peer, error = %e, "adopt failed");
            }
        })
    }

    /// Stop every core and wait for its thread. Safe to call repeatedly.
    pub fn stop(&self) {
        let threads = std::mem::take(&mut *self.threads.lock());
        if threads.is_empty() {
            return;
        }
        for h in &self.handles {
            h.stop();
        }
        for t in threads {
            let _ = t.join();
        }
        tracing::info!(
            group = %self.name,
            uptime = ?self.started.elapsed(),
            "reactor group stopped"
        );
    }
}

impl Drop for ReactorGroup {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A connection assigned to a core but not yet handed to it.
pub struct Prepared {
    stream: TcpStream,
    session: Arc<Session>,
    connecting: bool,
}

impl Prepared {
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Hand the connection to its core with `inbound` as byte consumer.
    pub fn attach(self, inbound: Box<dyn Inbound>) -> Result<Arc<Session>> {
        let session = self.session.clone();
        session.handle().register(NewChannel {
            stream: self.stream,
            session: self.session,
            inbound,
            connecting: self.connecting,
        })?;
        Ok(session)
    }
}
