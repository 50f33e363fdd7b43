//! The Reactor Core: one thread, one selector, many channels.
//!
//! # Wakeup protocol
//!
//! The loop raises `selecting` before it blocks and re-checks for work
//! after raising it. A submitter publishes its event under the queue lock
//! and then notifies only if `selecting` is set. All four accesses are
//! `SeqCst`, so either the loop sees the new work and polls with a zero
//! timeout, or the submitter sees the flag and writes the eventfd (which
//! stays readable until drained). No wakeup is lost and an idle loop that
//! is not blocked costs submitters no syscall.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use nioloop_core::buffer::{BufferProvider, PooledBuf};
use nioloop_core::config::ReactorConfig;
use nioloop_core::error::{NioError, Result};
use nioloop_core::notifier::Notifier;
use nioloop_core::selector::{Readiness, Selector};

use crate::channel::NewChannel;
use crate::event::{Event, EventKind, LoopContext, Progress};
use crate::event_queue::EventQueue;
use crate::registry::SessionRegistry;
use crate::session::{Session, SessionId, SessionListener};

/// Session ids carry the core index in the top bits.
const CORE_SHIFT: u32 = 48;

/// Per-loop counters. Monotonic except `sessions`.
#[derive(Debug, Default)]
pub struct LoopStats {
    pub iterations: AtomicU64,
    pub events_fired: AtomicU64,
    pub reads: AtomicU64,
    pub bytes_in: AtomicU64,
    pub rebuilds: AtomicU64,
    pub evictions: AtomicU64,
    /// Sessions currently registered.
    pub sessions: AtomicUsize,
}

impl LoopStats {
    pub(crate) fn record_open(&self, live: usize) {
        self.sessions.store(live, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self, live: usize) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        self.sessions.store(live, Ordering::Relaxed);
    }
}

#[derive(Default)]
struct Registrations {
    pending: Vec<NewChannel>,
    closed: bool,
}

/// State shared between a loop thread and its handles.
pub(crate) struct LoopShared {
    core: usize,
    name: String,
    queue: EventQueue,
    selecting: AtomicBool,
    notifier: Arc<dyn Notifier>,
    wait_for_register: AtomicBool,
    register_lock: Mutex<Registrations>,
    next_session: AtomicU64,
    /// Raised by the primary; the loop sweeps at the end of its next pass.
    sweep_requested: AtomicBool,
    stats: Arc<LoopStats>,
}

impl LoopShared {
    fn wake_if_selecting(&self) {
        if self.selecting.load(Ordering::SeqCst) {
            if let Err(e) = self.notifier.notify() {
                tracing::warn!(core = self.core, error = %e, "wakeup failed");
            }
        }
    }

    /// Work is waiting that the next poll must not block on.
    fn has_pending(&self) -> bool {
        self.queue.has_work()
            || self.wait_for_register.load(Ordering::SeqCst)
            || self.sweep_requested.load(Ordering::SeqCst)
    }
}

/// Cloneable, thread-safe handle to one Reactor Core.
#[derive(Clone)]
pub struct LoopHandle {
    shared: Arc<LoopShared>,
}

impl LoopHandle {
    /// `notifier` must be the one registered with the loop's selector.
    pub fn new(core: usize, name: &str, bound: usize, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            shared: Arc::new(LoopShared {
                core,
                name: name.to_string(),
                queue: EventQueue::new(bound),
                selecting: AtomicBool::new(false),
                notifier,
                wait_for_register: AtomicBool::new(false),
                register_lock: Mutex::new(Registrations::default()),
                next_session: AtomicU64::new(1),
                sweep_requested: AtomicBool::new(false),
                stats: Arc::new(LoopStats::default()),
            }),
        }
    }

    /// A handle whose events are never run; for unit tests.
    #[cfg(test)]
    pub(crate) fn detached(core: usize, bound: usize) -> Self {
        let notifier = nioloop_module::EventFdNotifier::create().expect("eventfd");
        Self::new(core, "detached", bound, Arc::new(notifier))
    }

    pub fn core(&self) -> usize {
        self.shared.core
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn stats(&self) -> &LoopStats {
        &self.shared.stats
    }

    /// Events waiting in either queue.
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn is_running(&self) -> bool {
        self.shared.queue.is_running()
    }

    /// Queue an event for this core.
    ///
    /// Fails with `LoopStopped` or `QueueFull`; in both cases the event has
    /// already been closed.
    pub fn submit(&self, event: Event) -> Result<()> {
        self.shared.queue.submit(event)?;
        self.shared.wake_if_selecting();
        Ok(())
    }

    /// Ask the loop to exit after its current pass.
    pub fn stop(&self) {
        if self.shared.queue.stop() {
            if let Err(e) = self.shared.notifier.notify() {
                tracing::warn!(core = self.shared.core, error = %e, "stop wakeup failed");
            }
        }
    }

    /// Ask the loop to evict idle sessions at the end of its next pass.
    /// Repeated requests before then collapse into one sweep and never
    /// take a slot in the event queue.
    pub fn request_sweep(&self) {
        if !self.shared.sweep_requested.swap(true, Ordering::SeqCst) {
            self.shared.wake_if_selecting();
        }
    }

    pub(crate) fn new_session(&self, peer: SocketAddr) -> Arc<Session> {
        let seq = self.shared.next_session.fetch_add(1, Ordering::Relaxed);
        let id: SessionId = ((self.shared.core as u64) << CORE_SHIFT) | seq;
        Session::new(id, peer, self.clone())
    }

    /// Hand a channel to the loop thread. A stopped loop closes it.
    pub(crate) fn register(&self, nc: NewChannel) -> Result<()> {
        {
            let mut reg = self.shared.register_lock.lock();
            if reg.closed {
                drop(reg);
                nc.abandon();
                return Err(NioError::LoopStopped);
            }
            reg.pending.push(nc);
            self.shared.wait_for_register.store(true, Ordering::SeqCst);
        }
        self.shared.wake_if_selecting();
        Ok(())
    }
}

impl std::fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopHandle")
            .field("name", &self.shared.name)
            .field("core", &self.shared.core)
            .finish()
    }
}

/// One Reactor Core. Owned and driven by its thread via `run`.
pub struct EventLoop<S: Selector> {
    shared: Arc<LoopShared>,
    selector: S,
    registry: SessionRegistry,
    pool: Arc<dyn BufferProvider>,
    scratch: Option<PooledBuf>,
    config: ReactorConfig,
    ready: Vec<Readiness>,
    /// Zero-timeout polls left.
    retry: u32,
    /// Consecutive premature blocking polls.
    premature: u32,
    /// Every core of the group, self included. Non-empty only on the primary.
    peers: Vec<LoopHandle>,
    last_maintenance: Instant,
}

impl<S: Selector> EventLoop<S> {
    /// Build a loop for `handle`. The scratch read buffer is taken from
    /// `pool` here so allocation failures surface before the thread starts.
    pub fn new(
        handle: &LoopHandle,
        selector: S,
        pool: Arc<dyn BufferProvider>,
        config: ReactorConfig,
        listeners: Vec<Arc<dyn SessionListener>>,
    ) -> Result<Self> {
        let shared = handle.shared.clone();
        let scratch = pool.acquire(config.read_buffer_size)?;
        let registry = SessionRegistry::new(shared.core, listeners, shared.stats.clone());
        Ok(Self {
            shared,
            selector,
            registry,
            pool,
            scratch: Some(scratch),
            config,
            ready: Vec::new(),
            retry: 0,
            premature: 0,
            peers: Vec::new(),
            last_maintenance: Instant::now(),
        })
    }

    /// Make this the primary loop: it schedules liveness sweeps on `peers`.
    pub fn with_peers(mut self, peers: Vec<LoopHandle>) -> Self {
        self.peers = peers;
        self
    }

    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            shared: self.shared.clone(),
        }
    }

    /// Drive the loop until `LoopHandle::stop`, then shut down.
    pub fn run(mut self) -> Result<()> {
        tracing::info!(loop_name = %self.shared.name, core = self.shared.core, "event loop started");
        let mut outcome = Ok(());
        while self.shared.queue.is_running() {
            if let Err(e) = self.run_once() {
                tracing::error!(core = self.shared.core, error = %e, "event loop failed");
                self.shared.queue.stop();
                outcome = Err(e);
                break;
            }
        }
        self.shutdown();
        outcome
    }

    /// One pass of the loop.
    pub fn run_once(&mut self) -> Result<()> {
        self.shared.stats.iterations.fetch_add(1, Ordering::Relaxed);

        let from_retry = self.retry > 0;
        if from_retry {
            self.retry -= 1;
            self.select_now()?;
        } else {
            self.select_blocking()?;
        }

        self.adopt_registrations();

        if self.ready.is_empty() {
            self.run_queue(EventKind::Negative);
        } else {
            self.process_ready();
        }

        let remaining = self.run_queue(EventKind::Positive);
        if remaining > 0 && !from_retry {
            self.retry = self.config.retry_budget;
        }

        if !self.peers.is_empty() {
            self.maintain();
        }
        if self.shared.sweep_requested.swap(false, Ordering::SeqCst) {
            self.sweep();
        }
        Ok(())
    }

    fn select_now(&mut self) -> Result<()> {
        match self.selector.select(&mut self.ready, Duration::ZERO) {
            Ok(_) => Ok(()),
            Err(e) => self.recover(e),
        }
    }

    fn select_blocking(&mut self) -> Result<()> {
        self.shared.selecting.store(true, Ordering::SeqCst);
        let timeout = if self.shared.has_pending() {
            Duration::ZERO
        } else {
            self.config.poll_timeout
        };
        let started = Instant::now();
        let result = self.selector.select(&mut self.ready, timeout);
        self.shared.selecting.store(false, Ordering::SeqCst);

        let outcome = match result {
            Ok(o) => o,
            Err(e) => return self.recover(e),
        };

        let threshold = self.config.selector_rebuild_threshold;
        if threshold == 0 || timeout.is_zero() {
            return Ok(());
        }
        if outcome.ready == 0 && !outcome.woken && started.elapsed() < timeout / 8 {
            self.premature += 1;
            if self.premature >= threshold {
                tracing::warn!(
                    core = self.shared.core,
                    premature = self.premature,
                    "selector returned early repeatedly; rebuilding"
                );
                self.premature = 0;
                self.rebuild_selector()?;
            }
        } else {
            self.premature = 0;
        }
        Ok(())
    }

    /// A failed poll: rebuild once and carry on.
    fn recover(&mut self, e: NioError) -> Result<()> {
        tracing::warn!(core = self.shared.core, error = %e, "select failed; rebuilding selector");
        self.ready.clear();
        self.rebuild_selector()
    }

    fn rebuild_selector(&mut self) -> Result<()> {
        let mut fresh = self.selector.rebuild()?;
        let evicted = self.registry.reregister_all(&mut fresh);
        // the old selector is dropped here
        self.selector = fresh;
        self.shared.stats.rebuilds.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            core = self.shared.core,
            sessions = self.registry.len(),
            evicted,
            "selector rebuilt"
        );
        Ok(())
    }

    fn adopt_registrations(&mut self) {
        if !self.shared.wait_for_register.swap(false, Ordering::SeqCst) {
            return;
        }
        let pending = std::mem::take(&mut self.shared.register_lock.lock().pending);
        for nc in pending {
            let id = nc.session.id();
            if let Err(e) = self.registry.register(nc, &mut self.selector) {
                tracing::warn!(core = self.shared.core, session = id, error = %e, "register failed");
            }
        }
    }

    fn process_ready(&mut self) {
        let ready = std::mem::take(&mut self.ready);
        for r in &ready {
            if r.writable {
                self.registry.on_writable(r.token, &mut self.selector);
            }
            if r.readable || r.closed {
                self.read_channel(r.token);
            }
        }
        self.ready = ready;
    }

    fn read_channel(&mut self, id: SessionId) {
        let Some(scratch) = self.scratch.as_mut() else {
            return;
        };
        let Some(channel) = self.registry.channel_mut(id) else {
            return;
        };
        scratch.clear();
        let outcome = match channel.read_into(scratch) {
            Ok(0) => Err(None),
            Ok(n) => {
                let stats = &self.shared.stats;
                stats.reads.fetch_add(1, Ordering::Relaxed);
                stats.bytes_in.fetch_add(n as u64, Ordering::Relaxed);
                channel.session.touch();
                channel
                    .inbound
                    .on_bytes(&channel.session, scratch.as_slice())
                    .map_err(Some)
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(Some(NioError::Io(e))),
        };
        scratch.clear();

        match outcome {
            Ok(()) => {}
            Err(None) => {
                tracing::debug!(core = self.shared.core, session = id, "peer closed");
                self.registry.evict(id, &mut self.selector);
            }
            Err(Some(e)) => {
                tracing::warn!(core = self.shared.core, session = id, error = %e, "closing channel");
                self.registry.evict(id, &mut self.selector);
            }
        }
    }

    /// Fire one drained queue. Returns how many events are still pending.
    fn run_queue(&mut self, kind: EventKind) -> usize {
        let events = self.shared.queue.take(kind);
        if events.is_empty() {
            return 0;
        }
        // A channel handed off before these events were submitted must be
        // registered before they fire.
        self.adopt_registrations();

        let mut cx = LoopContext {
            core: self.shared.core,
            now: Instant::now(),
            registry: &mut self.registry,
            selector: &mut self.selector,
            stats: &self.shared.stats,
        };
        let mut pending = Vec::new();
        for mut event in events {
            self.shared.stats.events_fired.fetch_add(1, Ordering::Relaxed);
            match event.fire(&mut cx) {
                Ok(Progress::Complete) => {}
                Ok(Progress::Pending) => pending.push(event),
                Err(e) => {
                    tracing::warn!(core = self.shared.core, event = ?event, error = %e, "event failed");
                }
            }
        }
        let remaining = pending.len();
        self.shared.queue.requeue(pending);
        remaining
    }

    /// Primary only: flag a sweep on every core once per interval.
    fn maintain(&mut self) {
        let now = Instant::now();
        if now.duration_since(self.last_maintenance) < self.config.maintenance_interval {
            return;
        }
        self.last_maintenance = now;
        for peer in &self.peers {
            peer.request_sweep();
        }
    }

    fn sweep(&mut self) {
        let evicted = self.registry.sweep(
            Instant::now(),
            self.config.liveness_timeout,
            self.config.connect_timeout,
            &mut self.selector,
        );
        if evicted > 0 {
            tracing::debug!(core = self.shared.core, evicted, "liveness sweep");
        }
    }

    fn shutdown(mut self) {
        self.shared.queue.stop();
        for event in self.shared.queue.drain_all() {
            event.close();
        }
        let abandoned = {
            let mut reg = self.shared.register_lock.lock();
            reg.closed = true;
            std::mem::take(&mut reg.pending)
        };
        for nc in abandoned {
            nc.abandon();
        }
        self.registry.clear(&mut self.selector);
        // Evictions may have queued events on this core.
        for event in self.shared.queue.drain_all() {
            event.close();
        }
        if let Some(buf) = self.scratch.take() {
            buf.release();
        }
        tracing::info!(
            loop_name = %self.shared.name,
            core = self.shared.core,
            buffers_in_use = self.pool.in_use(),
            "event loop stopped"
        );
    }
}
