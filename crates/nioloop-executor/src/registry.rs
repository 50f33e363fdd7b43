//! Per-core session registry.
//!
//! Maps session ids to live channels on one core. Only the owning loop
//! thread touches it, so there is no locking here.

use std::collections::HashMap;
use std::os::fd::AsFd;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;

use nioloop_core::error::Result;
use nioloop_core::selector::{Interest, Selector};

use crate::channel::{Channel, NewChannel};
use crate::event::Progress;
use crate::event_loop::LoopStats;
use crate::session::{Session, SessionId, SessionListener};

pub struct SessionRegistry {
    core: usize,
    channels: HashMap<SessionId, Channel>,
    listeners: Vec<Arc<dyn SessionListener>>,
    stats: Arc<LoopStats>,
}

impl SessionRegistry {
    pub(crate) fn new(
        core: usize,
        listeners: Vec<Arc<dyn SessionListener>>,
        stats: Arc<LoopStats>,
    ) -> Self {
        Self {
            core,
            channels: HashMap::new(),
            listeners,
            stats,
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn session(&self, id: SessionId) -> Option<&Arc<Session>> {
        self.channels.get(&id).map(|c| &c.session)
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.channels.keys().copied().collect()
    }

    pub(crate) fn channel_mut(&mut self, id: SessionId) -> Option<&mut Channel> {
        self.channels.get_mut(&id)
    }

    /// Register the socket with `selector` and start tracking it.
    pub(crate) fn register(&mut self, nc: NewChannel, selector: &mut dyn Selector) -> Result<()> {
        let id = nc.session.id();
        let interest = if nc.connecting {
            Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        if let Err(e) = selector.register(nc.stream.as_fd(), id, interest) {
            nc.abandon();
            return Err(e);
        }
        let session = nc.session.clone();
        self.channels.insert(id, Channel::new(nc));
        self.stats.record_open(self.channels.len());
        tracing::debug!(core = self.core, session = id, peer = %session.peer(), "session opened");
        for l in &self.listeners {
            l.on_opened(&session);
        }
        Ok(())
    }

    /// Close the socket, tell the inbound handler and listeners, forget
    /// the session. Returns `false` if it was not registered here.
    pub fn evict(&mut self, id: SessionId, selector: &mut dyn Selector) -> bool {
        let Some(mut channel) = self.channels.remove(&id) else {
            return false;
        };
        let _ = selector.deregister(channel.fd());
        let _ = channel.stream.shutdown(std::net::Shutdown::Both);
        channel.session.mark_closed();
        channel.inbound.on_close(&channel.session);
        for l in &self.listeners {
            l.on_closed(&channel.session);
        }
        self.stats.record_eviction(self.channels.len());
        tracing::debug!(core = self.core, session = id, "session closed");
        true
    }

    /// Evict every session idle strictly longer than `timeout`, and every
    /// outbound connect still unfinished after `connect_timeout`.
    pub fn sweep(
        &mut self,
        now: Instant,
        timeout: Duration,
        connect_timeout: Duration,
        selector: &mut dyn Selector,
    ) -> usize {
        let stale: Vec<SessionId> = self
            .channels
            .values()
            .filter(|c| {
                let idle = c.session.idle_for(now);
                idle > timeout || (c.connecting && idle > connect_timeout)
            })
            .map(|c| c.session.id())
            .collect();
        for id in &stale {
            tracing::info!(core = self.core, session = id, "evicting idle session");
            self.evict(*id, selector);
        }
        stale.len()
    }

    /// Append `data` (if any) to the session's outbound queue and write
    /// what the socket takes. Unknown sessions complete immediately; a
    /// connecting one keeps the bytes until the handshake finishes.
    pub(crate) fn flush(
        &mut self,
        id: SessionId,
        data: Option<Bytes>,
        selector: &mut dyn Selector,
    ) -> Progress {
        let Some(channel) = self.channels.get_mut(&id) else {
            return Progress::Complete;
        };
        if let Some(data) = data {
            channel.enqueue(data);
        }
        if channel.connecting {
            return Progress::Complete;
        }
        self.drive_writes(id, selector)
    }

    /// Evict once the outbound queue is empty. A connecting session is
    /// evicted when its handshake ends instead.
    pub(crate) fn close(&mut self, id: SessionId, selector: &mut dyn Selector) -> Progress {
        let Some(channel) = self.channels.get_mut(&id) else {
            return Progress::Complete;
        };
        channel.closing = true;
        if channel.connecting {
            return Progress::Complete;
        }
        match self.drive_writes(id, selector) {
            Progress::Pending => Progress::Pending,
            Progress::Complete => {
                self.evict(id, selector);
                Progress::Complete
            }
        }
    }

    /// Writable readiness: finish a connect, then continue an interrupted
    /// flush.
    pub(crate) fn on_writable(&mut self, id: SessionId, selector: &mut dyn Selector) {
        let Some(channel) = self.channels.get_mut(&id) else {
            return;
        };
        if channel.connecting {
            if let Err(e) = channel.finish_connect() {
                tracing::debug!(core = self.core, session = id, error = %e, "connect failed");
                self.evict(id, selector);
                return;
            }
            channel.session.touch();
            tracing::debug!(core = self.core, session = id, "connected");
        }
        let closing = channel.closing;
        if self.drive_writes(id, selector) == Progress::Complete && closing {
            self.evict(id, selector);
        }
    }

    fn drive_writes(&mut self, id: SessionId, selector: &mut dyn Selector) -> Progress {
        let Some(channel) = self.channels.get_mut(&id) else {
            return Progress::Complete;
        };
        let drained = match channel.write_outbound() {
            Ok(drained) => drained,
            Err(e) => {
                tracing::debug!(core = self.core, session = id, error = %e, "write failed");
                self.evict(id, selector);
                return Progress::Complete;
            }
        };
        let wanted = channel.wanted_interest();
        if wanted != channel.interest {
            if let Err(e) = selector.reregister(channel.fd(), id, wanted) {
                tracing::warn!(core = self.core, session = id, error = %e, "reregister failed");
                self.evict(id, selector);
                return Progress::Complete;
            }
            channel.interest = wanted;
        }
        if drained {
            Progress::Complete
        } else {
            Progress::Pending
        }
    }

    /// Register every channel with a fresh selector. Channels that fail
    /// are evicted; returns how many.
    pub(crate) fn reregister_all(&mut self, selector: &mut dyn Selector) -> usize {
        let mut failed = Vec::new();
        for (id, channel) in &self.channels {
            if selector.register(channel.fd(), *id, channel.interest).is_err() {
                failed.push(*id);
            }
        }
        for id in &failed {
            self.evict(*id, selector);
        }
        failed.len()
    }

    /// Evict everything (loop shutdown).
    pub(crate) fn clear(&mut self, selector: &mut dyn Selector) {
        for id in self.ids() {
            self.evict(id, selector);
        }
    }
}
