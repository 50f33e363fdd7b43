//! Session: the identity and liveness of one connection.
//!
//! A session is owned by exactly one core. Worker threads hold an
//! `Arc<Session>` to write responses, refresh liveness or use the
//! attachment; everything else goes through the owning core's queue.

use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;

use nioloop_core::error::{NioError, Result};

use crate::event::Event;
use crate::event_loop::LoopHandle;

/// Unique within a reactor group; also the selector token.
pub type SessionId = u64;

pub struct Session {
    id: SessionId,
    peer: SocketAddr,
    created: Instant,
    /// Milliseconds after `created` of the last activity.
    last_active: AtomicU64,
    open: AtomicBool,
    attachment: Mutex<Option<Box<dyn Any + Send>>>,
    handle: LoopHandle,
}

impl Session {
    pub(crate) fn new(id: SessionId, peer: SocketAddr, handle: LoopHandle) -> Arc<Self> {
        Arc::new(Self {
            id,
            peer,
            created: Instant::now(),
            last_active: AtomicU64::new(0),
            open: AtomicBool::new(true),
            attachment: Mutex::new(None),
            handle,
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Index of the owning core.
    pub fn core(&self) -> usize {
        self.handle.core()
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Handle of the owning core.
    pub fn handle(&self) -> &LoopHandle {
        &self.handle
    }

    /// Refresh liveness.
    pub fn touch(&self) {
        let ms = self.created.elapsed().as_millis() as u64;
        self.last_active.fetch_max(ms, Ordering::Relaxed);
    }

    pub fn last_active(&self) -> Instant {
        self.created + Duration::from_millis(self.last_active.load(Ordering::Relaxed))
    }

    /// Time since the last activity, as seen at `now`.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_active())
    }

    /// Queue `data` for writing. Writes from one thread reach the socket
    /// in call order.
    pub fn write(&self, data: Bytes) -> Result<()> {
        if !self.is_open() {
            return Err(NioError::SessionClosed(self.id));
        }
        self.handle.submit(Event::flush(self.id, data))
    }

    /// Close after queued writes drain. Closing a closed session is a no-op.
    pub fn close(&self) -> Result<()> {
        if !self.is_open() {
            return Ok(());
        }
        self.handle.submit(Event::Close(self.id))
    }

    /// Returns `true` on the transition from open to closed.
    pub(crate) fn mark_closed(&self) -> bool {
        self.open.swap(false, Ordering::AcqRel)
    }

    pub fn set_attachment<T: Any + Send>(&self, value: T) {
        *self.attachment.lock() = Some(Box::new(value));
    }

    /// Run `f` with the attachment if it is a `T`.
    pub fn with_attachment<T: Any + Send, R>(&self, f: impl FnOnce(Option<&mut T>) -> R) -> R {
        let mut slot = self.attachment.lock();
        f(slot.as_mut().and_then(|b| b.downcast_mut::<T>()))
    }

    pub fn take_attachment(&self) -> Option<Box<dyn Any + Send>> {
        self.attachment.lock().take()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("core", &self.core())
            .field("peer", &self.peer)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Lifecycle callbacks, run on the owning core's thread.
pub trait SessionListener: Send + Sync {
    fn on_opened(&self, _session: &Arc<Session>) {}

    fn on_closed(&self, _session: &Arc<Session>) {}
}
