//! Deferred work bound to one Reactor Core.
//!
//! An event is fired on the loop thread with a `LoopContext` and reports
//! whether it finished. An event that is discarded without being fired
//! (loop stopped, queue full) is `close`d instead, exactly once.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;

use nioloop_core::error::Result;
use nioloop_core::selector::Selector;

use crate::event_loop::LoopStats;
use crate::registry::SessionRegistry;
use crate::session::{Session, SessionId};

/// Scheduling class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Expected to finish soon; retried eagerly within the retry budget.
    Positive,
    /// Background work; run only when no channel is ready.
    Negative,
}

/// Outcome of one `fire`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Complete,
    /// Fire again on a later pass.
    Pending,
}

/// Loop-side view handed to firing events.
pub struct LoopContext<'a> {
    pub(crate) core: usize,
    pub(crate) now: Instant,
    pub(crate) registry: &'a mut SessionRegistry,
    pub(crate) selector: &'a mut dyn Selector,
    pub(crate) stats: &'a LoopStats,
}

impl LoopContext<'_> {
    pub fn core(&self) -> usize {
        self.core
    }

    /// Time the current pass started.
    pub fn now(&self) -> Instant {
        self.now
    }

    /// Session registered on this core.
    pub fn session(&self, id: SessionId) -> Option<&Arc<Session>> {
        self.registry.session(id)
    }

    /// Sessions registered on this core.
    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// Close and forget a session. Returns `false` if it was unknown.
    pub fn evict(&mut self, id: SessionId) -> bool {
        self.registry.evict(id, self.selector)
    }

    pub fn stats(&self) -> &LoopStats {
        self.stats
    }
}

/// Open-ended loop work.
pub trait LoopTask: Send {
    fn kind(&self) -> EventKind {
        EventKind::Positive
    }

    fn fire(&mut self, cx: &mut LoopContext<'_>) -> Result<Progress>;

    /// Discarded without firing.
    fn close(self: Box<Self>) {}
}

struct FnTask<F>(Option<F>);

impl<F> LoopTask for FnTask<F>
where
    F: FnOnce(&mut LoopContext<'_>) + Send,
{
    fn fire(&mut self, cx: &mut LoopContext<'_>) -> Result<Progress> {
        if let Some(f) = self.0.take() {
            f(cx);
        }
        Ok(Progress::Complete)
    }
}

/// Bytes to write to a session, in submission order.
pub struct Flush {
    session: SessionId,
    /// Taken into the channel's outbound queue on the first fire.
    data: Option<Bytes>,
}

pub enum Event {
    Flush(Flush),
    /// Close once pending outbound bytes are written.
    Close(SessionId),
    Task(Box<dyn LoopTask>),
}

impl Event {
    pub fn flush(session: SessionId, data: Bytes) -> Self {
        Event::Flush(Flush {
            session,
            data: Some(data),
        })
    }

    /// Run `f` once on the loop thread.
    pub fn task<F>(f: F) -> Self
    where
        F: FnOnce(&mut LoopContext<'_>) + Send + 'static,
    {
        Event::Task(Box::new(FnTask(Some(f))))
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Event::Flush(_) | Event::Close(_) => EventKind::Positive,
            Event::Task(t) => t.kind(),
        }
    }

    pub fn fire(&mut self, cx: &mut LoopContext<'_>) -> Result<Progress> {
        match self {
            Event::Flush(f) => Ok(cx.registry.flush(f.session, f.data.take(), cx.selector)),
            Event::Close(id) => Ok(cx.registry.close(*id, cx.selector)),
            Event::Task(t) => t.fire(cx),
        }
    }

    /// Release without firing.
    pub fn close(self) {
        if let Event::Task(t) = self {
            t.close();
        }
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::Flush(fl) => f
                .debug_struct("Flush")
                .field("session", &fl.session)
                .field("len", &fl.data.as_ref().map(Bytes::len))
                .finish(),
            Event::Close(id) => f.debug_tuple("Close").field(id).finish(),
            Event::Task(t) => f.debug_tuple("Task").field(&t.kind()).finish(),
        }
    }
}
