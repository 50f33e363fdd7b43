//! Bounded positive/negative event queue pair.
//!
//! ```text
//!  submitters ──lock──► [positive | negative] ──swap──► loop thread
//! ```
//!
//! Both queues sit behind one mutex. The loop drains a queue by swapping
//! its vector out, so the lock is held for O(1) no matter how many events
//! are waiting. Rejected events are closed after the lock is dropped, so
//! a close hook may submit again without deadlocking.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use nioloop_core::error::{NioError, Result};

use crate::event::{Event, EventKind};

struct QueueState {
    positive: Vec<Event>,
    negative: Vec<Event>,
    running: bool,
}

impl QueueState {
    fn len(&self) -> usize {
        self.positive.len() + self.negative.len()
    }

    fn push(&mut self, event: Event) {
        match event.kind() {
            EventKind::Positive => self.positive.push(event),
            EventKind::Negative => self.negative.push(event),
        }
    }
}

pub struct EventQueue {
    state: Mutex<QueueState>,
    bound: usize,
    /// Set by `submit` per kind, cleared when that queue is drained. Events
    /// put back by `requeue` set neither.
    fresh_positive: AtomicBool,
    fresh_negative: AtomicBool,
}

impl EventQueue {
    pub fn new(bound: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                positive: Vec::new(),
                negative: Vec::new(),
                running: true,
            }),
            bound,
            fresh_positive: AtomicBool::new(false),
            fresh_negative: AtomicBool::new(false),
        }
    }

    pub fn bound(&self) -> usize {
        self.bound
    }

    /// Append `event` to the queue of its kind.
    ///
    /// A stopped queue or one holding `bound` events refuses the event and
    /// closes it.
    pub fn submit(&self, event: Event) -> Result<()> {
        let rejected = {
            let mut state = self.state.lock();
            if !state.running {
                Some((event, NioError::LoopStopped))
            } else if state.len() >= self.bound {
                Some((event, NioError::QueueFull(self.bound)))
            } else {
                let fresh = match event.kind() {
                    EventKind::Positive => &self.fresh_positive,
                    EventKind::Negative => &self.fresh_negative,
                };
                state.push(event);
                fresh.store(true, Ordering::SeqCst);
                None
            }
        };
        match rejected {
            None => Ok(()),
            Some((event, err)) => {
                event.close();
                Err(err)
            }
        }
    }

    /// Put back events that did not complete. Ignores the bound. Events
    /// arriving after `stop` are closed.
    pub fn requeue(&self, events: Vec<Event>) {
        if events.is_empty() {
            return;
        }
        let mut state = self.state.lock();
        if !state.running {
            drop(state);
            events.into_iter().for_each(Event::close);
            return;
        }
        for event in events {
            state.push(event);
        }
    }

    /// Snapshot-and-swap one queue.
    pub fn take(&self, kind: EventKind) -> Vec<Event> {
        let mut state = self.state.lock();
        match kind {
            EventKind::Positive => {
                self.fresh_positive.store(false, Ordering::SeqCst);
                std::mem::take(&mut state.positive)
            }
            EventKind::Negative => {
                self.fresh_negative.store(false, Ordering::SeqCst);
                std::mem::take(&mut state.negative)
            }
        }
    }

    /// Work was submitted since its queue was last drained. Requeued
    /// leftovers never count, so a task that stays `Pending` cannot keep
    /// the loop from blocking.
    pub fn has_work(&self) -> bool {
        self.fresh_positive.load(Ordering::SeqCst) || self.fresh_negative.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Refuse further submissions. Returns `false` if already stopped.
    pub fn stop(&self) -> bool {
        std::mem::replace(&mut self.state.lock().running, false)
    }

    /// Take everything left; used once the loop has stopped.
    pub fn drain_all(&self) -> Vec<Event> {
        let mut state = self.state.lock();
        let mut all = std::mem::take(&mut state.positive);
        all.append(&mut state.negative);
        all
    }
}
