//! # nioloop-executor: The Reactor
//!
//! Each Reactor Core is one thread that owns one selector and the sockets
//! assigned to it. It runs this loop:
//!
//! ```text
//! loop {
//!     1. Poll: zero timeout while the retry budget lasts, else block
//!        (bounded by poll_timeout; submitters wake it only while blocked)
//!     2. Adopt channels handed off by other threads
//!     3. Nothing ready → run the negative (maintenance) queue
//!     4. Ready channels → one read each → refresh liveness → inbound handler
//!     5. Run the positive queue; re-enqueue what is incomplete, and
//!        arm the retry budget if anything is left
//!     6. Primary core: every maintenance_interval, flag a sweep on all
//!        cores; any core with the flag raised sweeps idle sessions now
//! }
//! ```
//!
//! Other threads never touch a core's sockets. They talk to it through
//! its `LoopHandle`: `submit` an `Event`, or hand off a new channel.
//!
//! | Module             | Contents                                   |
//! |--------------------|--------------------------------------------|
//! | `event`            | `Event`, `LoopTask`, `LoopContext`          |
//! | `event_queue`      | bounded positive/negative queue pair        |
//! | `session`          | `Session`, `SessionListener`                |
//! | `registry`         | per-core `SessionRegistry`, liveness sweep  |
//! | `inbound`          | `Inbound` seam, framed dispatch to workers  |
//! | `handler`          | `Request`, `Response`, `Handler`            |
//! | `event_loop`       | `EventLoop`, `LoopHandle`, `LoopStats`      |
//! | `group`            | `ReactorGroup`, `Prepared`                  |
//! | `acceptor`         | listening socket thread                     |

pub mod acceptor;
mod channel;
pub mod event;
pub mod event_loop;
pub mod event_queue;
pub mod group;
pub mod handler;
pub mod inbound;
pub mod registry;
pub mod session;

pub use acceptor::Acceptor;
pub use event::{Event, EventKind, LoopContext, LoopTask, Progress};
pub use event_loop::{EventLoop, LoopHandle, LoopStats};
pub use group::{GroupBuilder, Prepared, ReactorGroup};
pub use handler::{BoxError, Handler, Request, Response};
pub use inbound::{FramedFactory, FramedInbound, Inbound, InboundFactory};
pub use registry::SessionRegistry;
pub use session::{Session, SessionId, SessionListener};
