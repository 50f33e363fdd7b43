//! Byte forwarding between two cross-wired sessions.

use std::sync::Arc;

use bytes::Bytes;

use nioloop_core::error::Result;
use nioloop_executor::{Inbound, Session};

/// Copies every read into `peer`'s write path. Eviction of this channel
/// closes the peer.
pub struct ForwardInbound {
    peer: Arc<Session>,
}

impl ForwardInbound {
    pub fn new(peer: Arc<Session>) -> Self {
        Self { peer }
    }

    pub fn peer(&self) -> &Arc<Session> {
        &self.peer
    }
}

impl Inbound for ForwardInbound {
    fn on_bytes(&mut self, _session: &Arc<Session>, data: &[u8]) -> Result<()> {
        // A closed peer returns an error, which closes this side too.
        self.peer.write(Bytes::copy_from_slice(data))
    }

    fn on_close(&mut self, session: &Arc<Session>) {
        tracing::debug!(session = session.id(), peer = self.peer.id(), "forward closed");
        let _ = self.peer.close();
    }
}
