//! One registered socket and its per-connection state.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::fd::{AsFd, BorrowedFd};
use std::sync::Arc;

use bytes::{Buf, Bytes};

use nioloop_core::buffer::PooledBuf;
use nioloop_core::selector::Interest;

use crate::inbound::Inbound;
use crate::session::Session;

/// A channel handed to a core but not yet adopted.
pub(crate) struct NewChannel {
    pub stream: TcpStream,
    pub session: Arc<Session>,
    pub inbound: Box<dyn Inbound>,
    /// Outbound connect still in progress.
    pub connecting: bool,
}

impl NewChannel {
    /// Never reached the loop: close everything that was set up.
    pub fn abandon(mut self) {
        self.session.mark_closed();
        self.inbound.on_close(&self.session);
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

pub(crate) struct Channel {
    pub stream: TcpStream,
    pub session: Arc<Session>,
    pub inbound: Box<dyn Inbound>,
    outbound: VecDeque<Bytes>,
    pub interest: Interest,
    /// A close was requested; evict once `outbound` drains.
    pub closing: bool,
    /// Waiting for the first writable report to finish connecting.
    /// Nothing is read or written until then.
    pub connecting: bool,
}

impl Channel {
    pub fn new(nc: NewChannel) -> Self {
        let mut channel = Self {
            stream: nc.stream,
            session: nc.session,
            inbound: nc.inbound,
            outbound: VecDeque::new(),
            interest: Interest::READABLE,
            closing: false,
            connecting: nc.connecting,
        };
        channel.interest = channel.wanted_interest();
        channel
    }

    pub fn fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }

    /// Writable while connecting: the handshake is over. `Err` if it
    /// failed.
    pub fn finish_connect(&mut self) -> io::Result<()> {
        if let Some(e) = self.stream.take_error()? {
            return Err(e);
        }
        self.stream.peer_addr()?;
        self.connecting = false;
        Ok(())
    }

    /// One read into the writable region of `buf`. `Ok(0)` is end of stream.
    pub fn read_into(&mut self, buf: &mut PooledBuf) -> io::Result<usize> {
        loop {
            match self.stream.read(buf.spare_mut()) {
                Ok(n) => {
                    buf.commit(n);
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub fn enqueue(&mut self, data: Bytes) {
        if !data.is_empty() {
            self.outbound.push_back(data);
        }
    }

    pub fn has_outbound(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Write queued bytes until the socket would block. Returns `true`
    /// once nothing is left.
    pub fn write_outbound(&mut self) -> io::Result<bool> {
        while let Some(front) = self.outbound.front_mut() {
            match self.stream.write(&front[..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) if n == front.len() => {
                    self.outbound.pop_front();
                }
                Ok(n) => front.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    /// Interest needed for the current outbound state.
    pub fn wanted_interest(&self) -> Interest {
        if self.connecting {
            Interest::WRITABLE
        } else if self.has_outbound() {
            Interest::BOTH
        } else {
            Interest::READABLE
        }
    }
}
