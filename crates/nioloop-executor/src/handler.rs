//! Business handler seam.
//!
//! Handlers run on worker threads. A request owns its payload buffer; the
//! buffer goes back to its pool when the request is dropped, whether the
//! handler succeeds, fails or panics.

use std::io;
use std::sync::Arc;

use bytes::BytesMut;

use nioloop_core::buffer::PooledBuf;
use nioloop_core::error::Result;
use nioloop_core::protocol::{self, ProtocolEncoder};

use crate::session::Session;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// One decoded data frame.
#[derive(Debug)]
pub struct Request {
    session: Arc<Session>,
    stream_id: u32,
    /// Name bytes sit just before the payload's read position.
    service_len: usize,
    payload: PooledBuf,
}

impl Request {
    pub(crate) fn new(
        session: Arc<Session>,
        stream_id: u32,
        service_len: usize,
        payload: PooledBuf,
    ) -> Self {
        Self {
            session,
            stream_id,
            service_len,
            payload,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Correlation id; responses echo it.
    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Target service, when the codec carries one.
    pub fn service(&self) -> Option<&str> {
        protocol::service_name(&self.payload, self.service_len)
    }

    /// Request body, without the service name.
    pub fn payload(&self) -> &[u8] {
        self.payload.as_slice()
    }

    pub fn into_payload(self) -> PooledBuf {
        self.payload
    }
}

/// Accumulates a reply for one stream id. `flush` sends it as one frame
/// through the owning core.
pub struct Response {
    session: Arc<Session>,
    stream_id: u32,
    body: BytesMut,
    encoder: Arc<dyn ProtocolEncoder>,
}

impl Response {
    pub fn new(session: Arc<Session>, stream_id: u32, encoder: Arc<dyn ProtocolEncoder>) -> Self {
        Self {
            session,
            stream_id,
            body: BytesMut::new(),
            encoder,
        }
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Bytes buffered since the last flush.
    pub fn buffered(&self) -> usize {
        self.body.len()
    }

    pub fn write(&mut self, data: &[u8]) {
        self.body.extend_from_slice(data);
    }

    /// Encode the buffered body as one frame and queue it on the session.
    pub fn flush(&mut self) -> Result<()> {
        let mut frame = BytesMut::with_capacity(self.encoder.encoded_len(self.body.len()));
        self.encoder.encode(self.stream_id, &self.body, &mut frame);
        self.body.clear();
        self.session.write(frame.freeze())
    }

    /// Flush whatever the handler left buffered.
    pub(crate) fn finish(mut self) -> Result<()> {
        if self.body.is_empty() {
            return Ok(());
        }
        self.flush()
    }
}

impl io::Write for Response {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Response::write(self, buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Response::flush(self).map_err(io::Error::other)
    }
}

/// Request processing, run on a worker thread.
///
/// Returning an error (or panicking) closes the session.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, request: Request, response: &mut Response) -> std::result::Result<(), BoxError>;
}

impl<F> Handler for F
where
    F: Fn(Request, &mut Response) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
{
    fn handle(&self, request: Request, response: &mut Response) -> std::result::Result<(), BoxError> {
        self(request, response)
    }
}
