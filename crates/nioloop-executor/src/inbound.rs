//! What a channel does with the bytes it reads.
//!
//! Every channel has one `Inbound`, created by an `InboundFactory` when
//! the channel is adopted. The default is `FramedInbound`: decode frames
//! and dispatch data frames to the worker pool. The balancer plugs in a
//! forwarder instead.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use nioloop_core::buffer::{BufferProvider, PooledBuf};
use nioloop_core::error::{NioError, Result};
use nioloop_core::protocol::{Frame, FrameAccumulator, ProtocolDecoder, ProtocolEncoder};
use nioloop_core::worker::WorkerPool;

use crate::handler::{Handler, Request, Response};
use crate::session::Session;

/// Per-channel byte consumer. Runs on the owning core's thread.
pub trait Inbound: Send {
    /// Bytes from one read. An error closes this channel only.
    fn on_bytes(&mut self, session: &Arc<Session>, data: &[u8]) -> Result<()>;

    /// The channel was evicted.
    fn on_close(&mut self, _session: &Arc<Session>) {}
}

pub trait InboundFactory: Send + Sync {
    fn create(&self, session: &Arc<Session>) -> Box<dyn Inbound>;
}

impl<F> InboundFactory for F
where
    F: Fn(&Arc<Session>) -> Box<dyn Inbound> + Send + Sync,
{
    fn create(&self, session: &Arc<Session>) -> Box<dyn Inbound> {
        self(session)
    }
}

struct Dispatch<C> {
    codec: Arc<C>,
    pool: Arc<dyn BufferProvider>,
    workers: Arc<dyn WorkerPool>,
    handler: Arc<dyn Handler>,
}

/// Builds a `FramedInbound` per channel; all of them share one codec,
/// buffer pool, worker pool and handler.
pub struct FramedFactory<C> {
    dispatch: Arc<Dispatch<C>>,
}

impl<C> FramedFactory<C>
where
    C: ProtocolDecoder + ProtocolEncoder + 'static,
{
    pub fn new(
        codec: C,
        pool: Arc<dyn BufferProvider>,
        workers: Arc<dyn WorkerPool>,
        handler: Arc<dyn Handler>,
    ) -> Self {
        Self {
            dispatch: Arc::new(Dispatch {
                codec: Arc::new(codec),
                pool,
                workers,
                handler,
            }),
        }
    }

    pub fn inbound(&self) -> FramedInbound<C> {
        FramedInbound {
            acc: FrameAccumulator::new(),
            dispatch: self.dispatch.clone(),
        }
    }
}

impl<C> InboundFactory for FramedFactory<C>
where
    C: ProtocolDecoder + ProtocolEncoder + 'static,
{
    fn create(&self, _session: &Arc<Session>) -> Box<dyn Inbound> {
        Box::new(self.inbound())
    }
}

/// Decodes frames and hands data frames to the worker pool in arrival
/// order. Heartbeats only refresh liveness.
pub struct FramedInbound<C> {
    acc: FrameAccumulator,
    dispatch: Arc<Dispatch<C>>,
}

/// Hand one data frame to the worker pool. The task closes the session if
/// the handler fails or panics; a rejected task is dropped, releasing the
/// payload, and the error closes the channel.
fn dispatch_request<C>(
    dispatch: &Dispatch<C>,
    session: &Arc<Session>,
    stream_id: u32,
    service_len: usize,
    payload: PooledBuf,
) -> Result<()>
where
    C: ProtocolDecoder + ProtocolEncoder + 'static,
{
    let request = Request::new(session.clone(), stream_id, service_len, payload);
    let handler = dispatch.handler.clone();
    let encoder: Arc<dyn ProtocolEncoder> = dispatch.codec.clone();
    let session = session.clone();
    let task = Box::new(move || {
        let mut response = Response::new(session.clone(), stream_id, encoder);
        let outcome =
            panic::catch_unwind(AssertUnwindSafe(|| handler.handle(request, &mut response)));
        let failed = match outcome {
            Ok(Ok(())) => {
                if let Err(e) = response.finish() {
                    tracing::debug!(session = session.id(), error = %e, "response dropped");
                }
                false
            }
            Ok(Err(e)) => {
                tracing::warn!(session = session.id(), stream_id, error = %e, "handler failed");
                true
            }
            Err(_) => {
                tracing::error!(session = session.id(), stream_id, "handler panicked");
                true
            }
        };
        if failed {
            let _ = session.close();
        }
    });
    dispatch.workers.execute(task).map_err(NioError::from)
}

impl<C> Inbound for FramedInbound<C>
where
    C: ProtocolDecoder + ProtocolEncoder + 'static,
{
    fn on_bytes(&mut self, session: &Arc<Session>, data: &[u8]) -> Result<()> {
        let dispatch = &*self.dispatch;
        self.acc.feed(&*dispatch.codec, &*dispatch.pool, data, |frame| match frame {
            Frame::Heartbeat { .. } => {
                session.touch();
                Ok(())
            }
            Frame::Data {
                stream_id,
                service_len,
                payload,
            } => dispatch_request(dispatch, session, stream_id, service_len, payload),
        })
    }

    fn on_close(&mut self, _session: &Arc<Session>) {
        self.acc.reset();
    }
}
