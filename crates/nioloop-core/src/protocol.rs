//! Protocol framing.
//!
//! A codec is split in two stateless halves: a `ProtocolDecoder` that
//! understands a fixed-size header, and a `ProtocolEncoder` that writes
//! one. Per-connection state lives in a `FrameAccumulator`, which turns an
//! arbitrary split of the byte stream into whole frames:
//!
//! ```text
//!   bytes ──► [header: wait until header_len bytes] ──► len == 0 ─► Heartbeat
//!                        │
//!                        └─► acquire payload(len) ──► fill ──► Data
//! ```
//!
//! No payload buffer is allocated until the header is complete, and a
//! frame is never emitted before its declared length has arrived.
//!
//! A header may declare that the payload starts with a target service
//! name (`service_len` bytes of UTF-8). The accumulator validates it and
//! steps the payload's read position past it, so `payload.as_slice()` is
//! always the request body.

use bytes::BytesMut;

use crate::buffer::{BufferProvider, PooledBuf};
use crate::error::{NioError, Result};

/// Upper bound on `ProtocolDecoder::header_len`.
pub const MAX_HEADER_LEN: usize = 32;

/// Decoded fixed-size header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Stream the frame belongs to; echoed back as the correlation id.
    pub stream_id: u32,
    /// Bytes of payload following the header, service name included.
    pub payload_len: usize,
    /// Leading payload bytes naming the target service; 0 for none.
    pub service_len: usize,
}

/// Header parsing half of a codec.
pub trait ProtocolDecoder: Send + Sync {
    /// Fixed header size, at most `MAX_HEADER_LEN`.
    fn header_len(&self) -> usize;

    /// Largest payload the decoder accepts.
    fn max_payload(&self) -> usize;

    /// `header.len() == header_len()` is guaranteed by the caller.
    fn decode_header(&self, header: &[u8]) -> Result<FrameHeader>;
}

/// Serializing half of a codec.
pub trait ProtocolEncoder: Send + Sync {
    /// Append header + payload to `out`.
    fn encode(&self, stream_id: u32, payload: &[u8], out: &mut BytesMut);

    fn encoded_len(&self, payload_len: usize) -> usize;
}

/// One complete protocol unit.
#[derive(Debug)]
pub enum Frame {
    /// Zero-length keep-alive. Refreshes liveness, carries nothing.
    Heartbeat { stream_id: u32 },
    /// Fully received payload. The first `service_len` bytes, already
    /// consumed, are the target service name.
    Data {
        stream_id: u32,
        service_len: usize,
        payload: PooledBuf,
    },
}

impl Frame {
    pub fn stream_id(&self) -> u32 {
        match self {
            Frame::Heartbeat { stream_id } | Frame::Data { stream_id, .. } => *stream_id,
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Frame::Heartbeat { .. })
    }

    /// Target service named by a data frame, if any.
    pub fn service(&self) -> Option<&str> {
        match self {
            Frame::Data {
                service_len,
                payload,
                ..
            } => service_name(payload, *service_len),
            Frame::Heartbeat { .. } => None,
        }
    }
}

/// The service name in front of `payload`'s read position.
pub fn service_name(payload: &PooledBuf, service_len: usize) -> Option<&str> {
    if service_len == 0 {
        return None;
    }
    std::str::from_utf8(payload.consumed().get(..service_len)?).ok()
}

struct Pending {
    stream_id: u32,
    service_len: usize,
    payload: PooledBuf,
}

/// Per-connection decode state.
pub struct FrameAccumulator {
    header: [u8; MAX_HEADER_LEN],
    header_filled: usize,
    pending: Option<Pending>,
}

impl Default for FrameAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameAccumulator {
    pub fn new() -> Self {
        Self {
            header: [0; MAX_HEADER_LEN],
            header_filled: 0,
            pending: None,
        }
    }

    /// No partial header or payload is held.
    pub fn is_idle(&self) -> bool {
        self.header_filled == 0 && self.pending.is_none()
    }

    /// Drop any partial frame, releasing its payload buffer.
    pub fn reset(&mut self) {
        self.header_filled = 0;
        self.pending = None;
    }

    /// Consume `input`, calling `emit` for every frame it completes, in
    /// stream order. Leftover bytes stay buffered for the next call.
    ///
    /// An error from the decoder, the pool or `emit` stops decoding; the
    /// connection is expected to be closed.
    pub fn feed<D, F>(
        &mut self,
        decoder: &D,
        pool: &dyn BufferProvider,
        mut input: &[u8],
        mut emit: F,
    ) -> Result<()>
    where
        D: ProtocolDecoder + ?Sized,
        F: FnMut(Frame) -> Result<()>,
    {
        let header_len = decoder.header_len();
        debug_assert!(header_len > 0 && header_len <= MAX_HEADER_LEN);

        while !input.is_empty() {
            if let Some(mut pending) = self.pending.take() {
                let n = pending.payload.put_slice(input);
                input = &input[n..];
                if pending.payload.is_full() {
                    emit(pending.into_frame()?)?;
                } else {
                    self.pending = Some(pending);
                }
                continue;
            }

            let n = (header_len - self.header_filled).min(input.len());
            self.header[self.header_filled..self.header_filled + n].copy_from_slice(&input[..n]);
            self.header_filled += n;
            input = &input[n..];
            if self.header_filled < header_len {
                break;
            }
            self.header_filled = 0;

            let header = decoder.decode_header(&self.header[..header_len])?;
            if header.payload_len > decoder.max_payload() {
                return Err(NioError::FrameTooLarge {
                    len: header.payload_len,
                    max: decoder.max_payload(),
                });
            }
            if header.service_len > header.payload_len {
                return Err(NioError::MalformedHeader);
            }
            if header.payload_len == 0 {
                emit(Frame::Heartbeat { stream_id: header.stream_id })?;
                continue;
            }
            self.pending = Some(Pending {
                stream_id: header.stream_id,
                service_len: header.service_len,
                payload: pool.acquire(header.payload_len)?,
            });
        }
        Ok(())
    }
}

impl Pending {
    /// Check the service name and step over it.
    fn into_frame(mut self) -> Result<Frame> {
        if self.service_len > 0 {
            let name = &self.payload.as_slice()[..self.service_len];
            if std::str::from_utf8(name).is_err() {
                return Err(NioError::MalformedHeader);
            }
            self.payload.advance(self.service_len);
        }
        Ok(Frame::Data {
            stream_id: self.stream_id,
            service_len: self.service_len,
            payload: self.payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// `[u16 id][u16 len]` big-endian.
    struct TinyCodec;

    impl ProtocolDecoder for TinyCodec {
        fn header_len(&self) -> usize {
            4
        }
        fn max_payload(&self) -> usize {
            64
        }
        fn decode_header(&self, h: &[u8]) -> Result<FrameHeader> {
            Ok(FrameHeader {
                stream_id: u16::from_be_bytes([h[0], h[1]]) as u32,
                payload_len: u16::from_be_bytes([h[2], h[3]]) as usize,
                service_len: 0,
            })
        }
    }

    /// `[u8 id][u8 service_len][u16 len]`; `len` counts the name too.
    struct NamedCodec;

    impl ProtocolDecoder for NamedCodec {
        fn header_len(&self) -> usize {
            4
        }
        fn max_payload(&self) -> usize {
            64
        }
        fn decode_header(&self, h: &[u8]) -> Result<FrameHeader> {
            Ok(FrameHeader {
                stream_id: h[0] as u32,
                service_len: h[1] as usize,
                payload_len: u16::from_be_bytes([h[2], h[3]]) as usize,
            })
        }
    }

    fn named(id: u8, service: &[u8], body: &[u8]) -> Vec<u8> {
        let mut v = vec![id, service.len() as u8];
        v.extend_from_slice(&((service.len() + body.len()) as u16).to_be_bytes());
        v.extend_from_slice(service);
        v.extend_from_slice(body);
        v
    }

    #[derive(Default)]
    struct CountingProvider(AtomicUsize);

    impl BufferProvider for CountingProvider {
        fn acquire(&self, min_size: usize) -> Result<PooledBuf> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(PooledBuf::unpooled(min_size))
        }
        fn in_use(&self) -> usize {
            0
        }
        fn pool_size(&self) -> usize {
            0
        }
    }

    fn frame(id: u16, payload: &[u8]) -> Vec<u8> {
        let mut v = id.to_be_bytes().to_vec();
        v.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        v.extend_from_slice(payload);
        v
    }

    #[test]
    fn test_partial_header_does_not_allocate() {
        let pool = CountingProvider::default();
        let mut acc = FrameAccumulator::new();
        let bytes = frame(1, b"ping");
        acc.feed(&TinyCodec, &pool, &bytes[..3], |_| panic!("no frame yet")).unwrap();
        assert_eq!(pool.0.load(Ordering::SeqCst), 0);
        assert!(!acc.is_idle());

        let mut out = Vec::new();
        acc.feed(&TinyCodec, &pool, &bytes[3..], |f| {
            out.push(f);
            Ok(())
        })
        .unwrap();
        assert_eq!(pool.0.load(Ordering::SeqCst), 1);
        assert_eq!(out.len(), 1);
        assert!(acc.is_idle());
        match &out[0] {
            Frame::Data {
                stream_id, payload, ..
            } => {
                assert_eq!(*stream_id, 1);
                assert_eq!(payload.as_slice(), b"ping");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_heartbeat_and_back_to_back_frames() {
        let pool = CountingProvider::default();
        let mut acc = FrameAccumulator::new();
        let mut bytes = frame(7, b"");
        bytes.extend(frame(2, b"ab"));
        bytes.extend(frame(3, b"cde"));

        let mut out = Vec::new();
        acc.feed(&TinyCodec, &pool, &bytes, |f| {
            out.push(f);
            Ok(())
        })
        .unwrap();

        assert_eq!(out.len(), 3);
        assert!(out[0].is_heartbeat());
        assert_eq!(out[0].stream_id(), 7);
        assert_eq!(out[1].stream_id(), 2);
        assert_eq!(out[2].stream_id(), 3);
        // heartbeat never allocates
        assert_eq!(pool.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_oversize_frame_rejected() {
        let pool = CountingProvider::default();
        let mut acc = FrameAccumulator::new();
        let mut header = 1u16.to_be_bytes().to_vec();
        header.extend_from_slice(&65u16.to_be_bytes());
        let err = acc.feed(&TinyCodec, &pool, &header, |_| Ok(())).unwrap_err();
        assert!(matches!(err, NioError::FrameTooLarge { len: 65, max: 64 }));
        assert_eq!(pool.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_one_byte_reads() {
        let pool = CountingProvider::default();
        let mut acc = FrameAccumulator::new();
        let mut bytes = frame(1, b"hello");
        bytes.extend(frame(1, b"world"));

        let mut out = Vec::new();
        for b in &bytes {
            acc.feed(&TinyCodec, &pool, std::slice::from_ref(b), |f| {
                out.push(f);
                Ok(())
            })
            .unwrap();
        }
        let payloads: Vec<Vec<u8>> = out
            .iter()
            .map(|f| match f {
                Frame::Data { payload, .. } => payload.as_slice().to_vec(),
                Frame::Heartbeat { .. } => Vec::new(),
            })
            .collect();
        assert_eq!(payloads, vec![b"hello".to_vec(), b"world".to_vec()]);
    }

    #[test]
    fn test_service_name_is_split_from_body() {
        let pool = CountingProvider::default();
        let mut acc = FrameAccumulator::new();
        let mut bytes = named(4, b"billing", b"charge");
        bytes.extend(named(5, b"", b"plain"));

        let mut out = Vec::new();
        for chunk in bytes.chunks(3) {
            acc.feed(&NamedCodec, &pool, chunk, |f| {
                out.push(f);
                Ok(())
            })
            .unwrap();
        }
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].service(), Some("billing"));
        assert_eq!(out[1].service(), None);
        match &out[0] {
            Frame::Data { payload, .. } => assert_eq!(payload.as_slice(), b"charge"),
            other => panic!("unexpected {other:?}"),
        }
        match &out[1] {
            Frame::Data { payload, .. } => assert_eq!(payload.as_slice(), b"plain"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_bad_service_names_are_malformed() {
        let pool = CountingProvider::default();

        // name longer than the whole payload
        let mut acc = FrameAccumulator::new();
        let err = acc.feed(&NamedCodec, &pool, &[1, 9, 0, 4], |_| Ok(())).unwrap_err();
        assert!(matches!(err, NioError::MalformedHeader));
        assert_eq!(pool.0.load(Ordering::SeqCst), 0);

        // not UTF-8
        let mut acc = FrameAccumulator::new();
        let bytes = named(1, &[0xff, 0xfe], b"x");
        let err = acc.feed(&NamedCodec, &pool, &bytes, |_| Ok(())).unwrap_err();
        assert!(matches!(err, NioError::MalformedHeader));
    }
}
