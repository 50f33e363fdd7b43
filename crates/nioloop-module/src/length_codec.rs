//! `LengthFieldCodec`: default framing.
//!
//! ```text
//!  0        4        8
//!  +--------+--------+------------------+
//!  | stream | length | payload (length) |
//!  +--------+--------+------------------+
//!   u32 BE   u32 BE
//! ```
//!
//! A frame with `length == 0` is a heartbeat.
//!
//! `with_service_field` adds a u16 naming how many leading payload bytes
//! are the target service name. `length` still covers the whole payload:
//!
//! ```text
//!  0        4        8   10
//!  +--------+--------+----+---------+------+
//!  | stream | length |slen| service | body |
//!  +--------+--------+----+---------+------+
//! ```

use bytes::{BufMut, BytesMut};

use nioloop_core::error::{NioError, Result};
use nioloop_core::protocol::{FrameHeader, ProtocolDecoder, ProtocolEncoder};

pub const HEADER_LEN: usize = 8;

/// Header size with the service-name field.
pub const SERVICE_HEADER_LEN: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct LengthFieldCodec {
    max_payload: usize,
    service_field: bool,
}

impl LengthFieldCodec {
    /// `max_payload` is clamped to what the length field can express.
    pub fn new(max_payload: usize) -> Self {
        Self {
            max_payload: max_payload.min(u32::MAX as usize),
            service_field: false,
        }
    }

    /// Frames carry a target service name in front of the body.
    pub fn with_service_field(max_payload: usize) -> Self {
        Self {
            service_field: true,
            ..Self::new(max_payload)
        }
    }

    pub fn has_service_field(&self) -> bool {
        self.service_field
    }

    /// Encode a heartbeat for `stream_id`.
    pub fn heartbeat(&self, stream_id: u32, out: &mut BytesMut) {
        self.encode(stream_id, &[], out);
    }

    /// Encode a frame addressed to `service`. Without a service field, or
    /// with a name longer than `u16::MAX`, the name is rejected.
    pub fn encode_to(
        &self,
        stream_id: u32,
        service: &str,
        body: &[u8],
        out: &mut BytesMut,
    ) -> Result<()> {
        if !self.service_field && !service.is_empty() {
            return Err(NioError::MalformedHeader);
        }
        let service_len = u16::try_from(service.len()).map_err(|_| NioError::MalformedHeader)?;
        let len = service.len() + body.len();
        if len > self.max_payload {
            return Err(NioError::FrameTooLarge {
                len,
                max: self.max_payload,
            });
        }
        out.reserve(self.header_len() + len);
        out.put_u32(stream_id);
        out.put_u32(len as u32);
        if self.service_field {
            out.put_u16(service_len);
        }
        out.put_slice(service.as_bytes());
        out.put_slice(body);
        Ok(())
    }
}

impl ProtocolDecoder for LengthFieldCodec {
    fn header_len(&self) -> usize {
        if self.service_field {
            SERVICE_HEADER_LEN
        } else {
            HEADER_LEN
        }
    }

    fn max_payload(&self) -> usize {
        self.max_payload
    }

    fn decode_header(&self, header: &[u8]) -> Result<FrameHeader> {
        let (id, len, service_len) = match (self.service_field, header) {
            (false, [a, b, c, d, e, f, g, h]) => (
                u32::from_be_bytes([*a, *b, *c, *d]),
                u32::from_be_bytes([*e, *f, *g, *h]),
                0,
            ),
            (true, [a, b, c, d, e, f, g, h, i, j]) => (
                u32::from_be_bytes([*a, *b, *c, *d]),
                u32::from_be_bytes([*e, *f, *g, *h]),
                u16::from_be_bytes([*i, *j]),
            ),
            _ => return Err(NioError::MalformedHeader),
        };
        Ok(FrameHeader {
            stream_id: id,
            payload_len: len as usize,
            service_len: service_len as usize,
        })
    }
}

impl ProtocolEncoder for LengthFieldCodec {
    /// Responses never name a service.
    fn encode(&self, stream_id: u32, payload: &[u8], out: &mut BytesMut) {
        out.reserve(self.header_len() + payload.len());
        out.put_u32(stream_id);
        out.put_u32(payload.len() as u32);
        if self.service_field {
            out.put_u16(0);
        }
        out.put_slice(payload);
    }

    fn encoded_len(&self, payload_len: usize) -> usize {
        self.header_len() + payload_len
    }
}
