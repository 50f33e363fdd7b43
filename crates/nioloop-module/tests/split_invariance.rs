//! However the byte stream is split into reads, the accumulator yields
//! the same frames in the same order and leaks no pooled buffers.

use bytes::BytesMut;
use proptest::prelude::*;

use nioloop_core::buffer::BufferProvider;
use nioloop_core::error::NioError;
use nioloop_core::protocol::{Frame, FrameAccumulator, ProtocolEncoder};
use nioloop_module::{LengthFieldCodec, SizeClassPool};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Seen {
    Heartbeat(u32),
    Data(u32, Vec<u8>),
}

fn decode_in_chunks(wire: &[u8], cuts: &[usize], pool: &SizeClassPool) -> Vec<Seen> {
    let codec = LengthFieldCodec::new(4096);
    let mut acc = FrameAccumulator::new();
    let mut seen = Vec::new();
    let mut sink = |f: Frame| {
        seen.push(match f {
            Frame::Heartbeat { stream_id } => Seen::Heartbeat(stream_id),
            Frame::Data { stream_id, payload, .. } => Seen::Data(stream_id, payload.as_slice().to_vec()),
        });
        Ok::<(), NioError>(())
    };

    let mut at = 0;
    for &cut in cuts {
        let end = (at + cut).min(wire.len());
        acc.feed(&codec, pool, &wire[at..end], &mut sink).unwrap();
        at = end;
    }
    acc.feed(&codec, pool, &wire[at..], &mut sink).unwrap();
    assert!(acc.is_idle());
    seen
}

fn frames() -> impl Strategy<Value = Vec<(u32, Vec<u8>)>> {
    prop::collection::vec(
        (any::<u32>(), prop::collection::vec(any::<u8>(), 0..300)),
        1..20,
    )
}

proptest! {
    #[test]
    fn prop_any_split_yields_same_frames(
        frames in frames(),
        cuts in prop::collection::vec(1usize..64, 0..200),
    ) {
        let codec = LengthFieldCodec::new(4096);
        let mut wire = BytesMut::new();
        for (id, body) in &frames {
            codec.encode(*id, body, &mut wire);
        }
        let expected: Vec<Seen> = frames
            .iter()
            .map(|(id, body)| if body.is_empty() {
                Seen::Heartbeat(*id)
            } else {
                Seen::Data(*id, body.clone())
            })
            .collect();

        let pool = SizeClassPool::default();
        let whole = decode_in_chunks(&wire, &[], &pool);
        let split = decode_in_chunks(&wire, &cuts, &pool);
        let bytewise = decode_in_chunks(&wire, &vec![1; wire.len()], &pool);

        prop_assert_eq!(&whole, &expected);
        prop_assert_eq!(&split, &expected);
        prop_assert_eq!(&bytewise, &expected);
        prop_assert_eq!(pool.in_use(), 0);
    }
}
