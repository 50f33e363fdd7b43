//! Decode throughput for the default codec and pool.
//!
//! Run: cargo bench -p nioloop-module --bench decode

use bytes::BytesMut;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};

use nioloop_core::protocol::{FrameAccumulator, ProtocolEncoder};
use nioloop_module::{LengthFieldCodec, SizeClassPool};

fn wire(frames: usize, payload: usize) -> BytesMut {
    let codec = LengthFieldCodec::new(usize::MAX);
    let body = vec![0xAB; payload];
    let mut out = BytesMut::new();
    for i in 0..frames {
        codec.encode(i as u32, &body, &mut out);
    }
    out
}

fn bench_decode(c: &mut Criterion) {
    let codec = LengthFieldCodec::new(1 << 20);
    let pool = SizeClassPool::default();

    let mut group = c.benchmark_group("decode");
    for &(frames, payload) in &[(1024usize, 64usize), (64, 16 * 1024)] {
        let bytes = wire(frames, payload);
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_function(format!("{frames}x{payload}/whole"), |b| {
            b.iter_batched(
                FrameAccumulator::new,
                |mut acc| {
                    let mut n = 0usize;
                    acc.feed(&codec, &pool, &bytes, |_| {
                        n += 1;
                        Ok(())
                    })
                    .ok();
                    n
                },
                BatchSize::SmallInput,
            )
        });
        group.bench_function(format!("{frames}x{payload}/1500b-reads"), |b| {
            b.iter_batched(
                FrameAccumulator::new,
                |mut acc| {
                    let mut n = 0usize;
                    for chunk in bytes.chunks(1500) {
                        acc.feed(&codec, &pool, chunk, |_| {
                            n += 1;
                            Ok(())
                        })
                        .ok();
                    }
                    n
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

criterion_group!(benches, bench_decode);
criterion_main!(benches);
