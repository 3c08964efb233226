//! # P2P Router Benchmarks
//!
//! | Area | Operation | Expectation |
//! |------|-----------|-------------|
//! | Bounded FIFO | push/pop under each drop policy | O(1), no allocation when full |
//! | Scheduling | WRR round construction | negligible next to a frame write |
//! | Framing | channel tag encode/decode | O(payload) copy at most |
//! | Routing | unicast over the memory network | bounded by the write worker |

use std::time::Duration;

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use p2p_router::domain::{decode_frame, encode_frame, BoundedFifo, WeightedRoundRobin};
use p2p_router::{ChannelDescriptor, ChannelId, DropPolicy, Envelope};
use p2p_tests::harness::{connect, TestNetwork};

// ============================================================================
// Bounded FIFO
// ============================================================================

fn bench_bounded_fifo(c: &mut Criterion) {
    let mut group = c.benchmark_group("bounded-fifo");

    for policy in [DropPolicy::DropOldest, DropPolicy::DropNewest, DropPolicy::Reject] {
        group.bench_with_input(
            BenchmarkId::new("push_full", format!("{:?}", policy)),
            &policy,
            |b, policy| {
                let mut fifo = BoundedFifo::new(1024);
                for i in 0..1024u64 {
                    fifo.push(i, *policy);
                }
                b.iter(|| black_box(fifo.push(black_box(7u64), *policy).is_drop()))
            },
        );
    }

    group.bench_function("push_pop_cycle", |b| {
        let mut fifo = BoundedFifo::new(256);
        b.iter(|| {
            for i in 0..256u64 {
                fifo.push(i, DropPolicy::Block);
            }
            while let Some(v) = fifo.pop() {
                black_box(v);
            }
        })
    });

    group.finish();
}

// ============================================================================
// Scheduling and framing
// ============================================================================

fn bench_wrr(c: &mut Criterion) {
    let mut group = c.benchmark_group("wrr");
    for channels in [2usize, 8, 32] {
        let weights: Vec<u16> = (0..channels).map(|i| (i % 5 + 1) as u16).collect();
        group.bench_with_input(BenchmarkId::new("round", channels), &weights, |b, w| {
            b.iter(|| black_box(WeightedRoundRobin::new(w).len()))
        });
    }
    group.finish();
}

fn bench_frames(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame");
    for size in [64usize, 4 * 1024, 64 * 1024] {
        let payload = vec![0xABu8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("encode", size), &payload, |b, p| {
            b.iter(|| black_box(encode_frame(ChannelId(0x20), p)))
        });

        let frame = encode_frame(ChannelId(0x20), &payload);
        group.bench_with_input(BenchmarkId::new("decode", size), &frame, |b, f| {
            b.iter(|| black_box(decode_frame(Bytes::clone(f)).is_ok()))
        });
    }
    group.finish();
}

// ============================================================================
// Routing over the memory network
// ============================================================================

fn bench_unicast(c: &mut Criterion) {
    const CH: ChannelId = ChannelId(0x30);
    const BATCH: usize = 256;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();
    let descriptor = ChannelDescriptor::new(CH, "tx").with_capacity(BATCH);
    let net = TestNetwork::new();
    let (a, b) = rt.block_on(async {
        let a = net.node(1, &[descriptor.clone()]);
        let b = net.node(2, &[descriptor.clone()]);
        connect(&a, &b).await;
        (a, b)
    });

    let mut group = c.benchmark_group("router");
    group.measurement_time(Duration::from_secs(10));
    for size in [256usize, 16 * 1024] {
        let payload = Bytes::from(vec![0x5Au8; size]);
        group.throughput(Throughput::Bytes((size * BATCH) as u64));
        group.bench_with_input(BenchmarkId::new("unicast_batch", size), &payload, |bench, p| {
            bench.iter(|| {
                rt.block_on(async {
                    for _ in 0..BATCH {
                        a.channel(CH)
                            .send(Envelope::to_peer(b.id(), p.clone()))
                            .await
                            .unwrap();
                    }
                    for _ in 0..BATCH {
                        black_box(b.channel(CH).receive().await.unwrap());
                    }
                })
            })
        });
    }
    group.finish();

    rt.block_on(async {
        a.stop().await;
        b.stop().await;
    });
}

criterion_group!(benches, bench_bounded_fifo, bench_wrr, bench_frames, bench_unicast);
criterion_main!(benches);
