use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::ops::ControlFlow;
use std::thread;

use tombscan::SlotQueue;

/// Benchmark: One broadcast across N idle slots
fn bench_broadcast(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcast");

    for slots in [10usize, 100, 1_000, 10_000].iter() {
        let queue = SlotQueue::new(*slots, 64);
        let _held: Vec<_> = (0..*slots).map(|_| queue.get_node().unwrap()).collect();

        group.bench_with_input(BenchmarkId::new("scan", slots), slots, |b, _| {
            let mut message = 0u64;
            b.iter(|| {
                message += 1;
                black_box(queue.scan(message, || ControlFlow::Continue(())))
            });
        });

        queue.shutdown();
    }

    group.finish();
}

/// Benchmark: Broadcast with subscribers draining their slots
///
/// Each subscriber thread blocks in `recv` until the queue is shut down.
fn bench_broadcast_with_subscribers(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcast_with_subscribers");
    group.sample_size(20);

    for subscribers in [2usize, 4, 8].iter() {
        let queue = SlotQueue::new(*subscribers, 64);
        let handles: Vec<_> = (0..*subscribers)
            .map(|_| {
                let slot = queue.get_node().unwrap();
                thread::spawn(move || {
                    let mut received = 0u64;
                    while slot.recv().is_some() {
                        received += 1;
                    }
                    received
                })
            })
            .collect();

        group.bench_with_input(
            BenchmarkId::new("scan", subscribers),
            subscribers,
            |b, _| {
                b.iter(|| black_box(queue.scan(1u64, || ControlFlow::Continue(()))));
            },
        );

        queue.shutdown();
        for handle in handles {
            let _ = handle.join();
        }
    }

    group.finish();
}

/// Benchmark: Subscriber churn
///
/// Registers and discards a slot per iteration; the pool recycles slots
/// once collection removes them.
fn bench_subscribe_discard(c: &mut Criterion) {
    let mut group = c.benchmark_group("subscribe_discard");

    for gc_threshold in [8usize, 64, 512].iter() {
        group.bench_with_input(
            BenchmarkId::new("get_discard_scan", gc_threshold),
            gc_threshold,
            |b, &gc_threshold| {
                let queue = SlotQueue::new(1_024, gc_threshold);
                b.iter(|| {
                    if let Ok(slot) = queue.get_node() {
                        queue.discard_node(&slot);
                    }
                    black_box(queue.scan(0u8, || ControlFlow::Continue(())))
                });
                queue.shutdown();
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_broadcast,
    bench_broadcast_with_subscribers,
    bench_subscribe_discard
);
criterion_main!(benches);
