use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::ops::ControlFlow;

use tombscan::{SlotQueue, TombSet};

/// Benchmark: Manual set compaction with varying tombstone counts
///
/// The discard threshold is set above the tombstone count so nothing is
/// compacted in the background; `compact` then unlinks the whole batch.
fn bench_set_compaction(c: &mut Criterion) {
    let mut group = c.benchmark_group("set_compaction");

    for garbage_count in [10u64, 100, 1_000, 5_000].iter() {
        group.bench_with_input(
            BenchmarkId::new("compact_n_tombstones", garbage_count),
            garbage_count,
            |b, &garbage_count| {
                b.iter_batched(
                    || {
                        let set = TombSet::new(usize::MAX);
                        for i in 0..garbage_count * 2 {
                            set.put(i).unwrap();
                        }
                        for i in (0..garbage_count * 2).step_by(2) {
                            set.delete(&i).unwrap();
                        }
                        set
                    },
                    |set| black_box(set.compact()),
                    BatchSize::SmallInput,
                );
            },
        );
    }

    group.finish();
}

/// Benchmark: Manual queue collection with varying garbage counts
///
/// Half of the slots are discarded and reported by one scan, then `gc`
/// swap-removes them.
fn bench_queue_gc(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_gc");

    for garbage_count in [10usize, 100, 1_000, 5_000].iter() {
        group.bench_with_input(
            BenchmarkId::new("gc_n_slots", garbage_count),
            garbage_count,
            |b, &garbage_count| {
                b.iter_batched(
                    || {
                        let queue = SlotQueue::new(garbage_count * 2, usize::MAX);
                        let slots: Vec<_> = (0..garbage_count * 2)
                            .map(|_| queue.get_node().unwrap())
                            .collect();
                        for slot in slots.iter().step_by(2) {
                            queue.discard_node(slot);
                        }
                        queue.scan(0u32, || ControlFlow::Continue(()));
                        queue
                    },
                    |queue| black_box(queue.gc()),
                    BatchSize::SmallInput,
                );
            },
        );
    }

    group.finish();
}

/// Benchmark: Manual collection sweeping unreported slots
///
/// No scan runs before `gc`, so every discarded slot is found by the sweep.
fn bench_queue_gc_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_gc_sweep");

    for slots in [100usize, 1_000, 10_000].iter() {
        group.bench_with_input(BenchmarkId::new("sweep", slots), slots, |b, &slots| {
            b.iter_batched(
                || {
                    let queue = SlotQueue::<u32>::new(slots, usize::MAX);
                    let held: Vec<_> = (0..slots).map(|_| queue.get_node().unwrap()).collect();
                    for slot in held.iter().step_by(10) {
                        queue.discard_node(slot);
                    }
                    queue
                },
                |queue| black_box(queue.gc()),
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_set_compaction,
    bench_queue_gc,
    bench_queue_gc_sweep
);
criterion_main!(benches);
