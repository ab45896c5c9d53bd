//! Token Ring Partitioning Benchmarks
//!
//! Measures the cost of splitting the full ring for partition counts
//! typical of small and large clusters.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use token_scan::partition::RangePartitioner;
use token_scan::types::TokenSpace;

fn bench_full_ring(c: &mut Criterion) {
    let mut group = c.benchmark_group("partition_full_ring");
    let partitioner = RangePartitioner::full_ring();

    // 1 node, 3 nodes and 100 nodes at the default ×6 × 100
    for n in [600u64, 1_800, 60_000] {
        group.throughput(Throughput::Elements(n));
        group.bench_with_input(BenchmarkId::new("collect", n), &n, |b, &n| {
            b.iter(|| partitioner.partition(black_box(n)))
        });
        group.bench_with_input(BenchmarkId::new("iterate", n), &n, |b, &n| {
            b.iter(|| {
                partitioner
                    .subranges(black_box(n))
                    .map(|ranges| ranges.map(|r| r.len()).sum::<u128>())
            })
        });
    }

    group.finish();
}

fn bench_uneven_domain(c: &mut Criterion) {
    // Size not divisible by the count, so the remainder path is taken
    let space = TokenSpace::with_size(-1_000_000, 1_000_003).unwrap();
    let partitioner = RangePartitioner::new(space);

    c.bench_function("partition_uneven_domain_7919", |b| {
        b.iter(|| partitioner.partition(black_box(7_919)))
    });
}

criterion_group!(benches, bench_full_ring, bench_uneven_domain);
criterion_main!(benches);
