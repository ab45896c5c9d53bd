//! Scan Throughput Benchmarks
//!
//! Runs complete scans against an in-memory cluster to measure coordinator
//! and worker pool overhead per range query.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use token_scan::session::MemoryCluster;
use token_scan::{DispatchMode, ScanConfig, ScanCoordinator};

// =============================================================================
// Helpers
// =============================================================================

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_pool_sizes(c: &mut Criterion) {
    let rt = runtime();
    let cluster = MemoryCluster::evenly_spaced(100_000);
    let mut group = c.benchmark_group("scan_pool_size");
    group.throughput(Throughput::Elements(1_200));
    group.sample_size(20);

    for pool_size in [1usize, 4, 16] {
        group.bench_with_input(BenchmarkId::from_parameter(pool_size), &pool_size, |b, &p| {
            b.to_async(&rt).iter(|| {
                let coordinator =
                    ScanCoordinator::new(Arc::new(cluster.clone()), ScanConfig::default());
                async move { coordinator.run_scan(Some(12), p).await }
            })
        });
    }

    group.finish();
}

fn bench_dispatch_modes(c: &mut Criterion) {
    let rt = runtime();
    let cluster = MemoryCluster::evenly_spaced(100_000);
    let mut group = c.benchmark_group("scan_dispatch");
    group.throughput(Throughput::Elements(1_200));
    group.sample_size(20);

    let modes = [
        ("per_range", DispatchMode::PerRange),
        ("batched_32", DispatchMode::Batched { concurrency: 32 }),
    ];
    for (name, dispatch) in modes {
        group.bench_function(name, |b| {
            b.to_async(&rt).iter(|| {
                let config = ScanConfig::default().dispatch(dispatch);
                let coordinator = ScanCoordinator::new(Arc::new(cluster.clone()), config);
                async move { coordinator.run_scan(Some(12), 4).await }
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_pool_sizes, bench_dispatch_modes);
criterion_main!(benches);
