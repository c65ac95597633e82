//! Benchmarks for registry operations using criterion.
//!
//! These benchmarks measure the performance of the in-memory registry:
//! - Creating entries for submitted jobs
//! - Lookups against a populated registry
//! - The full transition path (create → claim → progress → complete)
//! - Progress update batches
//! - Queue-time cancellation

#![allow(missing_docs)]

use std::sync::Arc;

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use docket::job::{JobDescriptor, JobId, JobOptions, OutcomeHandle, Progress};
use docket::registry::{InMemoryJobRegistry, JobRegistry};
use tokio::runtime::Runtime;

/// Creates a tokio runtime for async benchmarks.
fn create_runtime() -> Runtime {
    Runtime::new().expect("Failed to create tokio runtime")
}

fn descriptor() -> JobDescriptor {
    JobDescriptor::new(b"benchmark document".to_vec(), JobOptions::new())
}

fn outcome_handle(id: JobId) -> OutcomeHandle {
    OutcomeHandle {
        key: format!("bench/{id}"),
        written_at: Utc::now(),
    }
}

/// Benchmark: Create a registry entry.
fn bench_create(c: &mut Criterion) {
    let rt = create_runtime();

    let mut group = c.benchmark_group("registry_create");
    group.sample_size(100);
    group.measurement_time(std::time::Duration::from_secs(10));

    group.bench_function("in_memory", |b| {
        let registry = Arc::new(InMemoryJobRegistry::new());

        b.to_async(&rt).iter(|| async {
            let descriptor = descriptor();
            let record = registry
                .create(&descriptor)
                .await
                .expect("create should succeed");
            black_box(record);
        });
    });

    group.finish();
}

/// Benchmark: Lookups against a registry holding many entries.
fn bench_get_under_load(c: &mut Criterion) {
    let rt = create_runtime();

    let mut group = c.benchmark_group("registry_get");
    group.sample_size(100);

    for population in [100usize, 1_000, 10_000] {
        group.bench_with_input(
            BenchmarkId::new("populated", population),
            &population,
            |b, &population| {
                let registry = Arc::new(InMemoryJobRegistry::new());
                let probe_id = rt.block_on(async {
                    let mut probe_id = JobId::new();
                    for i in 0..population {
                        let descriptor = descriptor();
                        if i == population / 2 {
                            probe_id = descriptor.id;
                        }
                        registry
                            .create(&descriptor)
                            .await
                            .expect("create should succeed");
                    }
                    probe_id
                });

                b.to_async(&rt).iter(|| async {
                    let record = registry.get(probe_id).await.expect("get should succeed");
                    black_box(record);
                });
            },
        );
    }

    group.finish();
}

/// Benchmark: Full transition path for one job.
fn bench_full_lifecycle(c: &mut Criterion) {
    let rt = create_runtime();

    let mut group = c.benchmark_group("registry_lifecycle");
    group.sample_size(100);
    group.throughput(Throughput::Elements(1));

    group.bench_function("create_claim_progress_complete", |b| {
        let registry = Arc::new(InMemoryJobRegistry::new());

        b.to_async(&rt).iter(|| async {
            let descriptor = descriptor();
            let id = descriptor.id;
            registry
                .create(&descriptor)
                .await
                .expect("create should succeed");
            registry
                .try_start(id, "bench-worker")
                .await
                .expect("claim should succeed");
            registry
                .record_progress(id, Progress::new(1, 2))
                .await
                .expect("progress should succeed");
            registry
                .record_progress(id, Progress::new(2, 2))
                .await
                .expect("progress should succeed");
            let record = registry
                .complete(id, outcome_handle(id))
                .await
                .expect("complete should succeed");
            black_box(record);
        });
    });

    group.finish();
}

/// Benchmark: Batches of monotonic progress updates.
fn bench_progress_updates(c: &mut Criterion) {
    let rt = create_runtime();

    let mut group = c.benchmark_group("registry_progress");
    group.sample_size(50);

    for updates in [10u64, 50, 100] {
        group.throughput(Throughput::Elements(updates));
        group.bench_with_input(
            BenchmarkId::new("in_memory", updates),
            &updates,
            |b, &updates| {
                let registry = Arc::new(InMemoryJobRegistry::new());

                b.to_async(&rt).iter(|| async {
                    let descriptor = descriptor();
                    let id = descriptor.id;
                    registry
                        .create(&descriptor)
                        .await
                        .expect("create should succeed");
                    registry
                        .try_start(id, "bench-worker")
                        .await
                        .expect("claim should succeed");
                    for n in 1..=updates {
                        let applied = registry
                            .record_progress(id, Progress::new(n, updates))
                            .await
                            .expect("progress should succeed");
                        black_box(applied);
                    }
                });
            },
        );
    }

    group.finish();
}

/// Benchmark: Cancelling a job that is still queued.
fn bench_queued_cancel(c: &mut Criterion) {
    let rt = create_runtime();

    let mut group = c.benchmark_group("registry_cancel");
    group.sample_size(100);

    group.bench_function("queued", |b| {
        let registry = Arc::new(InMemoryJobRegistry::new());

        b.to_async(&rt).iter(|| async {
            let descriptor = descriptor();
            let id = descriptor.id;
            registry
                .create(&descriptor)
                .await
                .expect("create should succeed");
            let disposition = registry
                .request_cancel(id)
                .await
                .expect("cancel should succeed");
            black_box(disposition);
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_create,
    bench_get_under_load,
    bench_full_lifecycle,
    bench_progress_updates,
    bench_queued_cancel
);
criterion_main!(benches);
