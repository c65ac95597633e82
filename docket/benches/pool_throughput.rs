//! Benchmarks for end-to-end worker pool throughput using criterion.
//!
//! These benchmarks measure the complete delivery path:
//! enqueue → claim → process → resolve → acknowledge

#![allow(missing_docs)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::sync::broadcast;

use docket::broker::Broker;
use docket::config::WorkerPoolConfig;
use docket::events::{EventPublisher, InProcEventBus, JobEvent, JobEventPayload};
use docket::job::{JobDescriptor, JobId, JobOptions};
use docket::liveness::InMemoryWorkerDirectory;
use docket::registry::{InMemoryJobRegistry, JobRegistry};
use docket::worker::{WorkerPool, WorkerPoolBuilder};
use docket_testkit::{InMemoryBroker, InMemoryResultStore, ScriptedProcessor};

type BenchPool = WorkerPool<
    ScriptedProcessor,
    InMemoryBroker,
    InMemoryJobRegistry,
    InMemoryResultStore,
    InMemoryWorkerDirectory,
>;

struct BenchStack {
    pool: BenchPool,
    broker: Arc<InMemoryBroker>,
    registry: Arc<InMemoryJobRegistry>,
    events: Arc<InProcEventBus>,
}

fn build_stack(concurrency: usize) -> BenchStack {
    let broker = Arc::new(InMemoryBroker::default());
    let registry = Arc::new(InMemoryJobRegistry::new());
    let store = Arc::new(InMemoryResultStore::new());
    let directory = Arc::new(InMemoryWorkerDirectory::new());
    let events = Arc::new(InProcEventBus::new(65_536));

    let pool = WorkerPoolBuilder::new(WorkerPoolConfig {
        concurrency,
        poll_interval_ms: 1,
        heartbeat_interval_ms: 1_000,
        drain_timeout_seconds: 10,
    })
    .with_processor(Arc::new(ScriptedProcessor::default().with_steps(1)))
    .with_broker(Arc::clone(&broker))
    .with_registry(Arc::clone(&registry))
    .with_store(Arc::clone(&store))
    .with_directory(Arc::clone(&directory))
    .with_events(Arc::clone(&events) as Arc<dyn EventPublisher>)
    .build()
    .expect("build worker pool");

    BenchStack {
        pool,
        broker,
        registry,
        events,
    }
}

async fn enqueue_one(stack: &BenchStack) -> JobId {
    let descriptor = JobDescriptor::new(b"bench document".to_vec(), JobOptions::new());
    let id = descriptor.id;
    stack
        .registry
        .create(&descriptor)
        .await
        .expect("create should succeed");
    stack
        .broker
        .enqueue(descriptor)
        .await
        .expect("enqueue should succeed");
    id
}

/// Helper to receive the next event with lag handling.
async fn next_event(rx: &mut broadcast::Receiver<JobEvent>) -> Option<JobEvent> {
    loop {
        match rx.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

/// Benchmark: Jobs per second with varying worker counts.
fn bench_pool_throughput(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("Failed to create tokio runtime");

    let worker_counts = vec![1usize, 4, 8];
    const JOB_COUNT: usize = 200;

    let mut group = c.benchmark_group("pool_throughput");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(20));

    for worker_count in &worker_counts {
        group.throughput(Throughput::Elements(JOB_COUNT as u64));
        group.bench_with_input(
            BenchmarkId::new("workers", worker_count),
            worker_count,
            |b, &workers| {
                b.to_async(&rt).iter_custom(|iters| async move {
                    let mut total_duration = Duration::ZERO;

                    for _ in 0..iters {
                        let stack = build_stack(workers);
                        let mut rx = stack.events.subscribe();

                        let start_instant = Instant::now();
                        let mut expected = HashSet::new();
                        for _ in 0..JOB_COUNT {
                            expected.insert(enqueue_one(&stack).await);
                        }
                        stack.pool.start().await;

                        let mut completed = HashSet::new();
                        while completed.len() < expected.len() {
                            let Some(event) = next_event(&mut rx).await else {
                                break;
                            };
                            if matches!(event.payload, JobEventPayload::Succeeded) {
                                completed.insert(event.job_id);
                            }
                        }
                        assert_eq!(completed, expected);
                        total_duration += start_instant.elapsed();

                        stack.pool.shutdown().await.expect("shutdown pool");
                    }

                    total_duration
                });
            },
        );
    }

    group.finish();
}

/// Benchmark: Latency of a single job through an idle pool.
fn bench_single_job_latency(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("Failed to create tokio runtime");

    let mut group = c.benchmark_group("single_job_latency");
    group.sample_size(30);
    group.measurement_time(Duration::from_secs(15));

    group.bench_function("one_worker", |b| {
        b.to_async(&rt).iter_custom(|iters| async move {
            let stack = build_stack(1);
            let mut rx = stack.events.subscribe();
            stack.pool.start().await;

            let mut total_duration = Duration::ZERO;
            for _ in 0..iters {
                let start_instant = Instant::now();
                let id = enqueue_one(&stack).await;
                loop {
                    let Some(event) = next_event(&mut rx).await else {
                        break;
                    };
                    if event.job_id == id && matches!(event.payload, JobEventPayload::Succeeded) {
                        break;
                    }
                }
                total_duration += start_instant.elapsed();
            }

            stack.pool.shutdown().await.expect("shutdown pool");
            total_duration
        });
    });

    group.finish();
}

criterion_group!(benches, bench_pool_throughput, bench_single_job_latency);
criterion_main!(benches);
