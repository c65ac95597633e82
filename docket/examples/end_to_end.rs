//! End-to-end example with the in-memory components.
//!
//! This example wires an orchestrator and a worker pool together with
//! docket-testkit's InMemoryBroker and InMemoryResultStore, submits a
//! handful of rendering jobs, and walks through status polling,
//! cancellation, and artifact retrieval.
//!
//! For a durable production setup backed by PostgreSQL, see
//! `postgres_stack.rs`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use docket::worker::WorkerPoolBuilder;
use docket::*;
use docket_testkit::{InMemoryBroker, InMemoryResultStore};
use serde_json::json;

/// Renders a "document" page by page, reporting progress after each page.
struct PageRenderProcessor;

#[async_trait]
impl DocumentProcessor for PageRenderProcessor {
    async fn process(
        &self,
        job: JobDescriptor,
        ctx: ExecutionContext,
    ) -> anyhow::Result<JobArtifacts> {
        let pages = job.options.get("pages").and_then(|v| v.as_u64()).unwrap_or(4);

        let mut rendered = Vec::new();
        for page in 1..=pages {
            // A checkpoint before each page gives cancellation a place
            // to land.
            ctx.checkpoint()?;
            tokio::time::sleep(Duration::from_millis(80)).await;
            rendered.extend_from_slice(format!("rendered page {page} of {pages}\n").as_bytes());
            ctx.report_progress(page, pages)?;
        }
        ctx.checkpoint()?;

        let summary = format!(
            "{pages} pages rendered from {} payload bytes\n",
            job.payload.len()
        );
        Ok(JobArtifacts {
            primary: rendered,
            secondary: summary.into_bytes(),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("=== Docket End-to-End Example ===\n");
    println!("This example demonstrates:");
    println!("- Submitting jobs through the orchestrator facade");
    println!("- A worker pool executing jobs with progress reporting");
    println!("- Cooperative cancellation at processor checkpoints");
    println!("- Fetching result artifacts after completion\n");

    // Wire up the in-memory component set.
    let broker = Arc::new(InMemoryBroker::default());
    let registry = Arc::new(InMemoryJobRegistry::new());
    let store = Arc::new(InMemoryResultStore::new());
    let directory = Arc::new(InMemoryWorkerDirectory::new());
    let events = Arc::new(InProcEventBus::default());

    let orchestrator = OrchestratorBuilder::new(LivenessConfig::default())
        .with_broker(Arc::clone(&broker))
        .with_registry(Arc::clone(&registry))
        .with_store(Arc::clone(&store))
        .with_directory(Arc::clone(&directory))
        .with_events(Arc::clone(&events) as Arc<dyn EventPublisher>)
        .build()?;

    let pool = WorkerPoolBuilder::new(WorkerPoolConfig {
        concurrency: 3,
        poll_interval_ms: 50,
        heartbeat_interval_ms: 200,
        drain_timeout_seconds: 10,
    })
    .with_processor(Arc::new(PageRenderProcessor))
    .with_broker(Arc::clone(&broker))
    .with_registry(Arc::clone(&registry))
    .with_store(Arc::clone(&store))
    .with_directory(Arc::clone(&directory))
    .with_events(Arc::clone(&events) as Arc<dyn EventPublisher>)
    .build()?;

    // Print the event feed in the background.
    let mut event_rx = events.subscribe();
    let event_printer = tokio::spawn(async move {
        while let Ok(event) = event_rx.recv().await {
            println!("   [EVENT] job {} {:?}", event.job_id, event.payload);
        }
    });

    println!("1. Starting the worker pool...");
    pool.start().await;
    // Give the workers a beat to register so admission control sees them.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let report = orchestrator.health().await;
    println!(
        "   Health: {} ({} live workers)\n",
        report.status,
        report.workers.map(|p| p.live).unwrap_or(0)
    );

    println!("2. Submitting rendering jobs...");
    let mut submitted = Vec::new();
    for i in 0..4 {
        let payload = format!("document body {i}").into_bytes();
        let id = orchestrator.submit(payload, json!({ "pages": 5 })).await?;
        println!("   Submitted job {id}");
        submitted.push(id);
    }

    println!("\n3. Submitting a long job we will cancel...");
    let long_job = orchestrator
        .submit(b"huge archive scan".to_vec(), json!({ "pages": 100 }))
        .await?;
    println!("   Submitted job {long_job}");

    println!("\n4. Polling status while workers run...");
    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(250)).await;
        let status = orchestrator.get_state(submitted[0]).await?;
        match status.progress {
            Some(progress) => println!(
                "   Job {} is {} at {}/{}",
                submitted[0], status.state, progress.n, progress.total
            ),
            None => println!("   Job {} is {}", submitted[0], status.state),
        }
    }

    println!("\n5. Cancelling the long job...");
    let status = orchestrator.cancel(long_job).await?;
    println!("   Cancel issued; state right after the call: {}", status.state);

    println!("\n6. Waiting for everything to settle...");
    loop {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let mut pending = 0;
        for id in submitted.iter().chain([&long_job]) {
            if !orchestrator.get_state(*id).await?.state.is_terminal() {
                pending += 1;
            }
        }
        if pending == 0 {
            break;
        }
        println!("   {pending} jobs still in flight");
    }

    println!("\n7. Fetching artifacts...");
    for id in &submitted {
        let primary = orchestrator.fetch_outcome(*id, ArtifactKind::Primary).await?;
        let secondary = orchestrator.fetch_outcome(*id, ArtifactKind::Secondary).await?;
        println!(
            "   Job {id}: {} bytes rendered, summary: {}",
            primary.len(),
            String::from_utf8_lossy(&secondary).trim_end()
        );
    }

    let cancelled = orchestrator.get_state(long_job).await?;
    println!("   Long job ended as: {}", cancelled.state);
    match orchestrator.fetch_outcome(long_job, ArtifactKind::Primary).await {
        Err(OrchestrationError::NotReady { state, .. }) => {
            println!("   Its artifacts are unavailable (state: {state})")
        }
        other => println!("   Unexpected outcome fetch result: {other:?}"),
    }

    println!("\n8. Shutting down...");
    pool.shutdown().await?;
    event_printer.abort();

    println!("\n=== Example Complete ===");
    println!("\nKey takeaways:");
    println!("- The orchestrator refuses submissions when no workers are live");
    println!("- Progress updates flow through the registry and the event bus");
    println!("- Cancellation is cooperative: it lands at the next checkpoint");
    println!("- Artifacts are fetched per kind after the job succeeds");
    println!("- For durable storage, swap in PostgresBackend (see postgres_stack.rs)");

    Ok(())
}
