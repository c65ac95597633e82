//! PostgreSQL-backed stack: durable queue, registry, results, and
//! worker directory in one backend.
//!
//! # Prerequisites
//!
//! 1. A reachable PostgreSQL server
//! 2. A database created for the example: `createdb docket_example`
//!
//! The schema is created on startup via `ensure_schema()`.
//!
//! # Running the Example
//!
//! ```bash
//! export DATABASE_URL="postgres://localhost/docket_example"
//! cargo run --example postgres_stack --features postgres
//! ```

use std::env;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use docket::persistence::PostgresBackend;
use docket::worker::WorkerPoolBuilder;
use docket::*;
use serde_json::json;
use sqlx::postgres::PgPoolOptions;

/// Splits a payload into chunks and "processes" one chunk per step.
struct ChunkProcessor;

#[async_trait]
impl DocumentProcessor for ChunkProcessor {
    async fn process(
        &self,
        job: JobDescriptor,
        ctx: ExecutionContext,
    ) -> anyhow::Result<JobArtifacts> {
        let chunks = job.options.get("chunks").and_then(|v| v.as_u64()).unwrap_or(3);

        for chunk in 1..=chunks {
            ctx.checkpoint()?;
            tokio::time::sleep(Duration::from_millis(150)).await;
            ctx.report_progress(chunk, chunks)?;
        }
        ctx.checkpoint()?;

        Ok(JobArtifacts {
            primary: job.payload.to_ascii_uppercase(),
            secondary: format!("{chunks} chunks processed\n").into_bytes(),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("=== Docket PostgreSQL Stack Example ===\n");

    let url = env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set, e.g. postgres://localhost/docket_example"))?;

    println!("1. Connecting and applying the schema...");
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(&url)
        .await?;
    let backend = Arc::new(PostgresBackend::new(pool));
    backend.ensure_schema().await?;
    println!("   Connected.\n");

    // A janitor returns deliveries whose claiming worker stopped
    // heartbeating, so another worker can pick them up.
    let janitor = tokio::spawn({
        let backend = Arc::clone(&backend);
        async move {
            let mut tick = tokio::time::interval(Duration::from_secs(10));
            loop {
                tick.tick().await;
                if let Ok(released) = backend.release_expired_claims(Duration::from_secs(30)).await
                {
                    if released > 0 {
                        println!("   [JANITOR] released {released} expired claims");
                    }
                }
            }
        }
    });

    let events = Arc::new(InProcEventBus::default());

    let orchestrator = OrchestratorBuilder::new(LivenessConfig::default())
        .with_broker(Arc::clone(&backend))
        .with_registry(Arc::clone(&backend))
        .with_store(Arc::clone(&backend))
        .with_directory(Arc::clone(&backend))
        .with_events(Arc::clone(&events) as Arc<dyn EventPublisher>)
        .build()?;

    let worker_pool = WorkerPoolBuilder::new(WorkerPoolConfig::default())
        .with_processor(Arc::new(ChunkProcessor))
        .with_broker(Arc::clone(&backend))
        .with_registry(Arc::clone(&backend))
        .with_store(Arc::clone(&backend))
        .with_directory(Arc::clone(&backend))
        .with_events(Arc::clone(&events) as Arc<dyn EventPublisher>)
        .build()?;

    println!("2. Starting the worker pool...");
    worker_pool.start().await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    let report = orchestrator.health().await;
    println!(
        "   Health: {} ({} live workers)\n",
        report.status,
        report.workers.map(|p| p.live).unwrap_or(0)
    );

    println!("3. Submitting jobs...");
    let mut ids = Vec::new();
    for i in 0..3 {
        let id = orchestrator
            .submit(
                format!("case file {i}").into_bytes(),
                json!({ "chunks": 4 }),
            )
            .await?;
        println!("   Submitted job {id}");
        ids.push(id);
    }
    println!("   Queue depth: {}\n", orchestrator.broker().depth().await?);

    println!("4. Waiting for completion...");
    loop {
        tokio::time::sleep(Duration::from_millis(300)).await;
        let mut done = 0;
        for id in &ids {
            let status = orchestrator.get_state(*id).await?;
            if status.state.is_terminal() {
                done += 1;
            } else if let Some(progress) = status.progress {
                println!("   Job {id}: {}/{}", progress.n, progress.total);
            }
        }
        if done == ids.len() {
            break;
        }
    }

    println!("\n5. Fetching an artifact...");
    let primary = orchestrator
        .fetch_outcome(ids[0], ArtifactKind::Primary)
        .await?;
    println!(
        "   Job {} primary artifact: {:?}",
        ids[0],
        String::from_utf8_lossy(&primary)
    );

    println!("\n6. Shutting down...");
    worker_pool.shutdown().await?;
    janitor.abort();

    println!("\n=== Example Complete ===");
    println!("\nKey takeaways:");
    println!("- One PostgresBackend serves as broker, registry, store, and directory");
    println!("- ensure_schema() makes first-run setup a single call");
    println!("- Deliveries claimed by dead workers are recycled by the janitor");
    println!("- Everything in the job lifecycle survives a process restart");

    Ok(())
}
