//! Event-feed example: observing the job lifecycle as it happens.
//!
//! A status-polling client sees snapshots; an event subscriber sees the
//! whole story. This example submits one job that succeeds and one that
//! fails, and prints every lifecycle event in arrival order.

use std::sync::Arc;
use std::time::Duration;

use docket::worker::WorkerPoolBuilder;
use docket::*;
use docket_testkit::{InMemoryBroker, InMemoryResultStore, ScriptedProcessor};
use serde_json::json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("=== Docket Lifecycle Events Example ===\n");

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
        concurrency: 2,
        poll_interval_ms: 25,
        heartbeat_interval_ms: 100,
        drain_timeout_seconds: 5,
    })
    .with_processor(Arc::new(
        ScriptedProcessor::default().with_step_delay(Duration::from_millis(60)),
    ))
    .with_broker(Arc::clone(&broker))
    .with_registry(Arc::clone(&registry))
    .with_store(Arc::clone(&store))
    .with_directory(Arc::clone(&directory))
    .with_events(Arc::clone(&events) as Arc<dyn EventPublisher>)
    .build()?;

    // Subscribe before submitting so the feed starts at the beginning.
    let mut rx = events.subscribe();

    pool.start().await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    println!("1. Submitting one well-formed and one doomed job...\n");
    let good = orchestrator
        .submit(b"quarterly-report.pdf".to_vec(), json!({ "steps": 4 }))
        .await?;
    let bad = orchestrator
        .submit(
            b"corrupted-scan.pdf".to_vec(),
            json!({ "fail": "page tree is cyclic" }),
        )
        .await?;

    println!("2. The event feed:\n");
    let mut terminal_seen = 0;
    while terminal_seen < 2 {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        };
        let name = if event.job_id == good { "good" } else { "bad " };
        match event.payload {
            JobEventPayload::Submitted => println!("   [{name}] submitted"),
            JobEventPayload::Started { worker_id } => {
                println!("   [{name}] started on {worker_id}")
            }
            JobEventPayload::Progressed { n, total } => {
                println!("   [{name}] progressed {n}/{total}")
            }
            JobEventPayload::Succeeded => {
                println!("   [{name}] succeeded");
                terminal_seen += 1;
            }
            JobEventPayload::Failed { detail } => {
                println!("   [{name}] failed: {detail}");
                terminal_seen += 1;
            }
            JobEventPayload::CancelRequested => println!("   [{name}] cancel requested"),
            JobEventPayload::Cancelled => {
                println!("   [{name}] cancelled");
                terminal_seen += 1;
            }
            other => println!("   [{name}] {other:?}"),
        }
    }

    println!("\n3. Final status snapshots, as an HTTP layer would serialize them:\n");
    for (name, id) in [("good", good), ("bad", bad)] {
        let status = orchestrator.get_state(id).await?;
        println!("   {name}:\n{}\n", serde_json::to_string_pretty(&status)?);
    }

    pool.shutdown().await?;

    println!("=== Example Complete ===");
    println!("\nKey takeaways:");
    println!("- Every lifecycle edge is announced on the event bus");
    println!("- Subscribers that fall behind observe a lag, never a block");
    println!("- A failure carries its detail in both the event and the status");

    Ok(())
}
