//! Integration tests for the Postgres backend: registry transitions,
//! queue claim and acknowledgement, expired-claim release, outcome
//! storage, and worker heartbeats.
//!
//! Requires a running Postgres instance.
//! Run with: `cargo test --test postgres_backend --features postgres -- --ignored`

#![cfg(feature = "postgres")]

use std::time::Duration;

use docket::broker::Broker;
use docket::job::{ArtifactKind, JobArtifacts, JobDescriptor, JobId, JobOptions, JobOutcome, JobState, Progress};
use docket::liveness::WorkerDirectory;
use docket::persistence::PostgresBackend;
use docket::registry::{CancelDisposition, JobRegistry, StartDisposition};
use docket::store::ResultStore;

async fn backend() -> PostgresBackend {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
    let backend = PostgresBackend::connect(&url).await.expect("connect");
    backend.ensure_schema().await.expect("ensure schema");
    backend
}

fn descriptor(payload: &[u8]) -> JobDescriptor {
    let mut options = JobOptions::new();
    options.insert("steps", serde_json::json!(5));
    JobDescriptor::new(payload.to_vec(), options)
}

async fn cleanup(backend: &PostgresBackend, ids: &[JobId]) {
    for id in ids {
        for table in ["docket_jobs", "docket_queue", "docket_outcomes"] {
            let sql = format!("DELETE FROM {table} WHERE {} = $1", id_column(table));
            sqlx::query(&sql).bind(id.0).execute(backend.pool()).await.ok();
        }
    }
}

fn id_column(table: &str) -> &'static str {
    if table == "docket_jobs" {
        "id"
    } else {
        "job_id"
    }
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn registry_walks_a_job_through_its_lifecycle() {
    let backend = backend().await;
    let descriptor = descriptor(b"scan.pdf");
    let job_id = descriptor.id;

    let record = backend.create(&descriptor).await.expect("create");
    assert_eq!(record.state, JobState::Queued);

    let err = backend.create(&descriptor).await.expect_err("duplicate create");
    assert!(err.to_string().contains("already registered"), "got: {err:#}");

    let disposition = backend.try_start(job_id, "worker-a").await.expect("claim");
    let StartDisposition::Started(record) = disposition else {
        panic!("expected a started claim");
    };
    assert_eq!(record.state, JobState::Running);
    assert_eq!(record.worker_id.as_deref(), Some("worker-a"));

    assert!(backend
        .record_progress(job_id, Progress::new(2, 5))
        .await
        .expect("progress"));
    // A lower step count is stale and must be dropped.
    assert!(!backend
        .record_progress(job_id, Progress::new(1, 5))
        .await
        .expect("stale progress"));
    assert!(backend
        .record_progress(job_id, Progress::new(5, 5))
        .await
        .expect("final progress"));

    let outcome_ref = backend
        .put_outcome(
            job_id,
            JobOutcome::Success {
                artifacts: JobArtifacts {
                    primary: b"mono render".to_vec(),
                    secondary: b"dual render".to_vec(),
                },
            },
        )
        .await
        .expect("put outcome");
    let record = backend.complete(job_id, outcome_ref).await.expect("complete");
    assert_eq!(record.state, JobState::Succeeded);

    let record = backend.get(job_id).await.expect("get").expect("record");
    assert_eq!(record.state, JobState::Succeeded);
    assert_eq!(record.progress, Some(Progress::new(5, 5)));
    assert!(record.outcome_ref.is_some());

    let artifact = backend
        .get_artifact(job_id, ArtifactKind::Secondary)
        .await
        .expect("artifact");
    assert_eq!(artifact.as_deref(), Some(b"dual render".as_slice()));

    // Terminal entries reject further transitions.
    let err = backend
        .complete(job_id, record.outcome_ref.clone().expect("handle"))
        .await
        .expect_err("double complete");
    assert!(err.to_string().contains("illegal transition"), "got: {err:#}");

    cleanup(&backend, &[job_id]).await;
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn broker_claims_in_order_and_ack_retires_the_delivery() {
    let backend = backend().await;
    let first = descriptor(b"first.pdf");
    let second = descriptor(b"second.pdf");

    backend.enqueue(first.clone()).await.expect("enqueue first");
    backend.enqueue(second.clone()).await.expect("enqueue second");

    let delivery = backend
        .dequeue("worker-a")
        .await
        .expect("dequeue")
        .expect("first delivery");
    assert_eq!(delivery.descriptor.id, first.id);
    assert_eq!(delivery.descriptor.payload, first.payload);
    assert_eq!(delivery.descriptor.options, first.options);
    assert!(!delivery.redelivered);

    let other = backend
        .dequeue("worker-b")
        .await
        .expect("dequeue")
        .expect("second delivery");
    assert_eq!(other.descriptor.id, second.id);

    assert!(backend.dequeue("worker-c").await.expect("dequeue").is_none());

    // Claimed deliveries are out of reach of a queue-time discard.
    assert!(!backend.discard_pending(first.id).await.expect("discard"));

    backend.ack(delivery.token).await.expect("ack first");
    backend.ack(other.token).await.expect("ack second");
    // Acking twice is harmless.
    backend.ack(delivery.token).await.expect("ack again");

    cleanup(&backend, &[first.id, second.id]).await;
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn discard_removes_a_pending_delivery() {
    let backend = backend().await;
    let descriptor = descriptor(b"doomed.pdf");
    let job_id = descriptor.id;

    backend.enqueue(descriptor).await.expect("enqueue");
    assert!(backend.discard_pending(job_id).await.expect("discard"));
    assert!(backend.dequeue("worker-a").await.expect("dequeue").is_none());
    assert!(!backend.discard_pending(job_id).await.expect("discard again"));

    cleanup(&backend, &[job_id]).await;
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn expired_claims_are_released_for_redelivery() {
    let backend = backend().await;
    let descriptor = descriptor(b"orphaned.pdf");
    let job_id = descriptor.id;

    backend.enqueue(descriptor).await.expect("enqueue");
    let delivery = backend
        .dequeue("worker-dead")
        .await
        .expect("dequeue")
        .expect("delivery");
    assert_eq!(delivery.descriptor.id, job_id);

    // Backdate the claim as if the worker stopped heartbeating long ago.
    sqlx::query("UPDATE docket_queue SET claimed_at = NOW() - INTERVAL '10 minutes' WHERE job_id = $1")
        .bind(job_id.0)
        .execute(backend.pool())
        .await
        .expect("backdate claim");

    let released = backend
        .release_expired_claims(Duration::from_secs(60))
        .await
        .expect("release");
    assert_eq!(released, 1);

    let redelivery = backend
        .dequeue("worker-b")
        .await
        .expect("dequeue")
        .expect("redelivery");
    assert_eq!(redelivery.descriptor.id, job_id);
    assert!(redelivery.redelivered);
    assert_ne!(redelivery.token, delivery.token);

    let released = backend
        .release_expired_claims(Duration::from_secs(60))
        .await
        .expect("release again");
    assert_eq!(released, 0);

    cleanup(&backend, &[job_id]).await;
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn cancel_flag_round_trips_through_the_database() {
    let backend = backend().await;
    let descriptor = descriptor(b"cancel-me.pdf");
    let job_id = descriptor.id;

    backend.create(&descriptor).await.expect("create");
    backend.try_start(job_id, "worker-a").await.expect("claim");

    let disposition = backend
        .request_cancel(job_id)
        .await
        .expect("request cancel")
        .expect("known job");
    assert!(matches!(disposition, CancelDisposition::Signalled(_)));

    let record = backend.get(job_id).await.expect("get").expect("record");
    assert!(record.cancel_requested);
    assert_eq!(record.state, JobState::Running);

    let record = backend.acknowledge_cancel(job_id).await.expect("acknowledge");
    assert_eq!(record.state, JobState::Cancelled);

    let disposition = backend
        .request_cancel(job_id)
        .await
        .expect("request cancel")
        .expect("known job");
    assert!(matches!(disposition, CancelDisposition::AlreadyTerminal(_)));

    cleanup(&backend, &[job_id]).await;
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn outcome_rows_round_trip_success_and_failure() {
    let backend = backend().await;
    let job_id = JobId::new();

    assert!(backend.get_outcome(job_id).await.expect("get").is_none());
    assert!(backend
        .get_artifact(job_id, ArtifactKind::Primary)
        .await
        .expect("artifact")
        .is_none());

    backend
        .put_outcome(
            job_id,
            JobOutcome::Success {
                artifacts: JobArtifacts {
                    primary: b"mono".to_vec(),
                    secondary: b"dual".to_vec(),
                },
            },
        )
        .await
        .expect("put success");
    let outcome = backend.get_outcome(job_id).await.expect("get").expect("outcome");
    let JobOutcome::Success { artifacts } = outcome else {
        panic!("expected a success outcome");
    };
    assert_eq!(artifacts.primary, b"mono");
    assert_eq!(artifacts.secondary, b"dual");

    // Upsert replaces the row wholesale.
    backend
        .put_outcome(
            job_id,
            JobOutcome::Failure {
                detail: "renderer crashed".into(),
            },
        )
        .await
        .expect("put failure");
    let outcome = backend.get_outcome(job_id).await.expect("get").expect("outcome");
    assert!(matches!(outcome, JobOutcome::Failure { ref detail } if detail == "renderer crashed"));
    assert!(backend
        .get_artifact(job_id, ArtifactKind::Primary)
        .await
        .expect("artifact")
        .is_none());

    cleanup(&backend, &[job_id]).await;
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn worker_directory_tracks_heartbeats() {
    let backend = backend().await;
    let worker_id = format!("worker-{}", JobId::new());
    let job_id = JobId::new();

    backend.heartbeat(&worker_id, None).await.expect("heartbeat idle");
    backend
        .heartbeat(&worker_id, Some(job_id))
        .await
        .expect("heartbeat busy");

    let snapshot = backend.snapshot().await.expect("snapshot");
    let status = snapshot
        .iter()
        .find(|status| status.worker_id == worker_id)
        .expect("worker listed");
    assert_eq!(status.current_job, Some(job_id));

    backend.deregister(&worker_id).await.expect("deregister");
    let snapshot = backend.snapshot().await.expect("snapshot");
    assert!(snapshot.iter().all(|status| status.worker_id != worker_id));
}
