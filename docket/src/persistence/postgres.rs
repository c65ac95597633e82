use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::broker::{Broker, Delivery, DeliveryToken};
use crate::job::{
    ArtifactKind, JobArtifacts, JobDescriptor, JobId, JobOptions, JobOutcome, JobRecord, JobState,
    OutcomeHandle, Progress,
};
use crate::liveness::{WorkerDirectory, WorkerStatus};
use crate::registry::{CancelDisposition, JobRegistry, StartDisposition};
use crate::store::ResultStore;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS docket_jobs (
        id UUID PRIMARY KEY,
        state TEXT NOT NULL,
        submitted_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        progress_n BIGINT,
        progress_total BIGINT,
        outcome_key TEXT,
        outcome_written_at TIMESTAMPTZ,
        failure_detail TEXT,
        cancel_requested BOOLEAN NOT NULL DEFAULT FALSE,
        worker_id TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS docket_queue (
        job_id UUID PRIMARY KEY,
        payload BYTEA NOT NULL,
        options JSONB NOT NULL,
        submitted_at TIMESTAMPTZ NOT NULL,
        state TEXT NOT NULL DEFAULT 'pending',
        delivery_token UUID,
        claimed_by TEXT,
        claimed_at TIMESTAMPTZ,
        redelivered BOOLEAN NOT NULL DEFAULT FALSE,
        enqueued_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS docket_queue_pending_idx
    ON docket_queue (enqueued_at)
    WHERE state = 'pending'
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS docket_outcomes (
        job_id UUID PRIMARY KEY,
        status TEXT NOT NULL,
        primary_artifact BYTEA,
        secondary_artifact BYTEA,
        failure_detail TEXT,
        written_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS docket_workers (
        worker_id TEXT PRIMARY KEY,
        current_job UUID,
        last_seen TIMESTAMPTZ NOT NULL
    )
    "#,
];

/// PostgreSQL-backed implementation of the orchestration backends.
///
/// Implements the broker, job registry, result store, and worker directory
/// on one connection pool, so API instances and worker processes share
/// state through the database. All state transitions are guarded in SQL
/// with the same rules the in-memory implementations enforce.
#[derive(Clone, Debug)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(connection_string: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(connection_string).await?;
        Ok(Self::new(pool))
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the backing tables if they do not exist yet.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Return claimed-but-unacked deliveries older than `older_than` to the
    /// pending queue, marked as redelivered. Run this periodically from a
    /// janitor task sized to a multiple of the worker heartbeat TTL.
    pub async fn release_expired_claims(&self, older_than: Duration) -> anyhow::Result<u64> {
        let cutoff_ms = older_than.as_millis().min(i64::MAX as u128) as i64;
        let res = sqlx::query(
            r#"
            UPDATE docket_queue
            SET state = 'pending',
                redelivered = TRUE,
                delivery_token = NULL,
                claimed_by = NULL,
                claimed_at = NULL
            WHERE state = 'claimed'
              AND claimed_at < NOW() - ($1::bigint) * INTERVAL '1 millisecond'
            "#,
        )
        .bind(cutoff_ms)
        .execute(&self.pool)
        .await?;

        let released = res.rows_affected();
        if released > 0 {
            warn!(released = released, "released expired claims for redelivery");
        }
        Ok(released)
    }
}

fn parse_state(value: &str) -> anyhow::Result<JobState> {
    match value {
        "queued" => Ok(JobState::Queued),
        "running" => Ok(JobState::Running),
        "progressing" => Ok(JobState::Progressing),
        "succeeded" => Ok(JobState::Succeeded),
        "failed" => Ok(JobState::Failed),
        "cancelled" => Ok(JobState::Cancelled),
        other => Err(anyhow::anyhow!("unknown job state in database: {other}")),
    }
}

fn job_record_from_row(row: &PgRow) -> anyhow::Result<JobRecord> {
    let state: String = row.try_get("state")?;
    let progress = match (
        row.try_get::<Option<i64>, _>("progress_n")?,
        row.try_get::<Option<i64>, _>("progress_total")?,
    ) {
        (Some(n), Some(total)) => Some(Progress::new(n as u64, total as u64)),
        _ => None,
    };
    let outcome_ref = match (
        row.try_get::<Option<String>, _>("outcome_key")?,
        row.try_get("outcome_written_at")?,
    ) {
        (Some(key), Some(written_at)) => Some(OutcomeHandle { key, written_at }),
        _ => None,
    };
    Ok(JobRecord {
        id: JobId(row.try_get("id")?),
        state: parse_state(&state)?,
        submitted_at: row.try_get("submitted_at")?,
        updated_at: row.try_get("updated_at")?,
        progress,
        outcome_ref,
        failure_detail: row.try_get("failure_detail")?,
        cancel_requested: row.try_get("cancel_requested")?,
        worker_id: row.try_get("worker_id")?,
    })
}

#[async_trait]
impl JobRegistry for PostgresBackend {
    async fn create(&self, descriptor: &JobDescriptor) -> anyhow::Result<JobRecord> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO docket_jobs (id, state, submitted_at, updated_at, cancel_requested)
            VALUES ($1, 'queued', $2, NOW(), FALSE)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(descriptor.id.0)
        .bind(descriptor.submitted_at)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            anyhow::bail!("job {} already registered", descriptor.id);
        }
        Ok(JobRecord::queued(descriptor))
    }

    async fn get(&self, id: JobId) -> anyhow::Result<Option<JobRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, state, submitted_at, updated_at, progress_n, progress_total,
                   outcome_key, outcome_written_at, failure_detail, cancel_requested, worker_id
            FROM docket_jobs
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_record_from_row).transpose()
    }

    async fn try_start(&self, id: JobId, worker_id: &str) -> anyhow::Result<StartDisposition> {
        // A re-claim after redelivery discards the dead attempt's progress.
        let updated = sqlx::query(
            r#"
            UPDATE docket_jobs
            SET state = 'running',
                worker_id = $2,
                progress_n = NULL,
                progress_total = NULL,
                updated_at = NOW()
            WHERE id = $1
              AND state IN ('queued','running','progressing')
            RETURNING id, state, submitted_at, updated_at, progress_n, progress_total,
                      outcome_key, outcome_written_at, failure_detail, cancel_requested, worker_id
            "#,
        )
        .bind(id.0)
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = updated {
            return Ok(StartDisposition::Started(job_record_from_row(&row)?));
        }
        let record = self
            .get(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("job {id} missing from registry"))?;
        Ok(StartDisposition::AlreadyFinished(record))
    }

    async fn record_progress(&self, id: JobId, progress: Progress) -> anyhow::Result<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE docket_jobs
            SET state = 'progressing',
                progress_n = $2,
                progress_total = $3,
                updated_at = NOW()
            WHERE id = $1
              AND state IN ('running','progressing')
              AND $2 > COALESCE(progress_n, -1)
            "#,
        )
        .bind(id.0)
        .bind(progress.n as i64)
        .bind(progress.total as i64)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() > 0 {
            return Ok(true);
        }
        // Distinguish a dropped update from an unknown job.
        let exists = sqlx::query("SELECT 1 AS one FROM docket_jobs WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            anyhow::bail!("job {id} missing from registry");
        }
        Ok(false)
    }

    async fn complete(&self, id: JobId, outcome_ref: OutcomeHandle) -> anyhow::Result<JobRecord> {
        let updated = sqlx::query(
            r#"
            UPDATE docket_jobs
            SET state = 'succeeded',
                outcome_key = $2,
                outcome_written_at = $3,
                updated_at = NOW()
            WHERE id = $1
              AND state IN ('running','progressing')
            RETURNING id, state, submitted_at, updated_at, progress_n, progress_total,
                      outcome_key, outcome_written_at, failure_detail, cancel_requested, worker_id
            "#,
        )
        .bind(id.0)
        .bind(&outcome_ref.key)
        .bind(outcome_ref.written_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = updated {
            return job_record_from_row(&row);
        }
        let record = self
            .get(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("job {id} missing from registry"))?;
        anyhow::bail!("illegal transition {} -> succeeded for job {id}", record.state)
    }

    async fn fail(
        &self,
        id: JobId,
        detail: &str,
        outcome_ref: OutcomeHandle,
    ) -> anyhow::Result<JobRecord> {
        let updated = sqlx::query(
            r#"
            UPDATE docket_jobs
            SET state = 'failed',
                failure_detail = $2,
                outcome_key = $3,
                outcome_written_at = $4,
                updated_at = NOW()
            WHERE id = $1
              AND state IN ('running','progressing')
            RETURNING id, state, submitted_at, updated_at, progress_n, progress_total,
                      outcome_key, outcome_written_at, failure_detail, cancel_requested, worker_id
            "#,
        )
        .bind(id.0)
        .bind(detail)
        .bind(&outcome_ref.key)
        .bind(outcome_ref.written_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = updated {
            return job_record_from_row(&row);
        }
        let record = self
            .get(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("job {id} missing from registry"))?;
        anyhow::bail!("illegal transition {} -> failed for job {id}", record.state)
    }

    async fn request_cancel(&self, id: JobId) -> anyhow::Result<Option<CancelDisposition>> {
        let cancelled = sqlx::query(
            r#"
            UPDATE docket_jobs
            SET state = 'cancelled',
                updated_at = NOW()
            WHERE id = $1
              AND state = 'queued'
            RETURNING id, state, submitted_at, updated_at, progress_n, progress_total,
                      outcome_key, outcome_written_at, failure_detail, cancel_requested, worker_id
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = cancelled {
            return Ok(Some(CancelDisposition::Cancelled(job_record_from_row(
                &row,
            )?)));
        }

        let signalled = sqlx::query(
            r#"
            UPDATE docket_jobs
            SET cancel_requested = TRUE,
                updated_at = NOW()
            WHERE id = $1
              AND state IN ('running','progressing')
            RETURNING id, state, submitted_at, updated_at, progress_n, progress_total,
                      outcome_key, outcome_written_at, failure_detail, cancel_requested, worker_id
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = signalled {
            return Ok(Some(CancelDisposition::Signalled(job_record_from_row(
                &row,
            )?)));
        }

        match self.get(id).await? {
            Some(record) => Ok(Some(CancelDisposition::AlreadyTerminal(record))),
            None => Ok(None),
        }
    }

    async fn acknowledge_cancel(&self, id: JobId) -> anyhow::Result<JobRecord> {
        let updated = sqlx::query(
            r#"
            UPDATE docket_jobs
            SET state = 'cancelled',
                updated_at = NOW()
            WHERE id = $1
              AND state IN ('queued','running','progressing')
            RETURNING id, state, submitted_at, updated_at, progress_n, progress_total,
                      outcome_key, outcome_written_at, failure_detail, cancel_requested, worker_id
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = updated {
            return job_record_from_row(&row);
        }
        let record = self
            .get(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("job {id} missing from registry"))?;
        anyhow::bail!("illegal transition {} -> cancelled for job {id}", record.state)
    }
}

#[async_trait]
impl Broker for PostgresBackend {
    async fn enqueue(&self, descriptor: JobDescriptor) -> anyhow::Result<()> {
        let options = serde_json::to_value(&descriptor.options)?;
        sqlx::query(
            r#"
            INSERT INTO docket_queue (job_id, payload, options, submitted_at, state)
            VALUES ($1, $2, $3, $4, 'pending')
            "#,
        )
        .bind(descriptor.id.0)
        .bind(&descriptor.payload)
        .bind(&options)
        .bind(descriptor.submitted_at)
        .execute(&self.pool)
        .await?;

        debug!(job_id = %descriptor.id, "descriptor enqueued");
        Ok(())
    }

    async fn dequeue(&self, worker_id: &str) -> anyhow::Result<Option<Delivery>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT job_id, payload, options, submitted_at, redelivered
            FROM docket_queue
            WHERE state = 'pending'
            ORDER BY enqueued_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            drop(tx);
            return Ok(None);
        };

        let job_id: Uuid = row.try_get("job_id")?;
        let token = DeliveryToken::new();

        let claimed = sqlx::query(
            r#"
            UPDATE docket_queue
            SET state = 'claimed',
                delivery_token = $1,
                claimed_by = $2,
                claimed_at = NOW()
            WHERE job_id = $3
              AND state = 'pending'
            RETURNING delivery_token
            "#,
        )
        .bind(token.0)
        .bind(worker_id)
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await?;

        if claimed.is_none() {
            drop(tx);
            return Ok(None);
        }

        let options_value: serde_json::Value = row.try_get("options")?;
        let options = JobOptions::from_value(options_value)
            .map_err(|err| anyhow::anyhow!("stored options corrupted for job {job_id}: {err}"))?;
        let descriptor = JobDescriptor {
            id: JobId(job_id),
            payload: row.try_get("payload")?,
            options,
            submitted_at: row.try_get("submitted_at")?,
        };
        let redelivered: bool = row.try_get("redelivered")?;

        tx.commit().await?;
        debug!(job_id = %descriptor.id, worker_id = worker_id, "descriptor claimed");
        Ok(Some(Delivery {
            token,
            descriptor,
            redelivered,
        }))
    }

    async fn ack(&self, token: DeliveryToken) -> anyhow::Result<()> {
        let res = sqlx::query(
            r#"
            DELETE FROM docket_queue
            WHERE delivery_token = $1
              AND state = 'claimed'
            "#,
        )
        .bind(token.0)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            debug!(token = %token, "ack for unknown or already retired delivery");
        }
        Ok(())
    }

    async fn discard_pending(&self, id: JobId) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            DELETE FROM docket_queue
            WHERE job_id = $1
              AND state = 'pending'
            "#,
        )
        .bind(id.0)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() > 0)
    }

    async fn depth(&self) -> anyhow::Result<usize> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*)::bigint AS count
            FROM docket_queue
            WHERE state = 'pending'
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let count: i64 = row.try_get("count")?;
        Ok(count as usize)
    }
}

#[async_trait]
impl ResultStore for PostgresBackend {
    async fn put_outcome(&self, id: JobId, outcome: JobOutcome) -> anyhow::Result<OutcomeHandle> {
        let (status, primary, secondary, failure_detail) = match &outcome {
            JobOutcome::Success { artifacts } => (
                "success",
                Some(artifacts.primary.as_slice()),
                Some(artifacts.secondary.as_slice()),
                None,
            ),
            JobOutcome::Failure { detail } => ("failure", None, None, Some(detail.as_str())),
        };

        let row = sqlx::query(
            r#"
            INSERT INTO docket_outcomes (
                job_id, status, primary_artifact, secondary_artifact, failure_detail, written_at
            )
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (job_id) DO UPDATE
            SET status = EXCLUDED.status,
                primary_artifact = EXCLUDED.primary_artifact,
                secondary_artifact = EXCLUDED.secondary_artifact,
                failure_detail = EXCLUDED.failure_detail,
                written_at = NOW()
            RETURNING written_at
            "#,
        )
        .bind(id.0)
        .bind(status)
        .bind(primary)
        .bind(secondary)
        .bind(failure_detail)
        .fetch_one(&self.pool)
        .await?;

        Ok(OutcomeHandle {
            key: format!("docket_outcomes/{id}"),
            written_at: row.try_get("written_at")?,
        })
    }

    async fn get_outcome(&self, id: JobId) -> anyhow::Result<Option<JobOutcome>> {
        let row = sqlx::query(
            r#"
            SELECT status, primary_artifact, secondary_artifact, failure_detail
            FROM docket_outcomes
            WHERE job_id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status: String = row.try_get("status")?;
        match status.as_str() {
            "success" => Ok(Some(JobOutcome::Success {
                artifacts: JobArtifacts {
                    primary: row
                        .try_get::<Option<Vec<u8>>, _>("primary_artifact")?
                        .unwrap_or_default(),
                    secondary: row
                        .try_get::<Option<Vec<u8>>, _>("secondary_artifact")?
                        .unwrap_or_default(),
                },
            })),
            "failure" => Ok(Some(JobOutcome::Failure {
                detail: row
                    .try_get::<Option<String>, _>("failure_detail")?
                    .unwrap_or_default(),
            })),
            other => Err(anyhow::anyhow!("unknown outcome status in database: {other}")),
        }
    }

    // Fetches only the requested column instead of both blobs.
    async fn get_artifact(&self, id: JobId, kind: ArtifactKind) -> anyhow::Result<Option<Vec<u8>>> {
        let row = sqlx::query(
            r#"
            SELECT CASE WHEN $2 = 'primary' THEN primary_artifact
                        ELSE secondary_artifact
                   END AS artifact
            FROM docket_outcomes
            WHERE job_id = $1
              AND status = 'success'
            "#,
        )
        .bind(id.0)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.try_get::<Option<Vec<u8>>, _>("artifact")?),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl WorkerDirectory for PostgresBackend {
    async fn heartbeat(&self, worker_id: &str, current_job: Option<JobId>) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO docket_workers (worker_id, current_job, last_seen)
            VALUES ($1, $2, NOW())
            ON CONFLICT (worker_id) DO UPDATE
            SET current_job = EXCLUDED.current_job,
                last_seen = NOW()
            "#,
        )
        .bind(worker_id)
        .bind(current_job.map(|id| id.0))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn deregister(&self, worker_id: &str) -> anyhow::Result<()> {
        let res = sqlx::query("DELETE FROM docket_workers WHERE worker_id = $1")
            .bind(worker_id)
            .execute(&self.pool)
            .await?;

        if res.rows_affected() > 0 {
            debug!(worker_id = worker_id, "worker deregistered");
        }
        Ok(())
    }

    async fn snapshot(&self) -> anyhow::Result<Vec<WorkerStatus>> {
        let rows = sqlx::query("SELECT worker_id, current_job, last_seen FROM docket_workers")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(WorkerStatus {
                    worker_id: row.try_get("worker_id")?,
                    current_job: row.try_get::<Option<Uuid>, _>("current_job")?.map(JobId),
                    last_seen: row.try_get("last_seen")?,
                })
            })
            .collect()
    }
}
