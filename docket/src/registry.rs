use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::job::{JobDescriptor, JobId, JobRecord, JobState, OutcomeHandle, Progress};

/// Outcome of a worker's claim on a delivered job.
#[derive(Clone, Debug)]
pub enum StartDisposition {
    /// The worker owns the job; the entry moved to `running`.
    Started(JobRecord),
    /// The entry reached a terminal state before the claim (cancelled while
    /// queued, or a duplicate delivery of a finished job). Ack and drop.
    AlreadyFinished(JobRecord),
}

/// Outcome of a cancellation request.
#[derive(Clone, Debug)]
pub enum CancelDisposition {
    /// The job was still queued and is now terminally `cancelled`.
    Cancelled(JobRecord),
    /// The owning worker was signalled; the entry stays active until the
    /// worker acknowledges at a checkpoint.
    Signalled(JobRecord),
    /// Already terminal; cancelling a finished job is a no-op.
    AlreadyTerminal(JobRecord),
}

/// Trait for backends that track job lifecycle state.
///
/// Implementors must apply every mutation under the transition table in
/// [`JobState::can_transition_to`] and keep progress monotonic per
/// [`Progress::supersedes`], even with concurrent API and worker callers.
#[async_trait]
pub trait JobRegistry: Send + Sync {
    /// Create the entry for a freshly submitted job in state `queued`.
    async fn create(&self, descriptor: &JobDescriptor) -> anyhow::Result<JobRecord>;

    /// Look up one entry.
    async fn get(&self, id: JobId) -> anyhow::Result<Option<JobRecord>>;

    /// Claim a delivered job for execution. Re-claims of an active entry are
    /// allowed (redelivery after a worker death) and reset progress.
    async fn try_start(&self, id: JobId, worker_id: &str) -> anyhow::Result<StartDisposition>;

    /// Apply a progress update. Returns `false` when the update was dropped
    /// as stale or the entry is no longer active.
    async fn record_progress(&self, id: JobId, progress: Progress) -> anyhow::Result<bool>;

    /// Move an active entry to `succeeded` with its outcome reference.
    async fn complete(&self, id: JobId, outcome_ref: OutcomeHandle) -> anyhow::Result<JobRecord>;

    /// Move an active entry to `failed`, recording the stringified detail.
    async fn fail(
        &self,
        id: JobId,
        detail: &str,
        outcome_ref: OutcomeHandle,
    ) -> anyhow::Result<JobRecord>;

    /// Cancellation entry point for the API path. `None` for unknown ids.
    async fn request_cancel(&self, id: JobId) -> anyhow::Result<Option<CancelDisposition>>;

    /// Worker acknowledgement that a cancel request stopped the job.
    async fn acknowledge_cancel(&self, id: JobId) -> anyhow::Result<JobRecord>;
}

/// Default in-memory registry.
///
/// Suitable for single-process deployments and tests; replicated setups
/// should use a durable backend so API and worker instances share state.
pub struct InMemoryJobRegistry {
    records: Arc<Mutex<HashMap<JobId, JobRecord>>>,
}

impl std::fmt::Debug for InMemoryJobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("InMemoryJobRegistry");
        match self.records.try_lock() {
            Ok(records) => {
                debug.field("jobs", &records.len());
            }
            Err(_) => {
                debug.field("jobs", &"<locked>");
            }
        }
        debug.finish_non_exhaustive()
    }
}

impl Default for InMemoryJobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryJobRegistry {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Unordered snapshot of every entry.
    pub async fn snapshot(&self) -> Vec<JobRecord> {
        let records = self.records.lock().await;
        records.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl JobRegistry for InMemoryJobRegistry {
    async fn create(&self, descriptor: &JobDescriptor) -> anyhow::Result<JobRecord> {
        let mut records = self.records.lock().await;
        if records.contains_key(&descriptor.id) {
            anyhow::bail!("job {} already registered", descriptor.id);
        }
        let record = JobRecord::queued(descriptor);
        records.insert(descriptor.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: JobId) -> anyhow::Result<Option<JobRecord>> {
        let records = self.records.lock().await;
        Ok(records.get(&id).cloned())
    }

    async fn try_start(&self, id: JobId, worker_id: &str) -> anyhow::Result<StartDisposition> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("job {id} missing from registry"))?;
        if record.state.is_terminal() {
            return Ok(StartDisposition::AlreadyFinished(record.clone()));
        }
        // A re-claim after redelivery discards the dead attempt's progress.
        record.state = JobState::Running;
        record.worker_id = Some(worker_id.to_string());
        record.progress = None;
        record.updated_at = Utc::now();
        Ok(StartDisposition::Started(record.clone()))
    }

    async fn record_progress(&self, id: JobId, progress: Progress) -> anyhow::Result<bool> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("job {id} missing from registry"))?;
        if !record.state.is_active() || !progress.supersedes(record.progress) {
            return Ok(false);
        }
        record.state = JobState::Progressing;
        record.progress = Some(progress);
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn complete(&self, id: JobId, outcome_ref: OutcomeHandle) -> anyhow::Result<JobRecord> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("job {id} missing from registry"))?;
        if !record.state.can_transition_to(JobState::Succeeded) {
            anyhow::bail!("illegal transition {} -> succeeded for job {id}", record.state);
        }
        record.state = JobState::Succeeded;
        record.outcome_ref = Some(outcome_ref);
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn fail(
        &self,
        id: JobId,
        detail: &str,
        outcome_ref: OutcomeHandle,
    ) -> anyhow::Result<JobRecord> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("job {id} missing from registry"))?;
        if !record.state.can_transition_to(JobState::Failed) {
            anyhow::bail!("illegal transition {} -> failed for job {id}", record.state);
        }
        record.state = JobState::Failed;
        record.failure_detail = Some(detail.to_string());
        record.outcome_ref = Some(outcome_ref);
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn request_cancel(&self, id: JobId) -> anyhow::Result<Option<CancelDisposition>> {
        let mut records = self.records.lock().await;
        let Some(record) = records.get_mut(&id) else {
            return Ok(None);
        };
        let disposition = if record.state.is_terminal() {
            CancelDisposition::AlreadyTerminal(record.clone())
        } else if record.state == JobState::Queued {
            record.state = JobState::Cancelled;
            record.updated_at = Utc::now();
            CancelDisposition::Cancelled(record.clone())
        } else {
            record.cancel_requested = true;
            record.updated_at = Utc::now();
            CancelDisposition::Signalled(record.clone())
        };
        Ok(Some(disposition))
    }

    async fn acknowledge_cancel(&self, id: JobId) -> anyhow::Result<JobRecord> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("job {id} missing from registry"))?;
        if !record.state.can_transition_to(JobState::Cancelled) {
            anyhow::bail!("illegal transition {} -> cancelled for job {id}", record.state);
        }
        record.state = JobState::Cancelled;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobOptions;

    fn descriptor() -> JobDescriptor {
        JobDescriptor::new(b"doc".to_vec(), JobOptions::new())
    }

    fn handle(id: JobId) -> OutcomeHandle {
        OutcomeHandle {
            key: id.to_string(),
            written_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let registry = InMemoryJobRegistry::new();
        let d = descriptor();
        let created = registry.create(&d).await.unwrap();
        assert_eq!(created.state, JobState::Queued);
        let fetched = registry.get(d.id).await.unwrap().unwrap();
        assert_eq!(fetched, created);
        assert!(registry.get(JobId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let registry = InMemoryJobRegistry::new();
        let d = descriptor();
        registry.create(&d).await.unwrap();
        assert!(registry.create(&d).await.is_err());
    }

    #[tokio::test]
    async fn try_start_claims_queued_job() {
        let registry = InMemoryJobRegistry::new();
        let d = descriptor();
        registry.create(&d).await.unwrap();
        match registry.try_start(d.id, "worker-0").await.unwrap() {
            StartDisposition::Started(record) => {
                assert_eq!(record.state, JobState::Running);
                assert_eq!(record.worker_id.as_deref(), Some("worker-0"));
            }
            other => panic!("expected Started, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn try_start_reclaims_active_job_and_resets_progress() {
        let registry = InMemoryJobRegistry::new();
        let d = descriptor();
        registry.create(&d).await.unwrap();
        registry.try_start(d.id, "worker-0").await.unwrap();
        assert!(registry
            .record_progress(d.id, Progress::new(3, 10))
            .await
            .unwrap());

        match registry.try_start(d.id, "worker-1").await.unwrap() {
            StartDisposition::Started(record) => {
                assert_eq!(record.state, JobState::Running);
                assert_eq!(record.worker_id.as_deref(), Some("worker-1"));
                assert!(record.progress.is_none());
            }
            other => panic!("expected Started, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn try_start_skips_terminal_job() {
        let registry = InMemoryJobRegistry::new();
        let d = descriptor();
        registry.create(&d).await.unwrap();
        registry.request_cancel(d.id).await.unwrap();
        match registry.try_start(d.id, "worker-0").await.unwrap() {
            StartDisposition::AlreadyFinished(record) => {
                assert_eq!(record.state, JobState::Cancelled);
            }
            other => panic!("expected AlreadyFinished, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn progress_applies_only_strictly_higher_counts() {
        let registry = InMemoryJobRegistry::new();
        let d = descriptor();
        registry.create(&d).await.unwrap();
        registry.try_start(d.id, "worker-0").await.unwrap();

        assert!(registry
            .record_progress(d.id, Progress::new(5, 10))
            .await
            .unwrap());
        // Out-of-order lower and equal updates are dropped.
        assert!(!registry
            .record_progress(d.id, Progress::new(3, 10))
            .await
            .unwrap());
        assert!(!registry
            .record_progress(d.id, Progress::new(5, 10))
            .await
            .unwrap());
        assert!(registry
            .record_progress(d.id, Progress::new(6, 10))
            .await
            .unwrap());

        let record = registry.get(d.id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Progressing);
        assert_eq!(record.progress, Some(Progress::new(6, 10)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_progress_updates_settle_on_the_highest_count() {
        let registry = Arc::new(InMemoryJobRegistry::new());
        let d = descriptor();
        registry.create(&d).await.unwrap();
        registry.try_start(d.id, "worker-0").await.unwrap();

        let total = 64;
        let mut updates = Vec::new();
        for n in 1..=total {
            let registry = Arc::clone(&registry);
            let id = d.id;
            updates.push(tokio::spawn(async move {
                registry
                    .record_progress(id, Progress::new(n, total))
                    .await
                    .unwrap()
            }));
        }
        let mut applied = 0;
        for update in updates {
            if update.await.unwrap() {
                applied += 1;
            }
        }

        // The highest count always lands, whatever the interleaving.
        assert!(applied >= 1);
        let record = registry.get(d.id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Progressing);
        assert_eq!(record.progress, Some(Progress::new(total, total)));

        // A straggler below the settled count is still dropped.
        assert!(!registry
            .record_progress(d.id, Progress::new(1, total))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn progress_is_ignored_outside_the_active_phase() {
        let registry = InMemoryJobRegistry::new();
        let d = descriptor();
        registry.create(&d).await.unwrap();
        // Still queued.
        assert!(!registry
            .record_progress(d.id, Progress::new(1, 10))
            .await
            .unwrap());

        registry.try_start(d.id, "worker-0").await.unwrap();
        registry.complete(d.id, handle(d.id)).await.unwrap();
        assert!(!registry
            .record_progress(d.id, Progress::new(9, 10))
            .await
            .unwrap());
        let record = registry.get(d.id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Succeeded);
    }

    #[tokio::test]
    async fn complete_sets_outcome_ref() {
        let registry = InMemoryJobRegistry::new();
        let d = descriptor();
        registry.create(&d).await.unwrap();
        registry.try_start(d.id, "worker-0").await.unwrap();
        let record = registry.complete(d.id, handle(d.id)).await.unwrap();
        assert_eq!(record.state, JobState::Succeeded);
        assert!(record.outcome_ref.is_some());
        assert!(record.failure_detail.is_none());
    }

    #[tokio::test]
    async fn complete_from_queued_is_illegal() {
        let registry = InMemoryJobRegistry::new();
        let d = descriptor();
        registry.create(&d).await.unwrap();
        assert!(registry.complete(d.id, handle(d.id)).await.is_err());
    }

    #[tokio::test]
    async fn fail_records_detail_and_outcome_ref() {
        let registry = InMemoryJobRegistry::new();
        let d = descriptor();
        registry.create(&d).await.unwrap();
        registry.try_start(d.id, "worker-0").await.unwrap();
        let record = registry
            .fail(d.id, "font cache corrupted", handle(d.id))
            .await
            .unwrap();
        assert_eq!(record.state, JobState::Failed);
        assert_eq!(record.failure_detail.as_deref(), Some("font cache corrupted"));
        assert!(record.outcome_ref.is_some());
    }

    #[tokio::test]
    async fn cancel_of_queued_job_is_immediate() {
        let registry = InMemoryJobRegistry::new();
        let d = descriptor();
        registry.create(&d).await.unwrap();
        match registry.request_cancel(d.id).await.unwrap().unwrap() {
            CancelDisposition::Cancelled(record) => {
                assert_eq!(record.state, JobState::Cancelled);
                assert!(record.outcome_ref.is_none());
            }
            other => panic!("expected Cancelled, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_of_running_job_signals_the_worker() {
        let registry = InMemoryJobRegistry::new();
        let d = descriptor();
        registry.create(&d).await.unwrap();
        registry.try_start(d.id, "worker-0").await.unwrap();

        match registry.request_cancel(d.id).await.unwrap().unwrap() {
            CancelDisposition::Signalled(record) => {
                assert_eq!(record.state, JobState::Running);
                assert!(record.cancel_requested);
            }
            other => panic!("expected Signalled, got {other:?}"),
        }

        let record = registry.acknowledge_cancel(d.id).await.unwrap();
        assert_eq!(record.state, JobState::Cancelled);
    }

    #[tokio::test]
    async fn cancel_of_terminal_job_is_a_noop() {
        let registry = InMemoryJobRegistry::new();
        let d = descriptor();
        registry.create(&d).await.unwrap();
        registry.try_start(d.id, "worker-0").await.unwrap();
        registry.complete(d.id, handle(d.id)).await.unwrap();

        match registry.request_cancel(d.id).await.unwrap().unwrap() {
            CancelDisposition::AlreadyTerminal(record) => {
                assert_eq!(record.state, JobState::Succeeded);
                assert!(!record.cancel_requested);
            }
            other => panic!("expected AlreadyTerminal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_of_unknown_job_returns_none() {
        let registry = InMemoryJobRegistry::new();
        assert!(registry
            .request_cancel(JobId::new())
            .await
            .unwrap()
            .is_none());
    }
}
