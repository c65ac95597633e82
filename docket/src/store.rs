use async_trait::async_trait;

use crate::job::{ArtifactKind, JobId, JobOutcome, OutcomeHandle};

/// Trait for the durable mapping from job id to terminal outcome.
///
/// An outcome is written exactly once, by the worker that finished the job,
/// and is read-only afterwards. Retention and eviction are the store's own
/// policy; the orchestration layer never deletes.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Write the terminal outcome for a job.
    async fn put_outcome(&self, id: JobId, outcome: JobOutcome) -> anyhow::Result<OutcomeHandle>;

    /// Read a stored outcome, if any.
    async fn get_outcome(&self, id: JobId) -> anyhow::Result<Option<JobOutcome>>;

    /// Read one named artifact of a successful outcome. `None` when nothing
    /// is stored for the id or the stored outcome is a failure. Backends
    /// with columnar storage can override this to avoid fetching both blobs.
    async fn get_artifact(
        &self,
        id: JobId,
        kind: ArtifactKind,
    ) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.get_outcome(id).await?.and_then(|outcome| match outcome {
            JobOutcome::Success { artifacts } => Some(artifacts.artifact(kind).to_vec()),
            JobOutcome::Failure { .. } => None,
        }))
    }
}
