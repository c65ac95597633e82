use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::job::{JobArtifacts, JobDescriptor, JobId, Progress};

/// Sentinel returned from a checkpoint once cancellation (or shutdown) has
/// been requested. The worker recovers it by downcast at the boundary and
/// resolves the job accordingly instead of recording a failure.
#[derive(Debug, thiserror::Error)]
#[error("job {0} interrupted before completion")]
pub struct ExecutionInterrupted(pub JobId);

/// Sender half of a job's progress channel, handed to the callback.
pub type ProgressSender = mpsc::UnboundedSender<Progress>;

/// Receiver half, owned by the worker watching the job.
pub type ProgressReceiver = mpsc::UnboundedReceiver<Progress>;

/// Create the progress channel for one job execution.
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Shared flag the worker trips to request cooperative interruption.
#[derive(Clone, Debug, Default)]
pub struct InterruptFlag {
    inner: Arc<AtomicBool>,
}

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.inner.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }
}

/// Execution-side view of one claimed job: identity, a progress-reporting
/// channel, and the interruption flag.
///
/// Progress reporting is non-blocking and safe to call from anywhere in the
/// processing callback; the owning worker applies updates to the registry
/// in the order received and drops stale counts there.
pub struct ExecutionContext {
    job_id: JobId,
    progress_tx: ProgressSender,
    interrupt: InterruptFlag,
}

impl ExecutionContext {
    pub fn new(
        job_id: JobId,
        progress_tx: ProgressSender,
        interrupt: InterruptFlag,
    ) -> Self {
        Self {
            job_id,
            progress_tx,
            interrupt,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Cooperative cancellation point. Call between units of work; once the
    /// flag is tripped, every later call fails with the sentinel.
    pub fn checkpoint(&self) -> Result<(), ExecutionInterrupted> {
        if self.interrupt.is_set() {
            Err(ExecutionInterrupted(self.job_id))
        } else {
            Ok(())
        }
    }

    /// Report progress after finishing `n` of `total` units. Doubles as a
    /// checkpoint, so a loop that only reports still stops promptly.
    pub fn report_progress(&self, n: u64, total: u64) -> Result<(), ExecutionInterrupted> {
        self.checkpoint()?;
        // A closed receiver means the worker is tearing the job down; the
        // next checkpoint will surface the interruption.
        let _ = self.progress_tx.send(Progress::new(n, total));
        Ok(())
    }
}

/// The narrow task-execution contract. Everything the orchestration layer
/// knows about actual document processing is this one call.
///
/// Any error returned here is contained by the owning worker: it becomes
/// the job's `failure_detail` and never crashes the pool. Returning
/// [`ExecutionInterrupted`] after a failed checkpoint resolves a requested
/// cancellation instead.
#[async_trait]
pub trait DocumentProcessor: Send + Sync {
    async fn process(
        &self,
        job: JobDescriptor,
        ctx: ExecutionContext,
    ) -> anyhow::Result<JobArtifacts>;
}
