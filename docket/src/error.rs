use crate::job::{JobId, JobState, MalformedOptions};

/// Caller-facing failures of the orchestration layer.
///
/// Failures raised *inside* the processing callback never surface through
/// this type: the worker contains them, records the stringified detail on
/// the job, and moves the job to `failed`. Callers observe those through
/// [`JobFailed`](OrchestrationError::JobFailed) on outcome fetch or through
/// the `failure_detail` field on the job status.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    /// Malformed submission or request; never retried.
    #[error("invalid request: {0}")]
    Validation(String),

    /// No live worker detected; callers should back off and retry.
    #[error("no live workers available to accept the job")]
    NoCapacity,

    #[error("job {0} not found")]
    NotFound(JobId),

    /// Outcome requested before the job reached a terminal state.
    #[error("job {id} is not finished (state: {state})")]
    NotReady { id: JobId, state: JobState },

    /// The job reached `failed`; carries the recorded detail.
    #[error("job {id} failed: {detail}")]
    JobFailed { id: JobId, detail: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type OrchestrationResult<T> = Result<T, OrchestrationError>;

impl From<MalformedOptions> for OrchestrationError {
    fn from(err: MalformedOptions) -> Self {
        OrchestrationError::Validation(err.to_string())
    }
}

impl OrchestrationError {
    /// Status code an HTTP adapter should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            OrchestrationError::Validation(_) => 400,
            OrchestrationError::NoCapacity => 503,
            OrchestrationError::NotFound(_) => 404,
            OrchestrationError::NotReady { .. } => 400,
            OrchestrationError::JobFailed { .. } => 500,
            OrchestrationError::Internal(_) => 500,
        }
    }

    /// Stable machine-readable code for wire payloads.
    pub fn code(&self) -> &'static str {
        match self {
            OrchestrationError::Validation(_) => "VALIDATION_ERROR",
            OrchestrationError::NoCapacity => "NO_CAPACITY",
            OrchestrationError::NotFound(_) => "NOT_FOUND",
            OrchestrationError::NotReady { .. } => "NOT_READY",
            OrchestrationError::JobFailed { .. } => "JOB_FAILED",
            OrchestrationError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
