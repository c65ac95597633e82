//! Tracing and telemetry instrumentation for docket.
//!
//! This module provides helper functions for creating tracing spans and
//! recording metrics during job lifecycle events. All functions work both
//! with and without the `metrics` feature flag.
//!
//! # Features
//!
//! - Tracing spans for the job lifecycle: submit, execute, cancel
//! - Integration with the `metrics` module for Prometheus metrics
//! - Helper functions that are no-ops when features are disabled
//!
//! # Example
//!
//! ```ignore
//! use docket::telemetry::{job_execute_span, record_job_finished};
//!
//! let span = job_execute_span(job_id, "worker-0");
//! let _enter = span.enter();
//! // ... job execution
//! record_job_finished(job_id, "succeeded");
//! ```

use std::future::Future;
use tracing::{info_span, Instrument, Span};

use crate::job::JobId;

/// Create a tracing span for job submission.
#[must_use]
pub fn job_submit_span(job_id: JobId) -> Span {
    info_span!(
        "docket.submit",
        job_id = %job_id,
    )
}

/// Create a tracing span for job execution on a worker.
///
/// # Arguments
/// * `job_id` - The unique job identifier
/// * `worker_id` - The worker executing the job
#[must_use]
pub fn job_execute_span(job_id: JobId, worker_id: impl AsRef<str>) -> Span {
    info_span!(
        "docket.execute",
        job_id = %job_id,
        worker_id = %worker_id.as_ref(),
    )
}

/// Create a tracing span for a cancellation request.
#[must_use]
pub fn job_cancel_span(job_id: JobId) -> Span {
    info_span!(
        "docket.cancel",
        job_id = %job_id,
    )
}

/// Instrument a future with a job execution span.
///
/// # Arguments
/// * `job_id` - The unique job identifier
/// * `worker_id` - The worker executing the job
/// * `future` - The future to instrument
pub fn instrument_execute<F>(
    job_id: JobId,
    worker_id: impl AsRef<str>,
    future: F,
) -> impl Future<Output = F::Output>
where
    F: Future,
{
    let span = job_execute_span(job_id, worker_id);
    future.instrument(span)
}

/// Record a job submission in logs and metrics.
pub fn record_job_submitted(job_id: JobId) {
    tracing::info!(job_id = %job_id, "job submitted");

    #[cfg(feature = "metrics")]
    crate::metrics::record_job_submitted();
}

/// Record a job reaching a terminal state.
///
/// # Arguments
/// * `job_id` - The unique job identifier
/// * `status` - The terminal state (succeeded, failed, cancelled)
pub fn record_job_finished(job_id: JobId, status: impl AsRef<str>) {
    tracing::info!(
        job_id = %job_id,
        status = %status.as_ref(),
        "job finished"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_job_finished(status.as_ref());
}

/// Record a delivery handed out again after a lost attempt.
pub fn record_job_redelivered(job_id: JobId) {
    tracing::warn!(job_id = %job_id, "job redelivered");

    #[cfg(feature = "metrics")]
    crate::metrics::record_job_redelivered();
}

/// Update the queue depth metric.
pub fn set_queue_depth(depth: usize) {
    tracing::debug!(depth = depth, "queue depth updated");

    #[cfg(feature = "metrics")]
    crate::metrics::set_queue_depth(depth as f64);
}

/// Update the worker pool gauges.
///
/// # Arguments
/// * `live` - Workers with a fresh heartbeat
/// * `busy` - Live workers currently executing a job
pub fn set_worker_pool(live: usize, busy: usize) {
    tracing::debug!(live = live, busy = busy, "worker pool sampled");

    #[cfg(feature = "metrics")]
    crate::metrics::set_worker_pool(live as f64, busy as f64);
}

/// Observe the duration of a job execution.
///
/// # Arguments
/// * `job_id` - The unique job identifier
/// * `status` - The terminal state
/// * `duration_secs` - The duration in seconds
pub fn observe_job_duration(job_id: JobId, status: impl AsRef<str>, duration_secs: f64) {
    tracing::info!(
        job_id = %job_id,
        status = %status.as_ref(),
        duration_secs = duration_secs,
        "job duration observed"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::observe_job_duration(status.as_ref(), duration_secs);
}

/// Record the start of job execution for duration tracking.
///
/// Returns an opaque handle that should be passed to `record_job_end`.
pub fn record_job_start(job_id: JobId) -> JobTimingHandle {
    JobTimingHandle {
        job_id,
        start: std::time::Instant::now(),
    }
}

/// Record the end of job execution and update duration metrics.
///
/// # Arguments
/// * `handle` - The timing handle from `record_job_start`
/// * `status` - The terminal state
pub fn record_job_end(handle: JobTimingHandle, status: impl AsRef<str>) {
    let duration_secs = handle.start.elapsed().as_secs_f64();

    observe_job_duration(handle.job_id, status, duration_secs);
}

/// Handle for tracking job execution duration.
///
/// This is an opaque type returned by `record_job_start` and consumed by
/// `record_job_end`.
#[derive(Debug)]
pub struct JobTimingHandle {
    job_id: JobId,
    start: std::time::Instant,
}

impl JobTimingHandle {
    /// Get the job ID associated with this timing handle.
    #[must_use]
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Get the elapsed time since the job started.
    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
