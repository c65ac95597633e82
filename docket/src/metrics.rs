//! Prometheus metrics instrumentation for docket.
//!
//! This module provides Prometheus metrics for monitoring job orchestration.
//! All metrics are conditionally compiled behind the `metrics` feature flag.
//!
//! # Metrics
//!
//! ## Counters
//! - `docket_jobs_submitted_total` - Total number of jobs accepted for processing
//! - `docket_jobs_finished_total` - Total number of jobs reaching a terminal state
//! - `docket_jobs_redelivered_total` - Total number of deliveries handed out again
//!
//! ## Gauges
//! - `docket_queue_depth` - Jobs waiting in the broker
//! - `docket_workers_live` - Workers with a fresh heartbeat
//! - `docket_workers_busy` - Live workers currently executing a job
//!
//! ## Histograms
//! - `docket_job_duration_seconds` - Job execution duration in seconds
#![cfg(feature = "metrics")]

use prometheus::{exponential_buckets, Counter, CounterVec, Gauge, HistogramVec, Opts, Registry};
use std::sync::LazyLock;

/// Global Prometheus registry for docket metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Counter for total jobs accepted for processing.
pub static JOBS_SUBMITTED_TOTAL: LazyLock<Counter> = LazyLock::new(|| {
    let opts = Opts::new(
        "docket_jobs_submitted_total",
        "Total number of jobs accepted for processing",
    );
    Counter::with_opts(opts).expect("docket_jobs_submitted_total metric creation failed")
});

/// Counter for total jobs reaching a terminal state.
///
/// Labels:
/// - `status`: The terminal state (succeeded, failed, cancelled)
pub static JOBS_FINISHED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "docket_jobs_finished_total",
        "Total number of jobs reaching a terminal state",
    );
    CounterVec::new(opts, &["status"])
        .expect("docket_jobs_finished_total metric creation failed")
});

/// Counter for deliveries handed out a second time after a lost attempt.
pub static JOBS_REDELIVERED_TOTAL: LazyLock<Counter> = LazyLock::new(|| {
    let opts = Opts::new(
        "docket_jobs_redelivered_total",
        "Total number of deliveries handed out again",
    );
    Counter::with_opts(opts).expect("docket_jobs_redelivered_total metric creation failed")
});

/// Gauge for jobs waiting in the broker.
pub static QUEUE_DEPTH: LazyLock<Gauge> = LazyLock::new(|| {
    let opts = Opts::new("docket_queue_depth", "Jobs waiting in the broker");
    Gauge::with_opts(opts).expect("docket_queue_depth metric creation failed")
});

/// Gauge for workers with a fresh heartbeat.
pub static WORKERS_LIVE: LazyLock<Gauge> = LazyLock::new(|| {
    let opts = Opts::new("docket_workers_live", "Workers with a fresh heartbeat");
    Gauge::with_opts(opts).expect("docket_workers_live metric creation failed")
});

/// Gauge for live workers currently executing a job.
pub static WORKERS_BUSY: LazyLock<Gauge> = LazyLock::new(|| {
    let opts = Opts::new(
        "docket_workers_busy",
        "Live workers currently executing a job",
    );
    Gauge::with_opts(opts).expect("docket_workers_busy metric creation failed")
});

/// Histogram for job execution duration in seconds.
///
/// Document jobs run from seconds to tens of minutes, so the buckets start
/// at 50ms and stretch past 27 minutes.
///
/// Labels:
/// - `status`: The terminal state (succeeded, failed, cancelled)
pub static JOB_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let buckets = exponential_buckets(0.05, 2.0, 16).expect("bucket creation failed");
    let opts = prometheus::HistogramOpts::new(
        "docket_job_duration_seconds",
        "Job execution duration in seconds",
    )
    .buckets(buckets);
    HistogramVec::new(opts, &["status"])
        .expect("docket_job_duration_seconds metric creation failed")
});

/// Initialize all metrics by registering them with the global registry.
///
/// This function is idempotent - calling it multiple times is safe.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    for metric in [
        Box::new(JOBS_SUBMITTED_TOTAL.clone()) as Box<dyn prometheus::core::Collector>,
        Box::new(JOBS_FINISHED_TOTAL.clone()),
        Box::new(JOBS_REDELIVERED_TOTAL.clone()),
        Box::new(QUEUE_DEPTH.clone()),
        Box::new(WORKERS_LIVE.clone()),
        Box::new(WORKERS_BUSY.clone()),
        Box::new(JOB_DURATION_SECONDS.clone()),
    ] {
        if let Err(e) = registry.register(metric) {
            let msg = e.to_string();
            if !msg.contains("Duplicate metrics collector registration attempted") {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

/// Helper to record a job submission.
pub fn record_job_submitted() {
    JOBS_SUBMITTED_TOTAL.inc();
}

/// Helper to record a job reaching a terminal state.
pub fn record_job_finished(status: &str) {
    JOBS_FINISHED_TOTAL.with_label_values(&[status]).inc();
}

/// Helper to record a redelivered delivery.
pub fn record_job_redelivered() {
    JOBS_REDELIVERED_TOTAL.inc();
}

/// Helper to update the queue depth gauge.
pub fn set_queue_depth(depth: f64) {
    QUEUE_DEPTH.set(depth);
}

/// Helper to update the worker pool gauges.
pub fn set_worker_pool(live: f64, busy: f64) {
    WORKERS_LIVE.set(live);
    WORKERS_BUSY.set(busy);
}

/// Helper to observe job duration.
pub fn observe_job_duration(status: &str, duration_secs: f64) {
    JOB_DURATION_SECONDS
        .with_label_values(&[status])
        .observe(duration_secs);
}

/// Gather all registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        init_metrics().expect("metrics initialization should succeed");
    }

    #[test]
    fn test_record_job_submitted() {
        record_job_submitted();
    }

    #[test]
    fn test_record_job_finished() {
        record_job_finished("succeeded");
        record_job_finished("failed");
        record_job_finished("cancelled");
    }

    #[test]
    fn test_record_job_redelivered() {
        record_job_redelivered();
    }

    #[test]
    fn test_set_queue_depth() {
        set_queue_depth(42.0);
    }

    #[test]
    fn test_set_worker_pool() {
        set_worker_pool(4.0, 2.0);
    }

    #[test]
    fn test_observe_job_duration() {
        observe_job_duration("succeeded", 12.5);
    }

    #[test]
    fn test_gather_metrics() {
        init_metrics().expect("metrics initialization should succeed");

        record_job_submitted();
        record_job_finished("succeeded");

        let output = gather_metrics().expect("gather should succeed");
        assert!(output.contains("docket_jobs_submitted_total"));
        assert!(output.contains("docket_jobs_finished_total"));
    }
}
