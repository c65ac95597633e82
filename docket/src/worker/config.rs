use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for individual workers in the pool.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Unique identifier for this worker.
    pub worker_id: String,
    /// Polling interval when no work is available, in milliseconds.
    pub poll_interval_ms: u64,
    /// Interval between liveness heartbeats while executing, in milliseconds.
    pub heartbeat_interval_ms: u64,
}

impl WorkerConfig {
    /// Create a new worker configuration with the given worker ID.
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            poll_interval_ms: 250,
            heartbeat_interval_ms: 1_000,
        }
    }

    /// Set the polling interval.
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set the heartbeat interval.
    pub fn with_heartbeat_interval(mut self, ms: u64) -> Self {
        self.heartbeat_interval_ms = ms;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::new("docket-worker")
    }
}
