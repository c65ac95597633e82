use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

use anyhow::Context;

use crate::config::LivenessConfig;
use crate::job::JobId;

/// A single worker's most recent self-report.
///
/// Workers publish these through [`WorkerDirectory::heartbeat`]; admission
/// control reads them back through [`WorkerDirectory::snapshot`] and decides
/// freshness itself. The directory stores, it does not judge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    /// Stable identifier of the worker process.
    pub worker_id: String,
    /// Job the worker is currently executing, if any.
    pub current_job: Option<JobId>,
    /// When the worker last checked in.
    pub last_seen: DateTime<Utc>,
}

/// Trait for the shared registry of worker heartbeats.
#[async_trait]
pub trait WorkerDirectory: Send + Sync {
    /// Record that a worker is alive, stamping the check-in time.
    async fn heartbeat(
        &self,
        worker_id: &str,
        current_job: Option<JobId>,
    ) -> anyhow::Result<()>;

    /// Remove a worker that is shutting down cleanly.
    async fn deregister(&self, worker_id: &str) -> anyhow::Result<()>;

    /// All known workers, fresh and stale alike.
    async fn snapshot(&self) -> anyhow::Result<Vec<WorkerStatus>>;
}

/// Default in-memory implementation of [`WorkerDirectory`].
///
/// Suitable for a single-process deployment where the pool and the
/// submission surface share an address space.
pub struct InMemoryWorkerDirectory {
    workers: Arc<Mutex<HashMap<String, WorkerStatus>>>,
}

impl std::fmt::Debug for InMemoryWorkerDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("InMemoryWorkerDirectory");

        match self.workers.try_lock() {
            Ok(workers) => {
                debug.field("workers", &*workers);
            }
            Err(_) => {
                debug.field("workers", &"<locked>");
            }
        }

        debug.finish_non_exhaustive()
    }
}

impl Default for InMemoryWorkerDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryWorkerDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self {
            workers: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl WorkerDirectory for InMemoryWorkerDirectory {
    async fn heartbeat(
        &self,
        worker_id: &str,
        current_job: Option<JobId>,
    ) -> anyhow::Result<()> {
        let mut workers = self.workers.lock().await;
        workers.insert(
            worker_id.to_owned(),
            WorkerStatus {
                worker_id: worker_id.to_owned(),
                current_job,
                last_seen: Utc::now(),
            },
        );
        Ok(())
    }

    async fn deregister(&self, worker_id: &str) -> anyhow::Result<()> {
        let mut workers = self.workers.lock().await;
        workers.remove(worker_id);
        Ok(())
    }

    async fn snapshot(&self) -> anyhow::Result<Vec<WorkerStatus>> {
        let workers = self.workers.lock().await;
        Ok(workers.values().cloned().collect())
    }
}

/// Aggregate view of the pool, as seen by one probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    /// Workers with a heartbeat inside the freshness window.
    pub live: usize,
    /// Live workers currently holding a job.
    pub busy: usize,
    /// When the probe ran.
    pub sampled_at: DateTime<Utc>,
}

impl PoolStatus {
    /// Whether at least one live worker can pick up new work.
    pub fn has_workers(&self) -> bool {
        self.live > 0
    }
}

/// Rate-limited, bounded view over a [`WorkerDirectory`].
///
/// Every caller that needs to know "is anyone alive out there" goes through
/// here rather than hitting the directory directly. Probes are capped at
/// [`LivenessConfig::probe_timeout`] and successful results are reused for
/// [`LivenessConfig::probe_cache_window`], so a burst of status requests
/// costs one directory round trip.
pub struct LivenessProbe<W> {
    directory: Arc<W>,
    config: LivenessConfig,
    cached: Mutex<Option<(Instant, PoolStatus)>>,
}

impl<W: WorkerDirectory> LivenessProbe<W> {
    /// Create a probe over the given directory.
    pub fn new(directory: Arc<W>, config: LivenessConfig) -> Self {
        Self {
            directory,
            config,
            cached: Mutex::new(None),
        }
    }

    /// Current pool status, served from cache when fresh enough.
    ///
    /// A probe that times out or fails is an error and is never cached;
    /// the next caller retries.
    pub async fn status(&self) -> anyhow::Result<PoolStatus> {
        // Concurrent callers share a single in-flight probe.
        let mut cached = self.cached.lock().await;
        if let Some((probed_at, status)) = *cached {
            if probed_at.elapsed() < self.config.probe_cache_window() {
                return Ok(status);
            }
        }

        let workers = tokio::time::timeout(
            self.config.probe_timeout(),
            self.directory.snapshot(),
        )
        .await
        .context("worker directory probe timed out")??;

        let ttl = self.config.heartbeat_ttl();
        let now = Utc::now();
        let fresh = |status: &WorkerStatus| match (now - status.last_seen).to_std() {
            Ok(age) => age <= ttl,
            // A timestamp ahead of our clock counts as fresh.
            Err(_) => true,
        };

        let mut live = 0;
        let mut busy = 0;
        for worker in &workers {
            if !fresh(worker) {
                continue;
            }
            live += 1;
            if worker.current_job.is_some() {
                busy += 1;
            }
        }

        let status = PoolStatus {
            live,
            busy,
            sampled_at: now,
        };
        *cached = Some((Instant::now(), status));
        Ok(status)
    }
}
