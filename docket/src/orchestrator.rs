//! Client-facing facade over the orchestration layer.
//!
//! The [`Orchestrator`] owns the submission path and the read side of the
//! job lifecycle: it validates submissions, gates them on worker liveness,
//! hands descriptors to the broker, and answers state, cancellation, and
//! outcome queries from the registry and result store. It never runs jobs
//! itself; execution belongs to the worker pool.
//!
//! Transport adapters (HTTP, gRPC, a CLI) are expected to wrap this type
//! and translate [`OrchestrationError`] with
//! [`http_status`](OrchestrationError::http_status) and
//! [`code`](OrchestrationError::code).

use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use anyhow::anyhow;
use serde::Serialize;

use crate::broker::Broker;
use crate::config::LivenessConfig;
use crate::error::{OrchestrationError, OrchestrationResult};
use crate::events::{EventPublisher, JobEvent, JobEventPayload};
use crate::job::{ArtifactKind, JobDescriptor, JobId, JobOptions, JobRecord, JobState, Progress};
use crate::liveness::{LivenessProbe, PoolStatus, WorkerDirectory};
use crate::registry::{CancelDisposition, JobRegistry};
use crate::store::ResultStore;
use crate::telemetry;

/// Service identifier reported by [`Orchestrator::health`].
pub const SERVICE_NAME: &str = "docket";

/// Warning attached to a queued job's status when no live worker is
/// detectable. Surfaces should map it to a 503-equivalent answer so the
/// client backs off instead of polling a job that cannot start.
pub const NO_WORKER_WARNING: &str =
    "no live workers detected; the job stays queued until one appears";

/// Point-in-time view of one job, as answered to clients.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct JobStatus {
    pub state: JobState,
    /// Latest recorded progress. Present while the job is progressing.
    pub progress: Option<Progress>,
    /// Stringified failure cause. Present once the job has failed.
    pub failure_detail: Option<String>,
    /// Advisory condition attached by the orchestrator, such as a queued
    /// job with no live worker to pick it up.
    pub warning: Option<String>,
}

impl JobStatus {
    pub fn from_record(record: &JobRecord) -> Self {
        Self {
            state: record.state,
            progress: record.progress,
            failure_detail: record.failure_detail.clone(),
            warning: None,
        }
    }
}

/// Answer of the health surface. The endpoint itself never fails: when the
/// worker directory cannot be probed, `workers` is `None` and the caller
/// decides how to treat a blind spot.
#[derive(Clone, Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub service: &'static str,
    pub workers: Option<PoolStatus>,
}

/// Facade coordinating registry, broker, result store, and liveness probe.
///
/// Cloning is cheap for the components; the orchestrator itself is usually
/// wrapped in an [`Arc`] and shared with the transport layer.
pub struct Orchestrator<B, R, S, W>
where
    B: Broker,
    R: JobRegistry,
    S: ResultStore,
    W: WorkerDirectory,
{
    broker: Arc<B>,
    registry: Arc<R>,
    store: Arc<S>,
    probe: LivenessProbe<W>,
    events: Arc<dyn EventPublisher>,
}

impl<B, R, S, W> fmt::Debug for Orchestrator<B, R, S, W>
where
    B: Broker,
    R: JobRegistry,
    S: ResultStore,
    W: WorkerDirectory,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("broker", &type_name::<B>())
            .field("registry", &type_name::<R>())
            .field("store", &type_name::<S>())
            .field("directory", &type_name::<W>())
            .finish_non_exhaustive()
    }
}

impl<B, R, S, W> Orchestrator<B, R, S, W>
where
    B: Broker,
    R: JobRegistry,
    S: ResultStore,
    W: WorkerDirectory,
{
    pub fn new(
        broker: Arc<B>,
        registry: Arc<R>,
        store: Arc<S>,
        probe: LivenessProbe<W>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            broker,
            registry,
            store,
            probe,
            events,
        }
    }

    /// Accept a job for asynchronous processing and hand back its id.
    ///
    /// The payload must be non-empty and `options` must be a JSON object;
    /// anything else is a [`Validation`](OrchestrationError::Validation)
    /// error. Admission is gated on worker liveness: with no live worker
    /// in sight the submission is refused with
    /// [`NoCapacity`](OrchestrationError::NoCapacity) before any state is
    /// written, so a client can never poll a job that had no chance to
    /// start. A probe that cannot answer counts as no capacity.
    pub async fn submit(
        &self,
        payload: Vec<u8>,
        options: serde_json::Value,
    ) -> OrchestrationResult<JobId> {
        if payload.is_empty() {
            return Err(OrchestrationError::Validation("payload is empty".into()));
        }
        let options = JobOptions::from_value(options)?;

        let pool = match self.probe.status().await {
            Ok(pool) => pool,
            Err(err) => {
                tracing::warn!("liveness probe failed, refusing submission: {err:#}");
                return Err(OrchestrationError::NoCapacity);
            }
        };
        if !pool.has_workers() {
            tracing::warn!(live = pool.live, "submission refused, no live workers");
            return Err(OrchestrationError::NoCapacity);
        }

        let descriptor = JobDescriptor::new(payload, options);
        let job_id = descriptor.id;

        self.registry.create(&descriptor).await?;
        if let Err(err) = self.broker.enqueue(descriptor).await {
            // A job that never reached the broker must not sit queued
            // forever; fold the entry before reporting the failure.
            tracing::error!(job_id = %job_id, "enqueue failed: {err:#}");
            if let Err(cancel_err) = self.registry.request_cancel(job_id).await {
                tracing::warn!(job_id = %job_id, "rollback cancel failed: {cancel_err:#}");
            }
            return Err(err.into());
        }

        self.publish(job_id, JobEventPayload::Submitted).await;
        telemetry::record_job_submitted(job_id);
        Ok(job_id)
    }

    /// Report the current state of a job.
    ///
    /// For a queued job the answer also reflects worker liveness: when no
    /// live worker is detectable the status carries [`NO_WORKER_WARNING`]
    /// so surfaces can answer 503-equivalent instead of letting the client
    /// poll forever.
    pub async fn get_state(&self, id: JobId) -> OrchestrationResult<JobStatus> {
        let record = self
            .registry
            .get(id)
            .await?
            .ok_or(OrchestrationError::NotFound(id))?;
        let mut status = JobStatus::from_record(&record);
        if record.state == JobState::Queued {
            match self.probe.status().await {
                Ok(pool) if !pool.has_workers() => {
                    status.warning = Some(NO_WORKER_WARNING.to_string());
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(job_id = %id, "liveness probe failed: {err:#}");
                }
            }
        }
        Ok(status)
    }

    /// Request cancellation of a job and report the state it settled in.
    ///
    /// A queued job is cancelled on the spot and its pending delivery
    /// discarded from the broker. A running job is only *asked* to stop:
    /// the worker observes the request at its next checkpoint, so the
    /// answered state is still `running` or `progressing` until the worker
    /// confirms. Cancelling a finished job changes nothing and answers the
    /// terminal state it already reached.
    pub async fn cancel(&self, id: JobId) -> OrchestrationResult<JobStatus> {
        let disposition = self
            .registry
            .request_cancel(id)
            .await?
            .ok_or(OrchestrationError::NotFound(id))?;
        match disposition {
            CancelDisposition::Cancelled(record) => {
                match self.broker.discard_pending(id).await {
                    Ok(true) => {}
                    // Already handed to a worker; its claim will observe the
                    // terminal state and drop the delivery.
                    Ok(false) => {
                        tracing::debug!(job_id = %id, "no pending delivery to discard")
                    }
                    Err(err) => {
                        tracing::warn!(job_id = %id, "discarding pending delivery failed: {err:#}")
                    }
                }
                self.publish(id, JobEventPayload::Cancelled).await;
                telemetry::record_job_finished(id, JobState::Cancelled.as_str());
                tracing::info!(job_id = %id, "queued job cancelled");
                Ok(JobStatus::from_record(&record))
            }
            CancelDisposition::Signalled(record) => {
                self.publish(id, JobEventPayload::CancelRequested).await;
                tracing::info!(job_id = %id, state = %record.state, "cancellation requested");
                Ok(JobStatus::from_record(&record))
            }
            CancelDisposition::AlreadyTerminal(record) => {
                tracing::debug!(job_id = %id, state = %record.state, "cancel after finish ignored");
                Ok(JobStatus::from_record(&record))
            }
        }
    }

    /// Fetch one named artifact of a finished job.
    ///
    /// Only a succeeded job has artifacts to hand out. A failed job
    /// answers [`JobFailed`](OrchestrationError::JobFailed) carrying the
    /// recorded detail; any other state, cancelled included, answers
    /// [`NotReady`](OrchestrationError::NotReady).
    pub async fn fetch_outcome(
        &self,
        id: JobId,
        kind: ArtifactKind,
    ) -> OrchestrationResult<Vec<u8>> {
        let record = self
            .registry
            .get(id)
            .await?
            .ok_or(OrchestrationError::NotFound(id))?;
        match record.state {
            JobState::Failed => Err(OrchestrationError::JobFailed {
                id,
                detail: record
                    .failure_detail
                    .unwrap_or_else(|| "failure detail not recorded".to_string()),
            }),
            JobState::Succeeded => self
                .store
                .get_artifact(id, kind)
                .await?
                .ok_or_else(|| {
                    OrchestrationError::Internal(anyhow!(
                        "job {id} succeeded but the result store has no {kind} artifact"
                    ))
                }),
            state => Err(OrchestrationError::NotReady { id, state }),
        }
    }

    /// Answer the service health surface. Never fails: a probe that cannot
    /// answer leaves `workers` unset instead of failing the endpoint.
    pub async fn health(&self) -> HealthReport {
        let workers = match self.probe.status().await {
            Ok(pool) => {
                telemetry::set_worker_pool(pool.live, pool.busy);
                Some(pool)
            }
            Err(err) => {
                tracing::warn!("liveness probe failed: {err:#}");
                None
            }
        };
        HealthReport {
            status: "ok",
            service: SERVICE_NAME,
            workers,
        }
    }

    pub fn registry(&self) -> Arc<R> {
        Arc::clone(&self.registry)
    }

    pub fn broker(&self) -> Arc<B> {
        Arc::clone(&self.broker)
    }

    pub fn store(&self) -> Arc<S> {
        Arc::clone(&self.store)
    }

    pub fn events(&self) -> Arc<dyn EventPublisher> {
        Arc::clone(&self.events)
    }

    async fn publish(&self, job_id: JobId, payload: JobEventPayload) {
        if let Err(err) = self.events.publish(JobEvent::new(job_id, payload)).await {
            tracing::warn!(job_id = %job_id, "event publish failed: {err:#}");
        }
    }
}

/// Builder wiring an [`Orchestrator`] from its components.
///
/// # Example
///
/// ```ignore
/// let orchestrator = OrchestratorBuilder::new(config.liveness.clone())
///     .with_broker(broker)
///     .with_registry(registry)
///     .with_store(store)
///     .with_directory(directory)
///     .with_events(events)
///     .build()?;
/// ```
pub struct OrchestratorBuilder<B, R, S, W>
where
    B: Broker,
    R: JobRegistry,
    S: ResultStore,
    W: WorkerDirectory,
{
    liveness: LivenessConfig,
    broker: Option<Arc<B>>,
    registry: Option<Arc<R>>,
    store: Option<Arc<S>>,
    directory: Option<Arc<W>>,
    events: Option<Arc<dyn EventPublisher>>,
}

impl<B, R, S, W> fmt::Debug for OrchestratorBuilder<B, R, S, W>
where
    B: Broker,
    R: JobRegistry,
    S: ResultStore,
    W: WorkerDirectory,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("OrchestratorBuilder");
        s.field("liveness", &self.liveness)
            .field("broker_set", &self.broker.is_some())
            .field("registry_set", &self.registry.is_some())
            .field("store_set", &self.store.is_some())
            .field("directory_set", &self.directory.is_some())
            .field("events_set", &self.events.is_some());
        s.finish()
    }
}

impl<B, R, S, W> OrchestratorBuilder<B, R, S, W>
where
    B: Broker,
    R: JobRegistry,
    S: ResultStore,
    W: WorkerDirectory,
{
    pub fn new(liveness: LivenessConfig) -> Self {
        Self {
            liveness,
            broker: None,
            registry: None,
            store: None,
            directory: None,
            events: None,
        }
    }

    pub fn with_broker(mut self, broker: Arc<B>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn with_registry(mut self, registry: Arc<R>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_store(mut self, store: Arc<S>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_directory(mut self, directory: Arc<W>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> anyhow::Result<Orchestrator<B, R, S, W>> {
        let broker = self
            .broker
            .ok_or_else(|| anyhow!("broker dependency missing"))?;
        let registry = self
            .registry
            .ok_or_else(|| anyhow!("registry dependency missing"))?;
        let store = self
            .store
            .ok_or_else(|| anyhow!("store dependency missing"))?;
        let directory = self
            .directory
            .ok_or_else(|| anyhow!("directory dependency missing"))?;
        let events = self
            .events
            .ok_or_else(|| anyhow!("events dependency missing"))?;
        let probe = LivenessProbe::new(directory, self.liveness);
        Ok(Orchestrator::new(broker, registry, store, probe, events))
    }
}
