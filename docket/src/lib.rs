//! Docket - Asynchronous job orchestration for document processing services.
//!
//! A foundational crate that turns slow, CPU-bound document work into
//! submit-and-poll jobs: clients hand in a payload, receive a job id, and
//! follow the job through a small state machine until they collect the
//! produced artifacts. Execution is carried by a pool of workers that claim
//! queued jobs from a broker, report progress, honor cooperative
//! cancellation, and park results in a result store.
//!
//! # Core Concepts
//!
//! - **Job**: One submitted unit of work. [`JobDescriptor`] travels through
//!   the broker, [`JobRecord`] tracks the lifecycle in the registry, and
//!   [`JobState`] names the states (`queued`, `running`, `progressing`,
//!   `succeeded`, `failed`, `cancelled`).
//!
//! - **Registry**: The [`JobRegistry`] trait is the authoritative state
//!   machine. Every transition is validated there, including claim
//!   arbitration and monotonic progress.
//!
//! - **Broker**: The [`Broker`] trait carries descriptors from submission
//!   to workers with at-least-once delivery and late acknowledgement.
//!
//! - **Result store**: The [`ResultStore`] trait holds finished outcomes,
//!   the primary and secondary artifacts of a success or the recorded
//!   detail of a failure.
//!
//! - **Liveness**: Workers heartbeat into a [`WorkerDirectory`]; the
//!   [`LivenessProbe`] aggregates heartbeats so submission can be refused
//!   when nobody would ever pick the job up.
//!
//! - **Processor**: The [`DocumentProcessor`] trait is the seam for the
//!   actual document work. It reports progress and observes cancellation
//!   through an [`ExecutionContext`].
//!
//! - **Workers**: The [`worker`] module runs the claim/execute/settle loop
//!   with bounded graceful drain.
//!
//! - **Orchestrator**: The [`Orchestrator`] facade ties submission, state
//!   queries, cancellation, outcome fetch, and health into one API for
//!   transport adapters.
//!
//! - **Events**: [`EventPublisher`] and [`InProcEventBus`] broadcast
//!   lifecycle events for reactive consumers and tests.
//!
//! # Feature Flags
//!
//! - `postgres` - PostgreSQL-backed broker, registry, store, and worker
//!   directory via sqlx
//! - `metrics` - Prometheus metrics support
//!
//! # Example
//!
//! ```ignore
//! use docket::{ArtifactKind, OrchestratorBuilder};
//! use serde_json::json;
//!
//! let orchestrator = OrchestratorBuilder::new(config.liveness.clone())
//!     .with_broker(broker)
//!     .with_registry(registry)
//!     .with_store(store)
//!     .with_directory(directory)
//!     .with_events(events)
//!     .build()?;
//!
//! let job_id = orchestrator
//!     .submit(document_bytes, json!({"target_lang": "fr"}))
//!     .await?;
//! let status = orchestrator.get_state(job_id).await?;
//! ```

/// Job transport between submission and workers.
///
/// The `broker` module defines the [`Broker`] trait for queue backends,
/// along with [`Delivery`] and [`DeliveryToken`] for the late-ack claim
/// protocol.
pub mod broker;

/// Configuration structures for the orchestration layer.
///
/// The `config` module defines [`OrchestrationConfig`] and its sections
/// ([`BrokerConfig`], [`ResultStoreConfig`], [`WorkerPoolConfig`],
/// [`LivenessConfig`]), with environment-variable loading.
pub mod config;

/// Caller-facing error taxonomy.
///
/// The `error` module defines [`OrchestrationError`] with stable codes and
/// HTTP status mappings for transport adapters.
pub mod error;

/// Event publishing and subscription system.
///
/// The `events` module provides traits and types for job lifecycle events:
/// - [`EventPublisher`] and [`EventSubscriber`] for pub/sub patterns
/// - [`JobEvent`] and [`JobEventPayload`] for event data
/// - [`InProcEventBus`] for in-process event broadcasting
pub mod events;

/// Core job definitions.
///
/// The `job` module defines the data model every component shares:
/// - [`JobId`] - unique job identifier
/// - [`JobState`] - lifecycle states and legal transitions
/// - [`JobDescriptor`] - the submitted unit handed to workers
/// - [`JobRecord`] - registry entry tracking one job end to end
/// - [`JobOptions`] - opaque submission options
/// - [`Progress`] - monotonic progress counter
/// - [`JobArtifacts`], [`JobOutcome`], [`OutcomeHandle`] - result handoff
/// - [`ArtifactKind`] - names the primary and secondary blobs
pub mod job;

/// Worker liveness tracking and admission probes.
///
/// The `liveness` module provides the [`WorkerDirectory`] trait for
/// heartbeat registration, [`InMemoryWorkerDirectory`], and the cached
/// [`LivenessProbe`] answering [`PoolStatus`] snapshots.
pub mod liveness;

#[cfg(feature = "metrics")]
/// Prometheus metrics for job throughput and pool state.
///
/// Available when the `metrics` feature is enabled; the [`telemetry`]
/// module forwards into it so call sites need no feature gates.
pub mod metrics;

/// Client-facing orchestration facade.
///
/// The `orchestrator` module ties the components together:
/// - [`Orchestrator`] - submit, state, cancel, outcome fetch, health
/// - [`OrchestratorBuilder`] - dependency wiring
/// - [`JobStatus`] and [`HealthReport`] - answer types for adapters
pub mod orchestrator;

#[cfg(feature = "postgres")]
/// PostgreSQL persistence implementation.
///
/// The `persistence` module provides PostgreSQL-backed implementations of
/// the broker, registry, result store, and worker directory when the
/// `postgres` feature is enabled.
pub mod persistence;

/// The processing seam executed by workers.
///
/// The `processor` module defines the [`DocumentProcessor`] trait along
/// with [`ExecutionContext`], [`InterruptFlag`], and the progress channel
/// used to stream updates out of a running job.
pub mod processor;

/// Authoritative job state machine.
///
/// The `registry` module defines the [`JobRegistry`] trait, the
/// [`InMemoryJobRegistry`] implementation, and the claim/cancel
/// dispositions ([`StartDisposition`], [`CancelDisposition`]).
pub mod registry;

/// Outcome and artifact storage.
///
/// The `store` module defines the [`ResultStore`] trait for parking
/// finished outcomes until clients collect them.
pub mod store;

/// Tracing spans and recording helpers for the job lifecycle.
///
/// The `telemetry` module logs lifecycle milestones and, when the
/// `metrics` feature is enabled, mirrors them into Prometheus metrics.
pub mod telemetry;

/// Worker pool running the claim/execute/settle loop.
///
/// The `worker` module provides:
/// - [`WorkerPool`](worker::WorkerPool) - concurrency-bounded executors
/// - [`WorkerPoolBuilder`](worker::WorkerPoolBuilder) - dependency wiring
/// - [`ShutdownToken`](worker::ShutdownToken) - graceful shutdown signaling
/// - [`WorkerConfig`](worker::WorkerConfig) - individual worker settings
pub mod worker;

pub use broker::*;
pub use config::*;
pub use error::*;
pub use events::*;
pub use job::*;
pub use liveness::*;
pub use orchestrator::*;
pub use processor::*;
pub use registry::*;
pub use store::*;
