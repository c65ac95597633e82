use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::job::JobId;

/// One job lifecycle transition, published as it is applied.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: JobId,
    pub occurred_at: DateTime<Utc>,
    pub payload: JobEventPayload,
}

impl JobEvent {
    pub fn new(job_id: JobId, payload: JobEventPayload) -> Self {
        Self {
            job_id,
            occurred_at: Utc::now(),
            payload,
        }
    }
}

/// Payload emitted per lifecycle transition.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub enum JobEventPayload {
    /// Job was validated and enqueued.
    Submitted,
    /// A worker claimed the job.
    Started { worker_id: String },
    /// A progress update was applied (stale updates emit nothing).
    Progressed { n: u64, total: u64 },
    /// Job finished and its outcome was stored.
    Succeeded,
    /// Job failed; carries the recorded detail.
    Failed { detail: String },
    /// Cancellation of a running job was requested.
    CancelRequested,
    /// Job is terminally cancelled.
    Cancelled,
}

/// Publisher seam for bridging lifecycle events out of the process.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an event to all subscribers.
    async fn publish(&self, event: JobEvent) -> anyhow::Result<()>;
}

/// Subscriber seam for consuming lifecycle events in-process.
pub trait EventSubscriber: Send + Sync {
    /// Subscribe to events, returning a broadcast receiver.
    ///
    /// Multiple subscribers receive the same events (fan-out).
    fn subscribe(&self) -> broadcast::Receiver<JobEvent>;
}

/// In-process event bus over a tokio broadcast channel.
///
/// Publishing never blocks: with no subscribers the event is dropped, and a
/// subscriber that lags past the buffer receives `RecvError::Lagged` rather
/// than slowing the publisher. Job correctness never depends on event
/// delivery; this is observability plumbing.
#[derive(Clone)]
pub struct InProcEventBus {
    sender: broadcast::Sender<JobEvent>,
    capacity: usize,
}

impl std::fmt::Debug for InProcEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcEventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl InProcEventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish to all current subscribers. Non-blocking; with no
    /// subscribers the event is silently dropped.
    pub fn publish(&self, event: JobEvent) -> anyhow::Result<()> {
        let _ = self.sender.send(event);
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

impl Default for InProcEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventPublisher for InProcEventBus {
    async fn publish(&self, event: JobEvent) -> anyhow::Result<()> {
        InProcEventBus::publish(self, event)
    }
}

impl EventSubscriber for InProcEventBus {
    fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        InProcEventBus::subscribe(self)
    }
}
