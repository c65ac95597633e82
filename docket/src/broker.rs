use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use uuid::Uuid;

use crate::job::{JobDescriptor, JobId};

/// Receipt for one delivery, held by the worker until acknowledgement.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct DeliveryToken(pub Uuid);

impl Default for DeliveryToken {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryToken {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Display for DeliveryToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One dequeued descriptor plus its acknowledgement token.
#[derive(Clone, Debug)]
pub struct Delivery {
    pub token: DeliveryToken,
    pub descriptor: JobDescriptor,
    /// True when a prior delivery of this descriptor went unacknowledged.
    pub redelivered: bool,
}

/// Trait for the durable at-least-once channel between submission and
/// workers.
///
/// Acknowledgement is late: a worker acks only once its job reaches a
/// terminal state (or turns out to be finished already). A delivery that is
/// never acked, because the holding worker died, must eventually be
/// redelivered. Duplicate deliveries are therefore possible and the claim
/// path tolerates them.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Enqueue a descriptor for delivery to one worker.
    async fn enqueue(&self, descriptor: JobDescriptor) -> anyhow::Result<()>;

    /// Pull at most one descriptor. A worker holds a single unacked
    /// delivery at a time.
    async fn dequeue(&self, worker_id: &str) -> anyhow::Result<Option<Delivery>>;

    /// Acknowledge a delivery, retiring it permanently.
    async fn ack(&self, token: DeliveryToken) -> anyhow::Result<()>;

    /// Best-effort removal of a descriptor that has not been delivered yet.
    /// Returns `false` when the descriptor was already delivered or unknown;
    /// the claim path handles that race.
    async fn discard_pending(&self, id: JobId) -> anyhow::Result<bool>;

    /// Number of descriptors awaiting delivery.
    async fn depth(&self) -> anyhow::Result<usize>;
}
