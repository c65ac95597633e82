use async_trait::async_trait;
use docket::*;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// In-memory broker with the same at-least-once contract as a durable
/// backend: deliveries stay claimed until acked, and
/// [`redeliver_unacked`](InMemoryBroker::redeliver_unacked) simulates the
/// janitor that returns a dead worker's claims to the queue.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    pending: VecDeque<QueuedDescriptor>,
    claimed: HashMap<DeliveryToken, QueuedDescriptor>,
}

struct QueuedDescriptor {
    descriptor: JobDescriptor,
    redelivered: bool,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return every claimed-but-unacked delivery to the pending queue,
    /// marked as redelivered. Returns how many came back.
    pub fn redeliver_unacked(&self) -> usize {
        let mut inner = self.inner.lock();
        let reclaimed: Vec<QueuedDescriptor> = inner.claimed.drain().map(|(_, q)| q).collect();
        let count = reclaimed.len();
        for mut queued in reclaimed {
            queued.redelivered = true;
            inner.pending.push_back(queued);
        }
        count
    }

    pub fn pending_ids(&self) -> Vec<JobId> {
        self.inner
            .lock()
            .pending
            .iter()
            .map(|q| q.descriptor.id)
            .collect()
    }

    pub fn claimed_count(&self) -> usize {
        self.inner.lock().claimed.len()
    }

    pub fn assert_drained(&self) {
        let inner = self.inner.lock();
        assert!(
            inner.pending.is_empty() && inner.claimed.is_empty(),
            "Expected a drained broker, got {} pending and {} claimed",
            inner.pending.len(),
            inner.claimed.len()
        );
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn enqueue(&self, descriptor: JobDescriptor) -> anyhow::Result<()> {
        self.inner.lock().pending.push_back(QueuedDescriptor {
            descriptor,
            redelivered: false,
        });
        Ok(())
    }

    async fn dequeue(&self, _worker_id: &str) -> anyhow::Result<Option<Delivery>> {
        let mut inner = self.inner.lock();
        let Some(queued) = inner.pending.pop_front() else {
            return Ok(None);
        };
        let token = DeliveryToken::new();
        let delivery = Delivery {
            token,
            descriptor: queued.descriptor.clone(),
            redelivered: queued.redelivered,
        };
        inner.claimed.insert(token, queued);
        Ok(Some(delivery))
    }

    async fn ack(&self, token: DeliveryToken) -> anyhow::Result<()> {
        self.inner.lock().claimed.remove(&token);
        Ok(())
    }

    async fn discard_pending(&self, id: JobId) -> anyhow::Result<bool> {
        let mut inner = self.inner.lock();
        let before = inner.pending.len();
        inner.pending.retain(|q| q.descriptor.id != id);
        Ok(inner.pending.len() < before)
    }

    async fn depth(&self) -> anyhow::Result<usize> {
        Ok(self.inner.lock().pending.len())
    }
}
