use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docket::*;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// In-memory result store keeping outcomes until the test inspects them.
#[derive(Clone, Default)]
pub struct InMemoryResultStore {
    outcomes: Arc<Mutex<HashMap<JobId, (JobOutcome, DateTime<Utc>)>>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.outcomes.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.outcomes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn put_outcome(&self, id: JobId, outcome: JobOutcome) -> anyhow::Result<OutcomeHandle> {
        let written_at = Utc::now();
        self.outcomes.lock().insert(id, (outcome, written_at));
        Ok(OutcomeHandle {
            key: format!("testkit/{id}"),
            written_at,
        })
    }

    async fn get_outcome(&self, id: JobId) -> anyhow::Result<Option<JobOutcome>> {
        Ok(self
            .outcomes
            .lock()
            .get(&id)
            .map(|(outcome, _)| outcome.clone()))
    }
}
