use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use crate::broker::Broker;
use crate::config::WorkerPoolConfig;
use crate::events::EventPublisher;
use crate::liveness::WorkerDirectory;
use crate::processor::DocumentProcessor;
use crate::registry::JobRegistry;
use crate::store::ResultStore;

use super::pool::WorkerPool;

/// Builder for constructing a [`WorkerPool`] with explicit dependencies.
///
/// The builder validates that all required dependencies are provided before
/// constructing the pool. Each dependency is configured via a `with_*`
/// method.
///
/// # Example
///
/// ```ignore
/// use docket::worker::WorkerPoolBuilder;
///
/// let pool = WorkerPoolBuilder::new(config)
///     .with_processor(processor)
///     .with_broker(broker)
///     .with_registry(registry)
///     .with_store(store)
///     .with_directory(directory)
///     .with_events(events)
///     .build()?;
/// ```
pub struct WorkerPoolBuilder<P, B, R, S, W>
where
    P: DocumentProcessor + 'static,
    B: Broker + 'static,
    R: JobRegistry + 'static,
    S: ResultStore + 'static,
    W: WorkerDirectory + 'static,
{
    config: WorkerPoolConfig,
    processor: Option<Arc<P>>,
    broker: Option<Arc<B>>,
    registry: Option<Arc<R>>,
    store: Option<Arc<S>>,
    directory: Option<Arc<W>>,
    events: Option<Arc<dyn EventPublisher>>,
}

impl<P, B, R, S, W> fmt::Debug for WorkerPoolBuilder<P, B, R, S, W>
where
    P: DocumentProcessor + 'static,
    B: Broker + 'static,
    R: JobRegistry + 'static,
    S: ResultStore + 'static,
    W: WorkerDirectory + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("WorkerPoolBuilder");
        debug.field("config", &self.config);
        debug.field("processor_set", &self.processor.is_some());
        debug.field("broker_set", &self.broker.is_some());
        debug.field("registry_set", &self.registry.is_some());
        debug.field("store_set", &self.store.is_some());
        debug.field("directory_set", &self.directory.is_some());
        debug.field("events_set", &self.events.is_some());

        if self.processor.is_some() {
            debug.field("processor_type", &type_name::<P>());
        }
        if self.broker.is_some() {
            debug.field("broker_type", &type_name::<B>());
        }
        if self.registry.is_some() {
            debug.field("registry_type", &type_name::<R>());
        }
        if self.store.is_some() {
            debug.field("store_type", &type_name::<S>());
        }
        if self.directory.is_some() {
            debug.field("directory_type", &type_name::<W>());
        }

        debug.finish()
    }
}

impl<P, B, R, S, W> WorkerPoolBuilder<P, B, R, S, W>
where
    P: DocumentProcessor + 'static,
    B: Broker + 'static,
    R: JobRegistry + 'static,
    S: ResultStore + 'static,
    W: WorkerDirectory + 'static,
{
    /// Create a new builder with the given pool configuration.
    pub fn new(config: WorkerPoolConfig) -> Self {
        Self {
            config,
            processor: None,
            broker: None,
            registry: None,
            store: None,
            directory: None,
            events: None,
        }
    }

    /// Set the document processor.
    pub fn with_processor(mut self, processor: Arc<P>) -> Self {
        self.processor = Some(processor);
        self
    }

    /// Set the broker.
    pub fn with_broker(mut self, broker: Arc<B>) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Set the job registry.
    pub fn with_registry(mut self, registry: Arc<R>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the result store.
    pub fn with_store(mut self, store: Arc<S>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the worker directory.
    pub fn with_directory(mut self, directory: Arc<W>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Set the event publisher.
    pub fn with_events(mut self, events: Arc<dyn EventPublisher + 'static>) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the [`WorkerPool`] with all configured dependencies.
    ///
    /// # Errors
    ///
    /// Returns an error if any required dependency is missing.
    pub fn build(self) -> anyhow::Result<WorkerPool<P, B, R, S, W>> {
        let processor = self
            .processor
            .ok_or_else(|| anyhow::anyhow!("processor dependency missing"))?;
        let broker = self
            .broker
            .ok_or_else(|| anyhow::anyhow!("broker dependency missing"))?;
        let registry = self
            .registry
            .ok_or_else(|| anyhow::anyhow!("registry dependency missing"))?;
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store dependency missing"))?;
        let directory = self
            .directory
            .ok_or_else(|| anyhow::anyhow!("directory dependency missing"))?;
        let events = self
            .events
            .ok_or_else(|| anyhow::anyhow!("events dependency missing"))?;

        Ok(WorkerPool::new(
            self.config,
            processor,
            broker,
            registry,
            store,
            directory,
            events,
        ))
    }
}
