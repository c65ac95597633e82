use std::any::type_name;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;

use crate::broker::{Broker, Delivery, DeliveryToken};
use crate::config::WorkerPoolConfig;
use crate::events::{EventPublisher, JobEvent, JobEventPayload};
use crate::job::{JobArtifacts, JobId, JobOutcome, JobState, Progress};
use crate::liveness::WorkerDirectory;
use crate::processor::{
    progress_channel, DocumentProcessor, ExecutionContext, ExecutionInterrupted, InterruptFlag,
    ProgressReceiver,
};
use crate::registry::{JobRegistry, StartDisposition};
use crate::store::ResultStore;
use crate::telemetry;

use super::config::WorkerConfig;

/// Token for signaling graceful shutdown to workers.
#[derive(Clone, Debug)]
pub struct ShutdownToken {
    inner: Arc<ShutdownTokenInner>,
}

#[derive(Debug)]
struct ShutdownTokenInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl ShutdownToken {
    /// Create a new shutdown token.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ShutdownTokenInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Check if cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until cancelled.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Interest is registered before the flag check so a concurrent
        // cancel is not missed.
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Pool of long-lived workers pulling jobs from the broker.
///
/// Each worker holds at most one unacknowledged delivery at a time: it
/// dequeues a descriptor, claims the registry entry, runs the processing
/// callback on its own task, resolves the terminal state, and only then
/// acknowledges the delivery. A worker that dies mid-job therefore leaves
/// the delivery behind for the broker to hand out again.
pub struct WorkerPool<P, B, R, S, W>
where
    P: DocumentProcessor + 'static,
    B: Broker + 'static,
    R: JobRegistry + 'static,
    S: ResultStore + 'static,
    W: WorkerDirectory + 'static,
{
    config: WorkerPoolConfig,
    processor: Arc<P>,
    broker: Arc<B>,
    registry: Arc<R>,
    store: Arc<S>,
    directory: Arc<W>,
    events: Arc<dyn EventPublisher>,
    shutdown_token: ShutdownToken,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<P, B, R, S, W> fmt::Debug for WorkerPool<P, B, R, S, W>
where
    P: DocumentProcessor + 'static,
    B: Broker + 'static,
    R: JobRegistry + 'static,
    S: ResultStore + 'static,
    W: WorkerDirectory + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let worker_count = self
            .worker_handles
            .try_lock()
            .map(|handles| handles.len())
            .unwrap_or_default();

        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("processor_type", &type_name::<P>())
            .field("broker_type", &type_name::<B>())
            .field("registry_type", &type_name::<R>())
            .field("store_type", &type_name::<S>())
            .field("directory_type", &type_name::<W>())
            .field("worker_count", &worker_count)
            .field("shutdown_cancelled", &self.shutdown_token.is_cancelled())
            .finish()
    }
}

impl<P, B, R, S, W> WorkerPool<P, B, R, S, W>
where
    P: DocumentProcessor + 'static,
    B: Broker + 'static,
    R: JobRegistry + 'static,
    S: ResultStore + 'static,
    W: WorkerDirectory + 'static,
{
    /// Create a new pool with the given components.
    pub fn new(
        config: WorkerPoolConfig,
        processor: Arc<P>,
        broker: Arc<B>,
        registry: Arc<R>,
        store: Arc<S>,
        directory: Arc<W>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            config,
            processor,
            broker,
            registry,
            store,
            directory,
            events,
            shutdown_token: ShutdownToken::new(),
            worker_handles: Mutex::new(Vec::new()),
        }
    }

    /// Get the pool configuration.
    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    /// Get a clone of the broker.
    pub fn broker(&self) -> Arc<B> {
        Arc::clone(&self.broker)
    }

    /// Get a clone of the registry.
    pub fn registry(&self) -> Arc<R> {
        Arc::clone(&self.registry)
    }

    /// Get a clone of the result store.
    pub fn store(&self) -> Arc<S> {
        Arc::clone(&self.store)
    }

    /// Get a clone of the worker directory.
    pub fn directory(&self) -> Arc<W> {
        Arc::clone(&self.directory)
    }

    /// Get a clone of the event publisher.
    pub fn events(&self) -> Arc<dyn EventPublisher> {
        Arc::clone(&self.events)
    }

    /// Get a clone of the shutdown token.
    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown_token.clone()
    }

    /// Spawn the configured number of workers.
    pub async fn start(&self) {
        let worker_group = format!("docket-{}", std::process::id());

        for i in 0..self.config.concurrency {
            let worker = WorkerConfig::new(format!("{}-w{}", worker_group, i))
                .with_poll_interval(self.config.poll_interval_ms)
                .with_heartbeat_interval(self.config.heartbeat_interval_ms);
            let processor = Arc::clone(&self.processor);
            let broker = Arc::clone(&self.broker);
            let registry = Arc::clone(&self.registry);
            let store = Arc::clone(&self.store);
            let directory = Arc::clone(&self.directory);
            let events = Arc::clone(&self.events);
            let shutdown = self.shutdown_token.clone();

            let handle = tokio::spawn(async move {
                Self::worker_loop(
                    worker, processor, broker, registry, store, directory, events, shutdown,
                )
                .await;
            });

            let mut handles = self.worker_handles.lock().await;
            handles.push(handle);
        }

        tracing::info!(workers = self.config.concurrency, "worker pool started");
    }

    /// Gracefully shut down the pool.
    ///
    /// Workers stop dequeuing immediately; jobs already in flight get the
    /// configured drain window to finish. A worker still busy when the
    /// window closes is aborted, leaving its delivery unacknowledged so the
    /// broker redelivers the job later.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        tracing::info!("draining worker pool");

        self.shutdown_token.cancel();

        let handles = {
            let mut guard = self.worker_handles.lock().await;
            std::mem::take(&mut *guard)
        };
        let abort_handles: Vec<_> = handles.iter().map(|handle| handle.abort_handle()).collect();

        let drain = futures::future::join_all(handles);
        match tokio::time::timeout(self.config.drain_timeout(), drain).await {
            Ok(results) => {
                for result in results {
                    if let Err(err) = result {
                        tracing::warn!("worker task failed: {err:?}");
                    }
                }
            }
            Err(_) => {
                tracing::warn!("drain window closed with jobs still in flight, aborting workers");
                for abort in abort_handles {
                    abort.abort();
                }
            }
        }

        tracing::info!("worker pool drained");
        Ok(())
    }

    async fn worker_loop(
        worker: WorkerConfig,
        processor: Arc<P>,
        broker: Arc<B>,
        registry: Arc<R>,
        store: Arc<S>,
        directory: Arc<W>,
        events: Arc<dyn EventPublisher>,
        shutdown: ShutdownToken,
    ) {
        tracing::info!(worker_id = %worker.worker_id, "worker started");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match broker.dequeue(&worker.worker_id).await {
                Ok(Some(delivery)) => {
                    if let Ok(depth) = broker.depth().await {
                        telemetry::set_queue_depth(depth);
                    }
                    Self::process_delivery(
                        &worker, &processor, &broker, &registry, &store, &directory, &events,
                        delivery,
                    )
                    .await;
                }
                Ok(None) => {
                    if let Err(err) = directory.heartbeat(&worker.worker_id, None).await {
                        tracing::warn!(worker_id = %worker.worker_id, "heartbeat failed: {err:#}");
                    }
                    tokio::select! {
                        _ = shutdown.cancelled() => {}
                        _ = tokio::time::sleep(worker.poll_interval()) => {}
                    }
                }
                Err(err) => {
                    tracing::warn!(worker_id = %worker.worker_id, "dequeue error: {err:#}");
                    tokio::select! {
                        _ = shutdown.cancelled() => {}
                        _ = tokio::time::sleep(worker.poll_interval()) => {}
                    }
                }
            }
        }

        if let Err(err) = directory.deregister(&worker.worker_id).await {
            tracing::warn!(worker_id = %worker.worker_id, "deregister failed: {err:#}");
        }
        tracing::info!(worker_id = %worker.worker_id, "worker stopped");
    }

    /// Run one delivery end to end: claim, execute, resolve, acknowledge.
    ///
    /// Every early return before the ack leaves the delivery unacknowledged
    /// on purpose; redelivery is the recovery path for lost attempts.
    #[allow(clippy::too_many_arguments)]
    async fn process_delivery(
        worker: &WorkerConfig,
        processor: &Arc<P>,
        broker: &Arc<B>,
        registry: &Arc<R>,
        store: &Arc<S>,
        directory: &Arc<W>,
        events: &Arc<dyn EventPublisher>,
        delivery: Delivery,
    ) {
        let Delivery {
            token,
            descriptor,
            redelivered,
        } = delivery;
        let job_id = descriptor.id;

        if redelivered {
            telemetry::record_job_redelivered(job_id);
        }

        let disposition = match registry.try_start(job_id, &worker.worker_id).await {
            Ok(disposition) => disposition,
            Err(err) => {
                tracing::error!(job_id = %job_id, "claim failed: {err:#}");
                return;
            }
        };
        if let StartDisposition::AlreadyFinished(record) = disposition {
            // Cancelled while queued, or a duplicate of a finished job.
            tracing::debug!(
                job_id = %job_id,
                state = %record.state,
                "dropping delivery for a finished job"
            );
            Self::ack(broker, job_id, token).await;
            return;
        }

        Self::publish(
            events,
            job_id,
            JobEventPayload::Started {
                worker_id: worker.worker_id.clone(),
            },
        )
        .await;

        let (progress_tx, progress_rx) = progress_channel();
        let interrupt = InterruptFlag::new();
        let ctx = ExecutionContext::new(job_id, progress_tx, interrupt.clone());

        let (stop_tx, stop_rx) = mpsc::channel::<()>(1);
        let watch = tokio::spawn(Self::watch_job(
            worker.worker_id.clone(),
            worker.heartbeat_interval(),
            job_id,
            Arc::clone(registry),
            Arc::clone(directory),
            Arc::clone(events),
            progress_rx,
            interrupt,
            stop_rx,
        ));

        let timing = telemetry::record_job_start(job_id);
        // The callback runs on its own task so a panic is contained as a
        // failed job instead of taking the worker down.
        let processing = tokio::spawn({
            let processor = Arc::clone(processor);
            telemetry::instrument_execute(job_id, worker.worker_id.clone(), async move {
                processor.process(descriptor, ctx).await
            })
        });
        let joined = processing.await;

        let _ = stop_tx.try_send(());
        let _ = watch.await;

        let resolved = match joined {
            Ok(Ok(artifacts)) => {
                Self::resolve_success(broker, registry, store, events, job_id, token, artifacts)
                    .await
            }
            Ok(Err(err)) if err.downcast_ref::<ExecutionInterrupted>().is_some() => {
                Self::resolve_interruption(broker, registry, events, job_id, token).await
            }
            Ok(Err(err)) => {
                Self::resolve_failure(
                    broker,
                    registry,
                    store,
                    events,
                    job_id,
                    token,
                    format!("{err:#}"),
                )
                .await
            }
            Err(join_err) if join_err.is_panic() => {
                let detail = format!("panic: {}", panic_message(join_err));
                Self::resolve_failure(broker, registry, store, events, job_id, token, detail).await
            }
            Err(join_err) => {
                tracing::warn!(job_id = %job_id, "processing task cancelled: {join_err}");
                None
            }
        };

        match resolved {
            Some(state) => {
                telemetry::record_job_finished(job_id, state.as_str());
                telemetry::record_job_end(timing, state.as_str());
            }
            None => {
                tracing::warn!(
                    job_id = %job_id,
                    "job attempt unresolved, leaving delivery for redelivery"
                );
            }
        }
    }

    /// Companion task for one executing job: heartbeats the directory,
    /// applies progress updates, and watches for a cancellation request.
    #[allow(clippy::too_many_arguments)]
    async fn watch_job(
        worker_id: String,
        heartbeat_interval: Duration,
        job_id: JobId,
        registry: Arc<R>,
        directory: Arc<W>,
        events: Arc<dyn EventPublisher>,
        mut progress_rx: ProgressReceiver,
        interrupt: InterruptFlag,
        mut stop_rx: mpsc::Receiver<()>,
    ) {
        let mut beat = tokio::time::interval(heartbeat_interval);
        let mut progress_open = true;

        loop {
            tokio::select! {
                _ = stop_rx.recv() => break,
                update = progress_rx.recv(), if progress_open => match update {
                    Some(progress) => {
                        Self::apply_progress(&registry, &events, job_id, progress).await;
                    }
                    None => progress_open = false,
                },
                _ = beat.tick() => {
                    if let Err(err) = directory.heartbeat(&worker_id, Some(job_id)).await {
                        tracing::warn!(worker_id = %worker_id, "heartbeat failed: {err:#}");
                    }
                    match registry.get(job_id).await {
                        Ok(Some(record)) if record.cancel_requested => interrupt.set(),
                        Ok(_) => {}
                        Err(err) => {
                            tracing::warn!(job_id = %job_id, "cancel poll failed: {err:#}");
                        }
                    }
                }
            }
        }

        // Updates sent before the stop signal still count.
        while let Ok(progress) = progress_rx.try_recv() {
            Self::apply_progress(&registry, &events, job_id, progress).await;
        }
    }

    async fn apply_progress(
        registry: &Arc<R>,
        events: &Arc<dyn EventPublisher>,
        job_id: JobId,
        progress: Progress,
    ) {
        match registry.record_progress(job_id, progress).await {
            Ok(true) => {
                Self::publish(
                    events,
                    job_id,
                    JobEventPayload::Progressed {
                        n: progress.n,
                        total: progress.total,
                    },
                )
                .await;
            }
            Ok(false) => {
                tracing::debug!(job_id = %job_id, n = progress.n, "stale progress update dropped");
            }
            Err(err) => {
                tracing::warn!(job_id = %job_id, "progress write failed: {err:#}");
            }
        }
    }

    async fn resolve_success(
        broker: &Arc<B>,
        registry: &Arc<R>,
        store: &Arc<S>,
        events: &Arc<dyn EventPublisher>,
        job_id: JobId,
        token: DeliveryToken,
        artifacts: JobArtifacts,
    ) -> Option<JobState> {
        // The outcome must be durable before the registry advertises it.
        let outcome_ref = match store
            .put_outcome(job_id, JobOutcome::Success { artifacts })
            .await
        {
            Ok(outcome_ref) => outcome_ref,
            Err(err) => {
                tracing::error!(job_id = %job_id, "outcome write failed: {err:#}");
                return None;
            }
        };
        if let Err(err) = registry.complete(job_id, outcome_ref).await {
            tracing::error!(job_id = %job_id, "complete transition failed: {err:#}");
            return None;
        }
        Self::publish(events, job_id, JobEventPayload::Succeeded).await;
        Self::ack(broker, job_id, token).await;
        Some(JobState::Succeeded)
    }

    async fn resolve_failure(
        broker: &Arc<B>,
        registry: &Arc<R>,
        store: &Arc<S>,
        events: &Arc<dyn EventPublisher>,
        job_id: JobId,
        token: DeliveryToken,
        detail: String,
    ) -> Option<JobState> {
        tracing::warn!(job_id = %job_id, "job failed: {detail}");

        let outcome_ref = match store
            .put_outcome(
                job_id,
                JobOutcome::Failure {
                    detail: detail.clone(),
                },
            )
            .await
        {
            Ok(outcome_ref) => outcome_ref,
            Err(err) => {
                tracing::error!(job_id = %job_id, "failure outcome write failed: {err:#}");
                return None;
            }
        };
        if let Err(err) = registry.fail(job_id, &detail, outcome_ref).await {
            tracing::error!(job_id = %job_id, "fail transition failed: {err:#}");
            return None;
        }
        Self::publish(events, job_id, JobEventPayload::Failed { detail }).await;
        Self::ack(broker, job_id, token).await;
        Some(JobState::Failed)
    }

    async fn resolve_interruption(
        broker: &Arc<B>,
        registry: &Arc<R>,
        events: &Arc<dyn EventPublisher>,
        job_id: JobId,
        token: DeliveryToken,
    ) -> Option<JobState> {
        let cancel_requested = match registry.get(job_id).await {
            Ok(Some(record)) => record.cancel_requested,
            Ok(None) => false,
            Err(err) => {
                tracing::error!(job_id = %job_id, "cancel lookup failed: {err:#}");
                return None;
            }
        };
        if !cancel_requested {
            // Interrupted without a client cancellation; the attempt is
            // abandoned and the job redelivered.
            return None;
        }
        if let Err(err) = registry.acknowledge_cancel(job_id).await {
            tracing::error!(job_id = %job_id, "cancel acknowledgement failed: {err:#}");
            return None;
        }
        Self::publish(events, job_id, JobEventPayload::Cancelled).await;
        Self::ack(broker, job_id, token).await;
        Some(JobState::Cancelled)
    }

    async fn publish(events: &Arc<dyn EventPublisher>, job_id: JobId, payload: JobEventPayload) {
        if let Err(err) = events.publish(JobEvent::new(job_id, payload)).await {
            tracing::warn!(job_id = %job_id, "event publish failed: {err:#}");
        }
    }

    async fn ack(broker: &Arc<B>, job_id: JobId, token: DeliveryToken) {
        if let Err(err) = broker.ack(token).await {
            tracing::warn!(job_id = %job_id, "ack failed: {err:#}");
        }
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    match err.try_into_panic() {
        Ok(panic) => {
            if let Some(message) = panic.downcast_ref::<&'static str>() {
                (*message).to_owned()
            } else if let Some(message) = panic.downcast_ref::<String>() {
                message.clone()
            } else {
                "processing callback panicked".to_owned()
            }
        }
        Err(_) => "processing callback panicked".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use async_trait::async_trait;
    use tokio::time::timeout;

    use crate::events::InProcEventBus;
    use crate::job::{JobDescriptor, OutcomeHandle};
    use crate::liveness::InMemoryWorkerDirectory;
    use crate::registry::InMemoryJobRegistry;
    use crate::worker::builder::WorkerPoolBuilder;

    struct IdleBroker;

    #[async_trait]
    impl Broker for IdleBroker {
        async fn enqueue(&self, _descriptor: JobDescriptor) -> anyhow::Result<()> {
            Ok(())
        }

        async fn dequeue(&self, _worker_id: &str) -> anyhow::Result<Option<Delivery>> {
            Ok(None)
        }

        async fn ack(&self, _token: DeliveryToken) -> anyhow::Result<()> {
            bail!("broker not expected to see acks in an idle pool")
        }

        async fn discard_pending(&self, _id: JobId) -> anyhow::Result<bool> {
            Ok(false)
        }

        async fn depth(&self) -> anyhow::Result<usize> {
            Ok(0)
        }
    }

    struct EchoProcessor;

    #[async_trait]
    impl DocumentProcessor for EchoProcessor {
        async fn process(
            &self,
            job: JobDescriptor,
            _ctx: ExecutionContext,
        ) -> anyhow::Result<JobArtifacts> {
            Ok(JobArtifacts {
                primary: job.payload.clone(),
                secondary: job.payload,
            })
        }
    }

    struct NullStore;

    #[async_trait]
    impl ResultStore for NullStore {
        async fn put_outcome(
            &self,
            _id: JobId,
            _outcome: JobOutcome,
        ) -> anyhow::Result<OutcomeHandle> {
            bail!("store not expected to see outcomes in an idle pool")
        }

        async fn get_outcome(&self, _id: JobId) -> anyhow::Result<Option<JobOutcome>> {
            Ok(None)
        }
    }

    fn build_pool(
        config: WorkerPoolConfig,
        directory: Arc<InMemoryWorkerDirectory>,
    ) -> WorkerPool<EchoProcessor, IdleBroker, InMemoryJobRegistry, NullStore, InMemoryWorkerDirectory>
    {
        WorkerPoolBuilder::new(config)
            .with_processor(Arc::new(EchoProcessor))
            .with_broker(Arc::new(IdleBroker))
            .with_registry(Arc::new(InMemoryJobRegistry::new()))
            .with_store(Arc::new(NullStore))
            .with_directory(directory)
            .with_events(Arc::new(InProcEventBus::default()))
            .build()
            .expect("pool builds with all dependencies set")
    }

    fn quick_config(concurrency: usize) -> WorkerPoolConfig {
        WorkerPoolConfig {
            concurrency,
            poll_interval_ms: 10,
            heartbeat_interval_ms: 20,
            drain_timeout_seconds: 5,
        }
    }

    #[tokio::test]
    async fn test_shutdown_token_shared_state() {
        let token = ShutdownToken::new();
        let clone1 = token.clone();
        let clone2 = token.clone();

        token.cancel();

        assert!(clone1.is_cancelled());
        assert!(clone2.is_cancelled());

        // cancelled() should return immediately (not hang)
        timeout(Duration::from_secs(1), clone1.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_token_cancelled_wakes_clones() {
        let token = ShutdownToken::new();
        let clone1 = token.clone();
        let clone2 = token.clone();
        let clone3 = token.clone();

        let h1 = tokio::spawn(async move { clone1.cancelled().await });
        let h2 = tokio::spawn(async move { clone2.cancelled().await });
        let h3 = tokio::spawn(async move { clone3.cancelled().await });

        // Give waiters time to enter the wait
        tokio::time::sleep(Duration::from_millis(50)).await;

        token.cancel();

        let results = timeout(
            Duration::from_secs(5),
            futures::future::join_all(vec![h1, h2, h3]),
        )
        .await
        .expect("waiters did not observe cancellation within 5 seconds");

        for result in results {
            result.expect("waiter task panicked");
        }
    }

    #[tokio::test]
    async fn test_shutdown_token_default_not_cancelled() {
        let token = ShutdownToken::default();
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn test_idle_workers_heartbeat_into_the_directory() {
        let directory = Arc::new(InMemoryWorkerDirectory::new());
        let pool = build_pool(quick_config(2), Arc::clone(&directory));

        pool.start().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let snapshot = directory.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().all(|status| status.current_job.is_none()));

        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_graceful_shutdown_deregisters_workers() {
        let directory = Arc::new(InMemoryWorkerDirectory::new());
        let pool = build_pool(quick_config(3), Arc::clone(&directory));

        pool.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        timeout(Duration::from_secs(5), pool.shutdown())
            .await
            .expect("shutdown did not complete within 5 seconds")
            .expect("shutdown returned error");

        let snapshot = directory.snapshot().await.unwrap();
        assert!(snapshot.is_empty(), "workers should deregister on drain");
    }
}
