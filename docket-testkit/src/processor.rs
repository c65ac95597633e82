use async_trait::async_trait;
use docket::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Artifacts the [`ScriptedProcessor`] produces for a payload. Exposed so
/// tests can assert the exact bytes a job should hand back.
pub fn scripted_artifacts(payload: &[u8]) -> JobArtifacts {
    let mut primary = payload.to_vec();
    primary.extend_from_slice(b"::primary");
    let mut secondary = payload.to_vec();
    secondary.extend_from_slice(b"::secondary");
    JobArtifacts { primary, secondary }
}

/// Processor whose behavior is scripted through submission options.
///
/// With no options it reports progress `1..=steps` with a checkpoint before
/// every stage and succeeds with [`scripted_artifacts`]. Options override
/// that:
///
/// - `"steps"` (number): progress stages to report
/// - `"step_delay_ms"` (number): sleep per stage
/// - `"fail"` (string): fail with that detail before doing anything
/// - `"panic"` (string): panic with that message
/// - `"loop"` (any value): checkpoint and sleep forever; only a
///   cancellation observed at a checkpoint ends the job
#[derive(Clone, Debug)]
pub struct ScriptedProcessor {
    default_steps: u64,
    default_step_delay: Duration,
}

impl Default for ScriptedProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProcessor {
    pub fn new() -> Self {
        Self {
            default_steps: 3,
            default_step_delay: Duration::ZERO,
        }
    }

    pub fn with_steps(mut self, steps: u64) -> Self {
        self.default_steps = steps;
        self
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.default_step_delay = delay;
        self
    }
}

#[async_trait]
impl DocumentProcessor for ScriptedProcessor {
    async fn process(
        &self,
        job: JobDescriptor,
        ctx: ExecutionContext,
    ) -> anyhow::Result<JobArtifacts> {
        if let Some(detail) = job.options.get_str("fail") {
            anyhow::bail!("{detail}");
        }
        if let Some(message) = job.options.get_str("panic") {
            panic!("{message}");
        }
        if job.options.get("loop").is_some() {
            loop {
                ctx.checkpoint()?;
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }

        let steps = job
            .options
            .get("steps")
            .and_then(|v| v.as_u64())
            .unwrap_or(self.default_steps);
        let delay = job
            .options
            .get("step_delay_ms")
            .and_then(|v| v.as_u64())
            .map(Duration::from_millis)
            .unwrap_or(self.default_step_delay);

        for step in 1..=steps {
            ctx.checkpoint()?;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            ctx.report_progress(step, steps)?;
        }
        ctx.checkpoint()?;
        Ok(scripted_artifacts(&job.payload))
    }
}

/// One observed call into a [`RecordingProcessor`].
#[derive(Clone, Debug)]
pub struct ProcessorCall {
    pub job_id: JobId,
    pub payload_len: usize,
}

/// Wrapper that records every call before delegating to the inner
/// processor. Useful for asserting claim counts across redeliveries.
#[derive(Clone)]
pub struct RecordingProcessor<P> {
    inner: Arc<P>,
    calls: Arc<Mutex<Vec<ProcessorCall>>>,
}

impl<P> RecordingProcessor<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner: Arc::new(inner),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> Vec<ProcessorCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn assert_call_count_eq(&self, expected: usize) {
        let actual = self.call_count();
        assert_eq!(
            actual, expected,
            "Expected {expected} processor calls, got {actual}"
        );
    }
}

#[async_trait]
impl<P: DocumentProcessor> DocumentProcessor for RecordingProcessor<P> {
    async fn process(
        &self,
        job: JobDescriptor,
        ctx: ExecutionContext,
    ) -> anyhow::Result<JobArtifacts> {
        self.calls.lock().push(ProcessorCall {
            job_id: job.id,
            payload_len: job.payload.len(),
        });
        self.inner.process(job, ctx).await
    }
}
