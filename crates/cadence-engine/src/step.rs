use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tracing::{debug, warn};

use cadence_core::error::{CadenceError, Result};
use cadence_core::event::WorkflowEventKind;
use cadence_core::traits::{Executor, StreamItem};
use cadence_core::types::{ExecutorKind, StepInput, StepOutput};

use crate::context::RunContext;
use crate::executor::FnExecutor;

/// A leaf node: one executor invocation with retry, timeout and
/// skip-on-failure handling around it.
#[derive(Clone)]
pub struct Step {
    pub name: String,
    pub step_id: Option<String>,
    pub description: Option<String>,
    executor: Arc<dyn Executor>,
    max_retries: Option<u32>,
    timeout: Option<Duration>,
    skip_on_failure: bool,
}

impl Step {
    pub fn new<E: Executor>(name: impl Into<String>, executor: E) -> Self {
        Self::shared(name, Arc::new(executor))
    }

    /// Build a step around an executor that other steps may also use.
    pub fn shared(name: impl Into<String>, executor: Arc<dyn Executor>) -> Self {
        Self {
            name: name.into(),
            step_id: None,
            description: None,
            executor,
            max_retries: None,
            timeout: None,
            skip_on_failure: false,
        }
    }

    /// A step whose executor is a synchronous closure named after the step.
    pub fn from_fn<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&StepInput) -> Result<StepOutput> + Send + Sync + 'static,
    {
        let name = name.into();
        Self::new(name.clone(), FnExecutor::from_sync(name, func))
    }

    pub fn with_step_id(mut self, id: impl Into<String>) -> Self {
        self.step_id = Some(id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Retries after the first attempt. Overrides the engine default.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Per-attempt time limit. Overrides the engine default.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Report success with an explanatory content once all attempts fail.
    pub fn skip_on_failure(mut self) -> Self {
        self.skip_on_failure = true;
        self
    }

    pub fn executor_kind(&self) -> ExecutorKind {
        self.executor.kind()
    }

    pub fn executor_name(&self) -> &str {
        self.executor.name()
    }

    pub async fn execute(&self, input: StepInput, ctx: &RunContext) -> Result<StepOutput> {
        let max_retries = self.max_retries.unwrap_or(ctx.step_defaults().max_retries);
        let timeout = self.timeout.or_else(|| ctx.step_defaults().timeout());
        let started = Instant::now();
        let mut last_error = String::new();

        for attempt in 0..=max_retries {
            ctx.check_cancelled()?;
            match self.attempt(input.clone(), ctx, timeout).await {
                Ok(output) => return Ok(self.stamp(output, started)),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(
                        step = %self.name,
                        attempt = attempt + 1,
                        max_attempts = max_retries + 1,
                        error = %e,
                        "Step attempt failed"
                    );
                    last_error = failure_message(e);
                }
            }
        }

        let output = if self.skip_on_failure {
            debug!(step = %self.name, "Skipping failed step");
            StepOutput::content(format!(
                "Step {} failed but skipped: {}",
                self.name, last_error
            ))
        } else {
            StepOutput::failure(&self.name, last_error)
        };
        Ok(self.stamp(output, started))
    }

    async fn attempt(
        &self,
        input: StepInput,
        ctx: &RunContext,
        timeout: Option<Duration>,
    ) -> Result<StepOutput> {
        let invocation = async {
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, self.invoke(input, ctx)).await {
                    Ok(result) => result,
                    Err(_) => Err(CadenceError::Timeout {
                        step: self.name.clone(),
                        timeout: limit,
                    }),
                },
                None => self.invoke(input, ctx).await,
            }
        };

        tokio::select! {
            biased;
            _ = ctx.cancel_token().cancelled() => Err(CadenceError::Cancelled),
            result = invocation => result,
        }
    }

    async fn invoke(&self, input: StepInput, ctx: &RunContext) -> Result<StepOutput> {
        let exec_ctx = ctx.executor_context(&self.name);
        if !ctx.is_streaming() {
            return self.executor.execute(input, exec_ctx).await;
        }

        let mut stream = self.executor.execute_stream(input, exec_ctx);
        while let Some(item) = stream.next().await {
            match item? {
                StreamItem::Partial(partial) => {
                    if let Some(delta) = partial.content {
                        ctx.emit(WorkflowEventKind::StepContentDelta {
                            step_name: self.name.clone(),
                            delta,
                        })
                        .await;
                    }
                }
                StreamItem::Final(output) => return Ok(output),
            }
        }
        Err(CadenceError::executor(
            &self.name,
            "executor stream ended without a final output",
        ))
    }

    fn stamp(&self, mut output: StepOutput, started: Instant) -> StepOutput {
        output.step_name = self.name.clone();
        if output.step_id.is_none() {
            output.step_id = self.step_id.clone();
        }
        output.executor_type = self.executor.kind();
        output.executor_name = self.executor.name().to_string();
        output.duration_ms = Some(started.elapsed().as_millis() as u64);
        if !output.success && output.error.is_none() {
            output.error = Some(format!("Step {} failed", self.name));
        }
        output
    }
}

fn failure_message(e: CadenceError) -> String {
    match e {
        CadenceError::Executor { message, .. } => message,
        CadenceError::Timeout { timeout, .. } => {
            format!("timed out after {}s", timeout.as_secs_f64())
        }
        other => other.to_string(),
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("executor", &self.executor.name())
            .field("kind", &self.executor.kind())
            .field("max_retries", &self.max_retries)
            .field("timeout", &self.timeout)
            .field("skip_on_failure", &self.skip_on_failure)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use cadence_core::config::StepConfig;
    use cadence_core::state::SessionState;
    use cadence_core::types::{Content, RunId, SessionId};
    use futures::stream::BoxStream;
    use tokio::sync::mpsc;

    fn ctx() -> RunContext {
        RunContext::new(SessionId::new(), RunId::new(), SessionState::new())
    }

    fn flaky(fail_times: u32) -> (Step, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let step = Step::from_fn("flaky", move |_input| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < fail_times {
                Err(CadenceError::executor("flaky", format!("attempt {} broke", n + 1)))
            } else {
                Ok(StepOutput::content("recovered"))
            }
        });
        (step, calls)
    }

    #[tokio::test]
    async fn test_stamps_identity() {
        let step = Step::new(
            "research",
            FnExecutor::from_sync("researcher", |_input| Ok(StepOutput::content("notes")))
                .with_kind(ExecutorKind::Agent),
        )
        .with_step_id("r-1");

        let out = step.execute(StepInput::new("topic"), &ctx()).await.unwrap();
        assert_eq!(out.step_name, "research");
        assert_eq!(out.step_id.as_deref(), Some("r-1"));
        assert_eq!(out.executor_type, ExecutorKind::Agent);
        assert_eq!(out.executor_name, "researcher");
        assert!(out.duration_ms.is_some());
    }

    #[tokio::test]
    async fn test_executor_error_becomes_failed_output() {
        let (step, calls) = flaky(u32::MAX);
        let out = step.execute(StepInput::default(), &ctx()).await.unwrap();
        assert!(!out.success);
        assert_eq!(out.error.as_deref(), Some("attempt 1 broke"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let (step, calls) = flaky(2);
        let out = step
            .with_max_retries(2)
            .execute(StepInput::default(), &ctx())
            .await
            .unwrap();
        assert!(out.success);
        assert_eq!(out.content, Some(Content::from("recovered")));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_default_comes_from_config() {
        let (step, calls) = flaky(1);
        let ctx = ctx().with_step_defaults(StepConfig {
            max_retries: 1,
            timeout_secs: None,
        });
        let out = step.execute(StepInput::default(), &ctx).await.unwrap();
        assert!(out.success);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_skip_on_failure() {
        let (step, _) = flaky(u32::MAX);
        let out = step
            .skip_on_failure()
            .execute(StepInput::default(), &ctx())
            .await
            .unwrap();
        assert!(out.success);
        assert_eq!(
            out.content,
            Some(Content::from("Step flaky failed but skipped: attempt 1 broke"))
        );
    }

    #[tokio::test]
    async fn test_timeout_fails_step() {
        let slow = FnExecutor::new("sleepy", |_input, _ctx| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(StepOutput::content("late"))
        });
        let step = Step::new("slow", slow).with_timeout(Duration::from_millis(20));
        let out = step.execute(StepInput::default(), &ctx()).await.unwrap();
        assert!(!out.success);
        assert_eq!(out.error.as_deref(), Some("timed out after 0.02s"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_subsecond_precision() {
        let slow = FnExecutor::new("sleepy", |_input, _ctx| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(StepOutput::content("late"))
        });
        let step = Step::new("slow", slow).with_timeout(Duration::from_millis(1500));
        let out = step.execute(StepInput::default(), &ctx()).await.unwrap();
        assert_eq!(out.error.as_deref(), Some("timed out after 1.5s"));

        let err = CadenceError::Timeout {
            step: "slow".into(),
            timeout: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "Step slow timed out after 1.5s");
    }

    #[tokio::test]
    async fn test_cancel_interrupts_executor() {
        let slow = FnExecutor::new("sleepy", |_input, _ctx| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(StepOutput::content("late"))
        });
        let step = Step::new("slow", slow);
        let ctx = ctx();
        let token = ctx.cancel_token().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });
        let err = step.execute(StepInput::default(), &ctx).await.unwrap_err();
        assert!(matches!(err, CadenceError::Cancelled));
    }

    struct Chunked;

    impl Executor for Chunked {
        fn name(&self) -> &str {
            "chunked"
        }

        fn execute(
            &self,
            _input: StepInput,
            _ctx: cadence_core::traits::ExecutorContext,
        ) -> futures::future::BoxFuture<'_, Result<StepOutput>> {
            Box::pin(async { Ok(StepOutput::content("ab")) })
        }

        fn execute_stream(
            &self,
            _input: StepInput,
            _ctx: cadence_core::traits::ExecutorContext,
        ) -> BoxStream<'_, Result<StreamItem>> {
            Box::pin(futures::stream::iter(vec![
                Ok(StreamItem::Partial(StepOutput::content("a"))),
                Ok(StreamItem::Partial(StepOutput::content("b"))),
                Ok(StreamItem::Final(StepOutput::content("ab"))),
            ]))
        }
    }

    #[tokio::test]
    async fn test_streaming_emits_deltas_then_final() {
        let (tx, mut rx) = mpsc::channel(16);
        let ctx = ctx().with_events(tx);
        let out = Step::new("stream", Chunked)
            .execute(StepInput::default(), &ctx)
            .await
            .unwrap();
        drop(ctx);

        assert_eq!(out.content, Some(Content::from("ab")));
        let mut deltas = vec![];
        while let Some(event) = rx.recv().await {
            if let WorkflowEventKind::StepContentDelta { delta, .. } = event.kind {
                deltas.push(delta);
            }
        }
        assert_eq!(deltas, vec![Content::from("a"), Content::from("b")]);
    }
}
