//! Mock executors and fixtures shared by Cadence tests.
//!
//! Every mock implements [`Executor`] directly, so tests exercise the same
//! seam real agents plug into without touching a model.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde_json::Value;

use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::{Executor, ExecutorContext, StreamItem};
use cadence_core::types::{Content, ExecutorKind, StepInput, StepOutput};

/// The content a step would naturally build on: the previous output, or the
/// run's message for the first step.
pub fn upstream(input: &StepInput) -> Option<Content> {
    input
        .previous_step_content
        .clone()
        .or_else(|| input.message.clone())
}

/// Returns its upstream content unchanged.
#[derive(Debug, Clone)]
pub struct EchoExecutor {
    name: String,
    kind: ExecutorKind,
}

impl EchoExecutor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ExecutorKind::Function,
        }
    }

    /// Pretend to be an agent (or team) for metrics assertions.
    pub fn as_kind(mut self, kind: ExecutorKind) -> Self {
        self.kind = kind;
        self
    }
}

impl Executor for EchoExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ExecutorKind {
        self.kind
    }

    fn execute(&self, input: StepInput, _ctx: ExecutorContext) -> BoxFuture<'_, Result<StepOutput>> {
        Box::pin(async move {
            Ok(StepOutput {
                content: upstream(&input),
                metrics: Some(serde_json::json!({ "calls": 1 })),
                ..StepOutput::empty()
            })
        })
    }
}

/// Always errors with the given message.
#[derive(Debug, Clone)]
pub struct FailingExecutor {
    name: String,
    message: String,
}

impl FailingExecutor {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl Executor for FailingExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, _input: StepInput, ctx: ExecutorContext) -> BoxFuture<'_, Result<StepOutput>> {
        Box::pin(async move { Err(CadenceError::executor(ctx.step_name, self.message.clone())) })
    }
}

/// Returns fixed content and counts its invocations.
#[derive(Debug, Clone)]
pub struct CountingExecutor {
    name: String,
    content: Content,
    calls: Arc<AtomicUsize>,
}

impl CountingExecutor {
    pub fn new(name: impl Into<String>, content: impl Into<Content>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared counter; stays valid after the executor moves into a step.
    pub fn counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Executor for CountingExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, _input: StepInput, _ctx: ExecutorContext) -> BoxFuture<'_, Result<StepOutput>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let content = self.content.clone();
        Box::pin(async move { Ok(StepOutput::content(content)) })
    }
}

/// Adds one to its numeric upstream content (zero when absent).
#[derive(Debug, Clone)]
pub struct IncrementExecutor {
    name: String,
}

impl IncrementExecutor {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Executor for IncrementExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, input: StepInput, _ctx: ExecutorContext) -> BoxFuture<'_, Result<StepOutput>> {
        Box::pin(async move {
            let current = upstream(&input).and_then(|c| c.as_f64()).unwrap_or(0.0);
            Ok(StepOutput::content(current + 1.0))
        })
    }
}

/// Sleeps before answering. Useful for concurrency and cancellation tests.
#[derive(Debug, Clone)]
pub struct SlowExecutor {
    name: String,
    delay: Duration,
    content: Content,
}

impl SlowExecutor {
    pub fn new(name: impl Into<String>, delay: Duration, content: impl Into<Content>) -> Self {
        Self {
            name: name.into(),
            delay,
            content: content.into(),
        }
    }
}

impl Executor for SlowExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, _input: StepInput, _ctx: ExecutorContext) -> BoxFuture<'_, Result<StepOutput>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            Ok(StepOutput::content(self.content.clone()))
        })
    }
}

/// Streams each chunk as a partial, then the concatenation as the final output.
#[derive(Debug, Clone)]
pub struct StreamingExecutor {
    name: String,
    chunks: Vec<String>,
}

impl StreamingExecutor {
    pub fn new(name: impl Into<String>, chunks: &[&str]) -> Self {
        Self {
            name: name.into(),
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl Executor for StreamingExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Agent
    }

    fn execute(&self, _input: StepInput, _ctx: ExecutorContext) -> BoxFuture<'_, Result<StepOutput>> {
        let full = self.chunks.concat();
        Box::pin(async move { Ok(StepOutput::content(full)) })
    }

    fn execute_stream(
        &self,
        _input: StepInput,
        _ctx: ExecutorContext,
    ) -> BoxStream<'_, Result<StreamItem>> {
        let mut items: Vec<Result<StreamItem>> = self
            .chunks
            .iter()
            .map(|c| Ok(StreamItem::Partial(StepOutput::content(c.as_str()))))
            .collect();
        items.push(Ok(StreamItem::Final(StepOutput::content(self.chunks.concat()))));
        Box::pin(futures::stream::iter(items))
    }
}

/// Writes one key into the session state and reports what it wrote.
#[derive(Debug, Clone)]
pub struct StateWriterExecutor {
    name: String,
    key: String,
    value: Value,
}

impl StateWriterExecutor {
    pub fn new(name: impl Into<String>, key: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            value,
        }
    }
}

impl Executor for StateWriterExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, _input: StepInput, ctx: ExecutorContext) -> BoxFuture<'_, Result<StepOutput>> {
        Box::pin(async move {
            ctx.session_state.set(self.key.clone(), self.value.clone());
            Ok(StepOutput::content(format!("{}={}", self.key, self.value)))
        })
    }
}

/// Write `content` to a `config.toml` inside a fresh temp directory.
///
/// Keep the returned `TempDir` alive for as long as the path is used.
pub fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, content).expect("write config");
    (dir, path)
}
