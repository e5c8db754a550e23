use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use cadence_core::error::Result;
use cadence_core::traits::{Executor, ExecutorContext};
use cadence_core::types::{ExecutorKind, StepInput, StepOutput};

type ExecFn =
    Arc<dyn Fn(StepInput, ExecutorContext) -> BoxFuture<'static, Result<StepOutput>> + Send + Sync>;

/// An [`Executor`] backed by a closure.
///
/// Agents and teams are usually adapted through this as well, with
/// [`FnExecutor::with_kind`] recording what actually ran.
#[derive(Clone)]
pub struct FnExecutor {
    name: String,
    kind: ExecutorKind,
    func: ExecFn,
}

impl FnExecutor {
    /// Wrap an async closure.
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(StepInput, ExecutorContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<StepOutput>> + Send + 'static,
    {
        Self {
            name: name.into(),
            kind: ExecutorKind::Function,
            func: Arc::new(
                move |input: StepInput, ctx: ExecutorContext| -> BoxFuture<'static, Result<StepOutput>> {
                    Box::pin(func(input, ctx))
                },
            ),
        }
    }

    /// Wrap a synchronous closure.
    pub fn from_sync<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&StepInput) -> Result<StepOutput> + Send + Sync + 'static,
    {
        let func = Arc::new(func);
        Self::new(name, move |input: StepInput, _ctx: ExecutorContext| {
            let func = func.clone();
            async move { func(&input) }
        })
    }

    pub fn with_kind(mut self, kind: ExecutorKind) -> Self {
        self.kind = kind;
        self
    }
}

impl std::fmt::Debug for FnExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnExecutor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

impl Executor for FnExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ExecutorKind {
        self.kind
    }

    fn execute(&self, input: StepInput, ctx: ExecutorContext) -> BoxFuture<'_, Result<StepOutput>> {
        (self.func)(input, ctx)
    }
}
