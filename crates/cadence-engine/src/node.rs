use std::collections::HashSet;
use std::time::Instant;

use futures::future::BoxFuture;
use tracing::debug;

use cadence_core::error::{CadenceError, Result};
use cadence_core::event::WorkflowEventKind;
use cadence_core::types::{ExecutorKind, StepInput, StepOutput};

use crate::condition::Condition;
use crate::context::RunContext;
use crate::looping::Loop;
use crate::parallel::Parallel;
use crate::router::Router;
use crate::step::Step;
use crate::steps::Steps;

/// One node of a workflow definition.
///
/// The set of node kinds is closed; every kind consumes a [`StepInput`] and
/// produces a [`StepOutput`].
#[derive(Debug, Clone)]
pub enum Node {
    Step(Step),
    Steps(Steps),
    Condition(Condition),
    Loop(Loop),
    Parallel(Parallel),
    Router(Router),
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Self::Step(n) => &n.name,
            Self::Steps(n) => &n.name,
            Self::Condition(n) => &n.name,
            Self::Loop(n) => &n.name,
            Self::Parallel(n) => &n.name,
            Self::Router(n) => &n.name,
        }
    }

    pub fn kind(&self) -> ExecutorKind {
        match self {
            Self::Step(n) => n.executor_kind(),
            Self::Steps(_) => ExecutorKind::Steps,
            Self::Condition(_) => ExecutorKind::Condition,
            Self::Loop(_) => ExecutorKind::Loop,
            Self::Parallel(_) => ExecutorKind::Parallel,
            Self::Router(_) => ExecutorKind::Router,
        }
    }

    /// Direct children, in declaration order.
    pub fn children(&self) -> &[Node] {
        match self {
            Self::Step(_) => &[],
            Self::Steps(n) => &n.steps,
            Self::Condition(n) => &n.steps,
            Self::Loop(n) => &n.steps,
            Self::Parallel(n) => &n.steps,
            Self::Router(n) => &n.choices,
        }
    }

    /// Execute this node.
    ///
    /// `Err` is reserved for run-fatal conditions (cancellation, evaluator
    /// and router misconfiguration). Ordinary failures come back as an
    /// output with `success == false`.
    pub fn execute<'a>(
        &'a self,
        input: StepInput,
        ctx: &'a RunContext,
    ) -> BoxFuture<'a, Result<StepOutput>> {
        Box::pin(async move {
            ctx.check_cancelled()?;
            let name = self.name();
            let kind = self.kind();
            debug!(step = %name, kind = %kind, "Executing node");
            ctx.emit(WorkflowEventKind::StepStarted {
                step_name: name.to_string(),
                kind,
            })
            .await;

            let started = Instant::now();
            let mut output = match self {
                Self::Step(n) => n.execute(input, ctx).await?,
                Self::Steps(n) => n.execute(input, ctx).await?,
                Self::Condition(n) => n.execute(input, ctx).await?,
                Self::Loop(n) => n.execute(input, ctx).await?,
                Self::Parallel(n) => n.execute(input, ctx).await?,
                Self::Router(n) => n.execute(input, ctx).await?,
            };
            // Composites that adopt a child's output report their own wall time.
            let adopted = !matches!(self, Self::Step(_)) && output.step_name == name;
            if output.duration_ms.is_none() || adopted {
                output.duration_ms = Some(started.elapsed().as_millis() as u64);
            }

            ctx.emit(WorkflowEventKind::StepCompleted {
                step_name: name.to_string(),
                success: output.success,
                content: output.content.clone(),
                error: output.error.clone(),
            })
            .await;
            Ok(output)
        })
    }

    fn validate(&self, seen: &mut HashSet<String>) -> Result<()> {
        let name = self.name();
        if name.trim().is_empty() {
            return Err(CadenceError::InvalidWorkflow(format!(
                "{} node has an empty name",
                self.kind()
            )));
        }
        if !seen.insert(name.to_string()) {
            return Err(CadenceError::DuplicateStepName(name.to_string()));
        }
        match self {
            Self::Loop(l) if l.max_iterations == 0 => {
                return Err(CadenceError::InvalidWorkflow(format!(
                    "loop '{}' must allow at least one iteration",
                    name
                )));
            }
            Self::Loop(l) if l.steps.is_empty() => {
                return Err(CadenceError::InvalidWorkflow(format!(
                    "loop '{}' has no steps",
                    name
                )));
            }
            Self::Parallel(p) if p.steps.is_empty() => {
                return Err(CadenceError::InvalidWorkflow(format!(
                    "parallel '{}' has no steps",
                    name
                )));
            }
            Self::Router(r) if r.choices.is_empty() => {
                return Err(CadenceError::InvalidWorkflow(format!(
                    "router '{}' has no choices",
                    name
                )));
            }
            _ => {}
        }
        for child in self.children() {
            child.validate(seen)?;
        }
        Ok(())
    }
}

/// Check a node tree before it is run: names are non-empty and unique across
/// the whole tree, loops can iterate, and fan-out/routing nodes have children.
pub fn validate_nodes(nodes: &[Node]) -> Result<()> {
    let mut seen = HashSet::new();
    for node in nodes {
        node.validate(&mut seen)?;
    }
    Ok(())
}

/// Output of a node that did no work: it forwards the previous content, or
/// the message when nothing ran before it.
pub(crate) fn passthrough(name: &str, kind: ExecutorKind, input: &StepInput) -> StepOutput {
    StepOutput {
        step_name: name.to_string(),
        executor_type: kind,
        executor_name: name.to_string(),
        content: input
            .previous_step_content
            .clone()
            .or_else(|| input.message.clone()),
        ..StepOutput::empty()
    }
}

impl From<Step> for Node {
    fn from(n: Step) -> Self {
        Self::Step(n)
    }
}

impl From<Steps> for Node {
    fn from(n: Steps) -> Self {
        Self::Steps(n)
    }
}

impl From<Condition> for Node {
    fn from(n: Condition) -> Self {
        Self::Condition(n)
    }
}

impl From<Loop> for Node {
    fn from(n: Loop) -> Self {
        Self::Loop(n)
    }
}

impl From<Parallel> for Node {
    fn from(n: Parallel) -> Self {
        Self::Parallel(n)
    }
}

impl From<Router> for Node {
    fn from(n: Router) -> Self {
        Self::Router(n)
    }
}
