use std::sync::Arc;

use tracing::debug;

use cadence_core::error::{CadenceError, Result};
use cadence_core::event::WorkflowEventKind;
use cadence_core::types::{ExecutorKind, StepInput, StepOutput};

use crate::context::RunContext;
use crate::node::{passthrough, Node};
use crate::steps::run_as_group;

/// Predicate deciding whether a [`Condition`]'s steps run.
pub type Evaluator = Arc<dyn Fn(&StepInput) -> anyhow::Result<bool> + Send + Sync>;

/// Runs its steps as a group when the evaluator accepts the input; passes the
/// input through otherwise.
#[derive(Clone)]
pub struct Condition {
    pub name: String,
    pub description: Option<String>,
    pub steps: Vec<Node>,
    evaluator: Evaluator,
}

impl Condition {
    pub fn new<F>(name: impl Into<String>, evaluator: F, steps: Vec<Node>) -> Self
    where
        F: Fn(&StepInput) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: None,
            steps,
            evaluator: Arc::new(evaluator),
        }
    }

    /// A condition whose evaluator is a constant.
    pub fn constant(name: impl Into<String>, value: bool, steps: Vec<Node>) -> Self {
        Self::new(name, move |_input: &StepInput| Ok(value), steps)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Evaluate once against `input`.
    pub fn evaluate(&self, input: &StepInput) -> Result<bool> {
        (self.evaluator)(input).map_err(|e| CadenceError::Evaluator {
            node: self.name.clone(),
            message: e.to_string(),
        })
    }

    pub async fn execute(&self, input: StepInput, ctx: &RunContext) -> Result<StepOutput> {
        let result = self.evaluate(&input)?;
        debug!(step = %self.name, result, "Condition evaluated");
        ctx.emit(WorkflowEventKind::ConditionEvaluated {
            step_name: self.name.clone(),
            result,
        })
        .await;

        if !result {
            return Ok(passthrough(&self.name, ExecutorKind::Condition, &input));
        }
        run_as_group(&self.name, ExecutorKind::Condition, &self.steps, input, ctx).await
    }
}

impl std::fmt::Debug for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Condition")
            .field("name", &self.name)
            .field("steps", &self.steps)
            .finish_non_exhaustive()
    }
}
