use std::sync::Arc;

use tracing::{debug, info};

use cadence_core::error::{CadenceError, Result};
use cadence_core::event::WorkflowEventKind;
use cadence_core::types::{ExecutorKind, LoopState, LoopTermination, StepInput, StepOutput};

use crate::context::RunContext;
use crate::node::{passthrough, Node};
use crate::steps::{run_sequence, Sequence};

/// Predicate over every iteration's output so far; `true` ends the loop.
pub type EndCondition = Arc<dyn Fn(&[StepOutput]) -> anyhow::Result<bool> + Send + Sync>;

const DEFAULT_MAX_ITERATIONS: usize = 3;

/// Repeats its steps until the end condition holds or the iteration cap is hit.
#[derive(Clone)]
pub struct Loop {
    pub name: String,
    pub description: Option<String>,
    pub steps: Vec<Node>,
    pub max_iterations: usize,
    end_condition: Option<EndCondition>,
}

/// A finished loop: its result plus every iteration's output.
#[derive(Debug, Clone)]
pub struct LoopResult {
    pub output: StepOutput,
    pub iterations: Vec<StepOutput>,
    pub termination: LoopTermination,
}

impl Loop {
    pub fn new(name: impl Into<String>, steps: Vec<Node>) -> Self {
        Self {
            name: name.into(),
            description: None,
            steps,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            end_condition: None,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_end_condition<F>(mut self, end_condition: F) -> Self
    where
        F: Fn(&[StepOutput]) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.end_condition = Some(Arc::new(end_condition));
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub async fn execute(&self, input: StepInput, ctx: &RunContext) -> Result<StepOutput> {
        Ok(self.execute_loop(input, ctx).await?.output)
    }

    /// Run the loop and keep the per-iteration history.
    ///
    /// Each iteration after the first starts from the input the previous
    /// iteration's last step would have handed on. A failed or stopped
    /// iteration ends the loop immediately without consulting the end
    /// condition.
    pub async fn execute_loop(&self, input: StepInput, ctx: &RunContext) -> Result<LoopResult> {
        if self.max_iterations == 0 {
            return Err(CadenceError::InvalidWorkflow(format!(
                "loop '{}' must allow at least one iteration",
                self.name
            )));
        }

        let mut iterations: Vec<StepOutput> = Vec::new();
        let mut current = input;
        let mut iteration = 0;

        loop {
            iteration += 1;
            ctx.check_cancelled()?;
            debug!(step = %self.name, iteration, max = self.max_iterations, "Loop iteration");
            ctx.emit(WorkflowEventKind::LoopIterationStarted {
                step_name: self.name.clone(),
                iteration,
                max_iterations: self.max_iterations,
            })
            .await;

            let (output, next) = match run_sequence(&self.name, &self.steps, current, ctx).await? {
                Sequence::Completed { output, next, .. } => (output, next),
                Sequence::Halted(output) => {
                    info!(step = %self.name, iteration, "Loop interrupted");
                    ctx.emit(WorkflowEventKind::LoopIterationCompleted {
                        step_name: self.name.clone(),
                        iteration,
                        should_continue: false,
                    })
                    .await;
                    iterations.push(output.clone());
                    return Ok(self.finish(output, iterations, LoopState::Interrupted, iteration));
                }
                Sequence::Empty(next) => (passthrough(&self.name, ExecutorKind::Loop, &next), next),
            };
            iterations.push(output.clone());

            let converged = match &self.end_condition {
                Some(end) => end(&iterations).map_err(|e| CadenceError::Evaluator {
                    node: self.name.clone(),
                    message: e.to_string(),
                })?,
                None => false,
            };
            let should_continue = !converged && iteration < self.max_iterations;
            ctx.emit(WorkflowEventKind::LoopIterationCompleted {
                step_name: self.name.clone(),
                iteration,
                should_continue,
            })
            .await;

            if converged {
                debug!(step = %self.name, iteration, "Loop end condition met");
                return Ok(self.finish(output, iterations, LoopState::Converged, iteration));
            }
            if !should_continue {
                info!(step = %self.name, iterations = iteration, "Loop reached max iterations");
                return Ok(self.finish(output, iterations, LoopState::Exhausted, iteration));
            }
            current = next;
        }
    }

    fn finish(
        &self,
        mut output: StepOutput,
        iterations: Vec<StepOutput>,
        state: LoopState,
        count: usize,
    ) -> LoopResult {
        let termination = LoopTermination {
            state,
            iterations: count,
        };
        if state != LoopState::Interrupted {
            output.step_name = self.name.clone();
            output.executor_type = ExecutorKind::Loop;
            output.executor_name = self.name.clone();
        }
        output.loop_termination = Some(termination);
        LoopResult {
            output,
            iterations,
            termination,
        }
    }
}

impl std::fmt::Debug for Loop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loop")
            .field("name", &self.name)
            .field("max_iterations", &self.max_iterations)
            .field("has_end_condition", &self.end_condition.is_some())
            .field("steps", &self.steps)
            .finish()
    }
}
