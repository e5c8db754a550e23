use std::collections::BTreeMap;

use futures::future::join_all;
use tracing::{debug, warn};

use cadence_core::error::{CadenceError, Result};
use cadence_core::event::WorkflowEventKind;
use cadence_core::types::{ExecutorKind, MediaSet, StepInput, StepOutput};

use crate::context::RunContext;
use crate::node::Node;

/// Runs every child concurrently against the same input and waits for all of them.
#[derive(Debug, Clone)]
pub struct Parallel {
    pub name: String,
    pub description: Option<String>,
    pub steps: Vec<Node>,
}

impl Parallel {
    pub fn new(name: impl Into<String>, steps: Vec<Node>) -> Self {
        Self {
            name: name.into(),
            description: None,
            steps,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Children see identical inputs and nothing of each other's outputs.
    /// Every child runs to completion; there is no early return on failure.
    pub async fn execute(&self, input: StepInput, ctx: &RunContext) -> Result<StepOutput> {
        let children: Vec<String> = self.steps.iter().map(|c| c.name().to_string()).collect();
        debug!(step = %self.name, count = children.len(), "Starting parallel group");
        ctx.emit(WorkflowEventKind::ParallelStarted {
            step_name: self.name.clone(),
            children,
        })
        .await;

        let results = join_all(self.steps.iter().map(|child| {
            let input = input.clone();
            async move { (child.name(), child.execute(input, ctx).await) }
        }))
        .await;

        let mut outputs = BTreeMap::new();
        let mut fatal: Option<CadenceError> = None;
        for (name, result) in results {
            match result {
                Ok(output) => {
                    outputs.insert(name.to_string(), output);
                }
                Err(e) => {
                    warn!(step = %self.name, child = %name, error = %e, "Parallel child aborted");
                    // Cancellation outranks any other fatal error.
                    let replace = match &fatal {
                        None => true,
                        Some(existing) => {
                            matches!(e, CadenceError::Cancelled)
                                && !matches!(existing, CadenceError::Cancelled)
                        }
                    };
                    if replace {
                        fatal = Some(e);
                    }
                }
            }
        }
        if let Some(e) = fatal {
            return Err(e);
        }

        let output = self.aggregate(outputs);
        ctx.emit(WorkflowEventKind::ParallelCompleted {
            step_name: self.name.clone(),
            success: output.success,
        })
        .await;
        Ok(output)
    }

    fn aggregate(&self, outputs: BTreeMap<String, StepOutput>) -> StepOutput {
        let success = outputs.values().all(|o| o.success);
        let stop = outputs.values().any(|o| o.stop);

        let mut media = MediaSet::default();
        // Declaration order, not key order.
        for child in &self.steps {
            if let Some(output) = outputs.get(child.name()) {
                media.extend(&output.media);
            }
        }

        let error = if success {
            None
        } else {
            let failures: Vec<String> = self
                .steps
                .iter()
                .filter_map(|child| {
                    let output = outputs.get(child.name())?;
                    if output.success {
                        return None;
                    }
                    Some(format!(
                        "{}: {}",
                        child.name(),
                        output.error.as_deref().unwrap_or("failed")
                    ))
                })
                .collect();
            Some(format!(
                "Parallel {} failed: {}",
                self.name,
                failures.join("; ")
            ))
        };

        StepOutput {
            step_name: self.name.clone(),
            executor_type: ExecutorKind::Parallel,
            executor_name: self.name.clone(),
            content: None,
            parallel_step_outputs: Some(outputs),
            media,
            success,
            error,
            stop,
            ..StepOutput::empty()
        }
    }
}
