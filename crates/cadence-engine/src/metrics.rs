use std::collections::BTreeMap;

use cadence_core::metrics::{StepMetrics, WorkflowMetrics};
use cadence_core::types::StepOutput;

/// Metrics for one output. Parallel outputs nest their children's metrics.
pub fn step_metrics(output: &StepOutput) -> StepMetrics {
    let parallel_steps = output.parallel_step_outputs.as_ref().map(|children| {
        children
            .iter()
            .map(|(name, child)| (name.clone(), step_metrics(child)))
            .collect::<BTreeMap<_, _>>()
    });
    StepMetrics {
        step_name: output.step_name.clone(),
        executor_type: output.executor_type,
        executor_name: output.executor_name.clone(),
        metrics: if parallel_steps.is_some() {
            None
        } else {
            output.metrics.clone()
        },
        parallel_steps,
        duration_ms: output.duration_ms,
    }
}

/// Build the workflow report from a run's top-level outputs.
///
/// Keyed by step name; `total_steps` counts outputs, so a name reported twice
/// keeps its latest entry but is counted twice.
pub fn aggregate(step_responses: &[StepOutput]) -> WorkflowMetrics {
    let mut steps = BTreeMap::new();
    for output in step_responses {
        steps.insert(output.step_name.clone(), step_metrics(output));
    }
    WorkflowMetrics {
        total_steps: step_responses.len(),
        steps,
    }
}
