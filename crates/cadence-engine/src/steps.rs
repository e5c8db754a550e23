use tracing::debug;

use cadence_core::error::Result;
use cadence_core::types::{ExecutorKind, MediaSet, StepInput, StepOutput};

use crate::context::RunContext;
use crate::node::{passthrough, Node};

/// An ordered group of nodes run one after another.
#[derive(Debug, Clone)]
pub struct Steps {
    pub name: String,
    pub description: Option<String>,
    pub steps: Vec<Node>,
}

impl Steps {
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

    pub async fn execute(&self, input: StepInput, ctx: &RunContext) -> Result<StepOutput> {
        run_as_group(&self.name, ExecutorKind::Steps, &self.steps, input, ctx).await
    }
}

/// How a sequence of nodes ended.
#[derive(Debug)]
pub(crate) enum Sequence {
    /// Every child ran. Carries the last output, the input the next node
    /// would see, and the media produced along the way.
    Completed {
        output: StepOutput,
        next: StepInput,
        produced: MediaSet,
    },
    /// A child failed or asked to stop; its output is returned unchanged.
    Halted(StepOutput),
    /// No children.
    Empty(StepInput),
}

/// Run `children` in order, threading each output into the next input.
pub(crate) async fn run_sequence(
    group: &str,
    children: &[Node],
    input: StepInput,
    ctx: &RunContext,
) -> Result<Sequence> {
    let mut current = input;
    let mut last = None;
    let mut produced = MediaSet::default();

    for (index, child) in children.iter().enumerate() {
        let output = child.execute(current.clone(), ctx).await?;
        if output.stop || !output.success {
            debug!(
                group = %group,
                step = %child.name(),
                index,
                stop = output.stop,
                success = output.success,
                "Sequence halted"
            );
            return Ok(Sequence::Halted(output));
        }
        current = current.chain(child.name(), &output);
        produced.extend(&output.media);
        last = Some(output);
    }

    Ok(match last {
        Some(output) => Sequence::Completed {
            output,
            next: current,
            produced,
        },
        None => Sequence::Empty(current),
    })
}

/// Run `children` as a unit named `name`: a completed run reports the last
/// output under the group's name together with all media its children
/// produced, a halted run reports the halting child as is.
pub(crate) async fn run_as_group(
    name: &str,
    kind: ExecutorKind,
    children: &[Node],
    input: StepInput,
    ctx: &RunContext,
) -> Result<StepOutput> {
    Ok(match run_sequence(name, children, input, ctx).await? {
        Sequence::Completed {
            mut output,
            produced,
            ..
        } => {
            output.step_name = name.to_string();
            output.media = produced;
            output
        }
        Sequence::Halted(output) => output,
        Sequence::Empty(input) => passthrough(name, kind, &input),
    })
}
