//! Workflow interpreter.
//!
//! A [`Workflow`] runs an ordered list of [`Node`]s. Each node consumes a
//! `StepInput` and produces a `StepOutput`, which is threaded into the next
//! node. Leaves are [`Step`]s wrapping an `Executor`; [`Steps`],
//! [`Condition`], [`Loop`], [`Parallel`] and [`Router`] compose them.

pub mod condition;
pub mod context;
pub mod executor;
pub mod handle;
pub mod looping;
pub mod metrics;
pub mod node;
pub mod parallel;
pub mod router;
pub mod step;
pub mod steps;
pub mod workflow;

pub use condition::{Condition, Evaluator};
pub use context::RunContext;
pub use executor::FnExecutor;
pub use handle::{BackgroundRun, WorkflowRunStream};
pub use looping::{EndCondition, Loop, LoopResult};
pub use node::{validate_nodes, Node};
pub use parallel::Parallel;
pub use router::{Router, Selector};
pub use step::Step;
pub use steps::Steps;
pub use workflow::{Workflow, WorkflowFn, WorkflowSteps};
