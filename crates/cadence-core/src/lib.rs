pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod state;
pub mod traits;
pub mod types;

pub use config::EngineConfig;
pub use error::{CadenceError, Result};
pub use event::{EventBus, WorkflowEvent, WorkflowEventKind};
pub use metrics::{StepMetrics, WorkflowMetrics};
pub use state::SessionState;
pub use traits::{Executor, ExecutorContext, StreamItem, WorkflowStorage};
pub use types::*;
