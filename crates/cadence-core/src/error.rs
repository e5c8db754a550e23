use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CadenceError {
    // Node errors
    #[error("Executor failed in step {step}: {message}")]
    Executor { step: String, message: String },

    #[error("Evaluator failed in {node}: {message}")]
    Evaluator { node: String, message: String },

    #[error("Router {router} selected '{selected}', which is not one of its choices ({choices})")]
    RouterMisconfigured {
        router: String,
        selected: String,
        choices: String,
    },

    #[error("Step {step} timed out after {}s", .timeout.as_secs_f64())]
    Timeout { step: String, timeout: Duration },

    #[error("Workflow run cancelled")]
    Cancelled,

    // Definition errors
    #[error("Duplicate step name in workflow: {0}")]
    DuplicateStepName(String),

    #[error("Invalid workflow: {0}")]
    InvalidWorkflow(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // Runtime errors
    #[error("Runtime error: {0}")]
    Runtime(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CadenceError {
    /// Shorthand for an executor failure with a plain message.
    pub fn executor(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Executor {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Errors that abort the whole run rather than being folded into a StepOutput.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Evaluator { .. }
                | Self::RouterMisconfigured { .. }
                | Self::Cancelled
                | Self::DuplicateStepName(_)
                | Self::InvalidWorkflow(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CadenceError>;
