use std::sync::Arc;

use tracing::debug;

use cadence_core::error::{CadenceError, Result};
use cadence_core::event::WorkflowEventKind;
use cadence_core::types::{StepInput, StepOutput};

use crate::context::RunContext;
use crate::node::Node;

/// Picks one of a router's choices by name.
pub type Selector = Arc<dyn Fn(&StepInput) -> anyhow::Result<String> + Send + Sync>;

/// Dispatches to exactly one of its choices.
#[derive(Clone)]
pub struct Router {
    pub name: String,
    pub description: Option<String>,
    pub choices: Vec<Node>,
    selector: Selector,
}

impl Router {
    pub fn new<F, S>(name: impl Into<String>, selector: F, choices: Vec<Node>) -> Self
    where
        F: Fn(&StepInput) -> anyhow::Result<S> + Send + Sync + 'static,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            description: None,
            choices,
            selector: Arc::new(move |input: &StepInput| selector(input).map(Into::into)),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Resolve the selector's answer to one of the declared choices.
    pub fn select(&self, input: &StepInput) -> Result<&Node> {
        let selected = (self.selector)(input).map_err(|e| CadenceError::Evaluator {
            node: self.name.clone(),
            message: e.to_string(),
        })?;
        self.choices
            .iter()
            .find(|c| c.name() == selected)
            .ok_or_else(|| CadenceError::RouterMisconfigured {
                router: self.name.clone(),
                selected,
                choices: self
                    .choices
                    .iter()
                    .map(|c| c.name())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }

    /// The chosen child's output is returned unchanged.
    pub async fn execute(&self, input: StepInput, ctx: &RunContext) -> Result<StepOutput> {
        let choice = self.select(&input)?;
        debug!(step = %self.name, selected = %choice.name(), "Router selected choice");
        ctx.emit(WorkflowEventKind::RouterSelected {
            step_name: self.name.clone(),
            selected: choice.name().to_string(),
        })
        .await;
        choice.execute(input, ctx).await
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("name", &self.name)
            .field("choices", &self.choices)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use cadence_core::state::SessionState;
    use cadence_core::types::{Content, RunId, SessionId};

    use crate::step::Step;

    fn ctx() -> RunContext {
        RunContext::new(SessionId::new(), RunId::new(), SessionState::new())
    }

    fn branch(name: &'static str, calls: Arc<AtomicUsize>) -> Node {
        Step::from_fn(name, move |_input| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(StepOutput::content(name))
        })
        .into()
    }

    fn by_message(input: &StepInput) -> anyhow::Result<String> {
        Ok(match input.message_as_text().as_deref() {
            Some("a") => "branch_a".to_string(),
            Some("zzz") => "missing".to_string(),
            _ => "branch_b".to_string(),
        })
    }

    #[tokio::test]
    async fn test_exactly_one_choice_runs() {
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        let router = Router::new(
            "route",
            by_message,
            vec![branch("branch_a", a.clone()), branch("branch_b", b.clone())],
        );

        let out = router.execute(StepInput::new("a"), &ctx()).await.unwrap();
        assert_eq!(out.step_name, "branch_a");
        assert_eq!(out.content, Some(Content::from("branch_a")));
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_choice_is_misconfiguration() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = Router::new(
            "route",
            by_message,
            vec![branch("branch_a", calls.clone()), branch("branch_b", calls.clone())],
        );
        let err = router.execute(StepInput::new("zzz"), &ctx()).await.unwrap_err();
        match err {
            CadenceError::RouterMisconfigured { selected, choices, .. } => {
                assert_eq!(selected, "missing");
                assert_eq!(choices, "branch_a, branch_b");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_selector_error_is_evaluator_error() {
        let router = Router::new(
            "route",
            |_input: &StepInput| -> anyhow::Result<&'static str> { anyhow::bail!("no idea") },
            vec![branch("only", Arc::new(AtomicUsize::new(0)))],
        );
        let err = router.execute(StepInput::new("x"), &ctx()).await.unwrap_err();
        assert!(matches!(err, CadenceError::Evaluator { .. }));
    }
}
