use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Content, ExecutorKind, RunId, RunStatus, SessionId};

/// One entry in a run's ordered event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub run_id: RunId,
    pub session_id: SessionId,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: WorkflowEventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum WorkflowEventKind {
    RunStarted {
        workflow_name: String,
    },
    RunCompleted {
        content: Option<Content>,
        status: RunStatus,
    },
    RunCancelled,
    RunError {
        step_name: Option<String>,
        message: String,
    },
    StepStarted {
        step_name: String,
        kind: ExecutorKind,
    },
    StepContentDelta {
        step_name: String,
        delta: Content,
    },
    StepCompleted {
        step_name: String,
        success: bool,
        content: Option<Content>,
        error: Option<String>,
    },
    LoopIterationStarted {
        step_name: String,
        iteration: usize,
        max_iterations: usize,
    },
    LoopIterationCompleted {
        step_name: String,
        iteration: usize,
        should_continue: bool,
    },
    ParallelStarted {
        step_name: String,
        children: Vec<String>,
    },
    ParallelCompleted {
        step_name: String,
        success: bool,
    },
    ConditionEvaluated {
        step_name: String,
        result: bool,
    },
    RouterSelected {
        step_name: String,
        selected: String,
    },
}

impl WorkflowEventKind {
    /// Name of the node this event belongs to, if it is node-scoped.
    pub fn step_name(&self) -> Option<&str> {
        match self {
            Self::StepStarted { step_name, .. }
            | Self::StepContentDelta { step_name, .. }
            | Self::StepCompleted { step_name, .. }
            | Self::LoopIterationStarted { step_name, .. }
            | Self::LoopIterationCompleted { step_name, .. }
            | Self::ParallelStarted { step_name, .. }
            | Self::ParallelCompleted { step_name, .. }
            | Self::ConditionEvaluated { step_name, .. }
            | Self::RouterSelected { step_name, .. } => Some(step_name),
            Self::RunError { step_name, .. } => step_name.as_deref(),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::RunCompleted { .. } | Self::RunCancelled | Self::RunError { .. }
        )
    }
}

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events from every run.
#[derive(Debug)]
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: WorkflowEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<WorkflowEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: WorkflowEventKind) -> WorkflowEvent {
        WorkflowEvent {
            run_id: RunId::new(),
            session_id: SessionId::new(),
            timestamp: Utc::now(),
            kind,
        }
    }

    #[tokio::test]
    async fn test_bus_delivers_to_all_subscribers() {
        let bus = EventBus::new(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(event(WorkflowEventKind::RunCancelled));

        assert!(matches!(a.recv().await.unwrap().kind, WorkflowEventKind::RunCancelled));
        assert!(matches!(b.recv().await.unwrap().kind, WorkflowEventKind::RunCancelled));
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::default();
        bus.publish(event(WorkflowEventKind::RunCancelled));
    }

    #[test]
    fn test_event_serializes_flat_with_tag() {
        let e = event(WorkflowEventKind::StepStarted {
            step_name: "research".into(),
            kind: ExecutorKind::Agent,
        });
        let value = serde_json::to_value(&e).unwrap();
        assert_eq!(value["event"], "StepStarted");
        assert_eq!(value["step_name"], "research");
        assert_eq!(value["kind"], "agent");
        assert!(value.get("run_id").is_some());
        assert_eq!(e.kind.step_name(), Some("research"));
    }
}
