use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use cadence_core::config::StepConfig;
use cadence_core::error::{CadenceError, Result};
use cadence_core::event::{EventBus, WorkflowEvent, WorkflowEventKind};
use cadence_core::state::SessionState;
use cadence_core::traits::ExecutorContext;
use cadence_core::types::{RunId, SessionId};

/// Everything a node needs from the run it belongs to.
///
/// Cheap to clone: the session state, the cancellation token and the event
/// sinks are all shared handles.
#[derive(Debug, Clone)]
pub struct RunContext {
    session_id: SessionId,
    run_id: RunId,
    state: SessionState,
    cancel: CancellationToken,
    events: Option<mpsc::Sender<WorkflowEvent>>,
    bus: Option<Arc<EventBus>>,
    step_defaults: StepConfig,
}

impl RunContext {
    pub fn new(session_id: SessionId, run_id: RunId, state: SessionState) -> Self {
        Self {
            session_id,
            run_id,
            state,
            cancel: CancellationToken::new(),
            events: None,
            bus: None,
            step_defaults: StepConfig::default(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Attach the per-run streaming channel. Steps switch to streaming execution.
    pub fn with_events(mut self, tx: mpsc::Sender<WorkflowEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn with_bus(mut self, bus: Option<Arc<EventBus>>) -> Self {
        self.bus = bus;
        self
    }

    pub fn with_step_defaults(mut self, defaults: StepConfig) -> Self {
        self.step_defaults = defaults;
        self
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// The run's working copy of the session state.
    pub fn session_state(&self) -> &SessionState {
        &self.state
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn step_defaults(&self) -> &StepConfig {
        &self.step_defaults
    }

    pub fn is_streaming(&self) -> bool {
        self.events.is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(CadenceError::Cancelled);
        }
        Ok(())
    }

    /// Context handed to an executor running as `step_name`.
    pub fn executor_context(&self, step_name: &str) -> ExecutorContext {
        ExecutorContext {
            session_id: self.session_id.clone(),
            run_id: self.run_id.clone(),
            step_name: step_name.to_string(),
            session_state: self.state.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Publish an event to the bus and, in streaming mode, to the run's channel.
    ///
    /// The channel send waits for capacity. It gives up once the run is
    /// cancelled, and a dropped receiver is ignored.
    pub async fn emit(&self, kind: WorkflowEventKind) {
        if self.events.is_none() && self.bus.is_none() {
            return;
        }
        let event = WorkflowEvent {
            run_id: self.run_id.clone(),
            session_id: self.session_id.clone(),
            timestamp: Utc::now(),
            kind,
        };
        if let Some(bus) = &self.bus {
            bus.publish(event.clone());
        }
        if let Some(tx) = &self.events {
            tokio::select! {
                _ = tx.send(event) => {}
                _ = self.cancel.cancelled() => {}
            }
        }
    }

    /// Terminal events are delivered even after cancellation.
    pub(crate) async fn emit_terminal(&self, kind: WorkflowEventKind) {
        let event = WorkflowEvent {
            run_id: self.run_id.clone(),
            session_id: self.session_id.clone(),
            timestamp: Utc::now(),
            kind,
        };
        if let Some(bus) = &self.bus {
            bus.publish(event.clone());
        }
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }
}
