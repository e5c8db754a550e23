use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use cadence_core::config::{EngineConfig, StepConfig};
use cadence_core::error::{CadenceError, Result};
use cadence_core::event::{EventBus, WorkflowEvent, WorkflowEventKind};
use cadence_core::state::SessionState;
use cadence_core::traits::WorkflowStorage;
use cadence_core::types::{
    Content, RunFailure, RunId, RunStatus, SessionId, SessionRecord, StepInput,
    WorkflowExecutionInput, WorkflowRun,
};

use crate::context::RunContext;
use crate::handle::{BackgroundRun, WorkflowRunStream};
use crate::metrics::aggregate;
use crate::node::{validate_nodes, Node};

/// Callback for workflows that bypass the node graph.
pub type WorkflowFn =
    Arc<dyn Fn(WorkflowExecutionInput, RunContext) -> BoxFuture<'static, Result<Content>> + Send + Sync>;

/// What a workflow runs: a node list or a single callback.
#[derive(Clone)]
pub enum WorkflowSteps {
    Nodes(Arc<Vec<Node>>),
    Function(WorkflowFn),
}

#[derive(Debug)]
struct SessionSlot {
    id: SessionId,
    state: SessionState,
    loaded: bool,
}

/// Top-level orchestrator.
///
/// Owns the session id and its committed state. Clones share the session,
/// so a clone handed to a background task sees the same state.
#[derive(Clone)]
pub struct Workflow {
    workflow_id: String,
    name: String,
    description: Option<String>,
    steps: WorkflowSteps,
    storage: Option<Arc<dyn WorkflowStorage>>,
    event_bus: Option<Arc<EventBus>>,
    step_defaults: StepConfig,
    event_buffer: usize,
    session: Arc<Mutex<SessionSlot>>,
    // Storage writes are read-modify-write on the whole session record
    persist_lock: Arc<tokio::sync::Mutex<()>>,
}

impl Workflow {
    pub fn new(name: impl Into<String>, steps: Vec<Node>) -> Self {
        Self::with_steps(name.into(), WorkflowSteps::Nodes(Arc::new(steps)))
    }

    /// A workflow driven by one async callback instead of a node graph.
    pub fn from_fn<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(WorkflowExecutionInput, RunContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Content>> + Send + 'static,
    {
        let func: WorkflowFn = Arc::new(
            move |input: WorkflowExecutionInput, ctx: RunContext| -> BoxFuture<'static, Result<Content>> {
                Box::pin(func(input, ctx))
            },
        );
        Self::with_steps(name.into(), WorkflowSteps::Function(func))
    }

    fn with_steps(name: String, steps: WorkflowSteps) -> Self {
        let defaults = EngineConfig::default();
        Self {
            workflow_id: Uuid::new_v4().to_string(),
            name,
            description: None,
            steps,
            storage: None,
            event_bus: None,
            step_defaults: defaults.step,
            event_buffer: defaults.workflow.event_buffer,
            session: Arc::new(Mutex::new(SessionSlot {
                id: SessionId::new(),
                state: SessionState::new(),
                loaded: false,
            })),
            persist_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn with_workflow_id(mut self, id: impl Into<String>) -> Self {
        self.workflow_id = id.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn WorkflowStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Apply the `[workflow]` and `[step]` sections: an optional name
    /// override, the streaming buffer size and step defaults.
    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        if let Some(name) = &config.workflow.name {
            self.name = name.clone();
        }
        self.step_defaults = config.step.clone();
        self.event_buffer = config.workflow.event_buffer.max(1);
        self
    }

    /// Attach to an existing session. Its stored state is merged over any
    /// initial state on the next run.
    pub fn with_session_id(self, session_id: SessionId) -> Self {
        {
            let mut slot = self.slot();
            slot.id = session_id;
            slot.loaded = false;
        }
        self
    }

    /// Initial state. Values already stored for the session take precedence.
    pub fn with_session_state(self, state: Map<String, Value>) -> Self {
        self.slot().state.replace(state);
        self
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn steps(&self) -> &WorkflowSteps {
        &self.steps
    }

    pub fn session_id(&self) -> SessionId {
        self.slot().id.clone()
    }

    /// The committed session state. Only completed runs write to it.
    pub fn session_state(&self) -> SessionState {
        self.slot().state.clone()
    }

    /// Start a fresh session with empty state.
    pub fn new_session(&self) -> SessionId {
        let mut slot = self.slot();
        slot.id = SessionId::new();
        slot.state = SessionState::new();
        slot.loaded = false;
        info!(workflow = %self.name, session_id = %slot.id, "Started new session");
        slot.id.clone()
    }

    fn slot(&self) -> MutexGuard<'_, SessionSlot> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Check the definition: a non-empty name, at least one node (or a
    /// callback), and a well-formed node tree.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CadenceError::InvalidWorkflow("workflow name is empty".into()));
        }
        match &self.steps {
            WorkflowSteps::Nodes(nodes) if nodes.is_empty() => Err(CadenceError::InvalidWorkflow(
                format!("workflow '{}' has no steps", self.name),
            )),
            WorkflowSteps::Nodes(nodes) => validate_nodes(nodes),
            WorkflowSteps::Function(_) => Ok(()),
        }
    }

    /// Run to completion.
    ///
    /// `Err` means the run never started (invalid definition, storage
    /// unavailable). Once started, the outcome is reported through
    /// [`WorkflowRun::status`] and [`WorkflowRun::failure`].
    pub async fn run(&self, input: impl Into<WorkflowExecutionInput>) -> Result<WorkflowRun> {
        self.run_with_cancel(input, CancellationToken::new()).await
    }

    pub async fn run_with_cancel(
        &self,
        input: impl Into<WorkflowExecutionInput>,
        cancel: CancellationToken,
    ) -> Result<WorkflowRun> {
        self.execute_run(input.into(), RunId::new(), cancel, None)
            .await
    }

    /// Run on a private current-thread runtime, blocking the caller.
    pub fn run_blocking(&self, input: impl Into<WorkflowExecutionInput>) -> Result<WorkflowRun> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(CadenceError::Runtime(
                "run_blocking cannot be called from within an async runtime; use run()".into(),
            ));
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.run(input))
    }

    /// Start a run that reports its events as they happen.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn run_stream(&self, input: impl Into<WorkflowExecutionInput>) -> WorkflowRunStream {
        let (tx, rx) = mpsc::channel(self.event_buffer);
        let run_id = RunId::new();
        let cancel = CancellationToken::new();

        let workflow = self.clone();
        let input = input.into();
        let id = run_id.clone();
        let token = cancel.clone();
        let handle =
            tokio::spawn(async move { workflow.execute_run(input, id, token, Some(tx)).await });

        WorkflowRunStream::new(run_id, rx, cancel, handle)
    }

    /// Start a run detached from the caller.
    ///
    /// The run is stored as `Pending` before this returns, so it can be
    /// looked up with [`Workflow::get_run`] straight away.
    pub async fn spawn_background(
        &self,
        input: impl Into<WorkflowExecutionInput>,
    ) -> Result<BackgroundRun> {
        self.validate()?;
        let (session_id, committed) = self.prepare_session().await?;
        let run_id = RunId::new();
        let pending = WorkflowRun::pending(
            run_id.clone(),
            session_id,
            &self.workflow_id,
            &self.name,
        );
        self.persist(&pending, &committed).await?;

        let workflow = self.clone();
        let input = input.into();
        let id = run_id.clone();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { workflow.execute_run(input, id, token, None).await });
        info!(workflow = %self.name, run_id = %run_id, "Background run spawned");

        Ok(BackgroundRun::new(run_id, cancel, handle))
    }

    /// Look up a run of the current session in storage.
    pub async fn get_run(&self, run_id: &RunId) -> Result<Option<WorkflowRun>> {
        let Some(storage) = &self.storage else {
            return Ok(None);
        };
        let record = storage.read(&self.session_id()).await?;
        Ok(record.and_then(|r| r.get_run(run_id).cloned()))
    }

    async fn execute_run(
        &self,
        input: WorkflowExecutionInput,
        run_id: RunId,
        cancel: CancellationToken,
        events: Option<mpsc::Sender<WorkflowEvent>>,
    ) -> Result<WorkflowRun> {
        self.validate()?;
        let (session_id, committed) = self.prepare_session().await?;
        let base = committed.snapshot();
        let working = SessionState::from_map(base.clone());

        let mut ctx = RunContext::new(session_id.clone(), run_id.clone(), working.clone())
            .with_cancel(cancel)
            .with_bus(self.event_bus.clone())
            .with_step_defaults(self.step_defaults.clone());
        if let Some(tx) = events {
            ctx = ctx.with_events(tx);
        }

        let mut run = WorkflowRun::pending(run_id, session_id, &self.workflow_id, &self.name);
        run.status = RunStatus::Running;
        run.media = input.media.clone();
        if let Err(e) = self.persist(&run, &committed).await {
            warn!(run_id = %run.run_id, error = %e, "Failed to record running workflow");
        }

        info!(
            workflow = %self.name,
            run_id = %run.run_id,
            session_id = %run.session_id,
            "Workflow run started"
        );
        ctx.emit(WorkflowEventKind::RunStarted {
            workflow_name: self.name.clone(),
        })
        .await;

        let outcome = match &self.steps {
            WorkflowSteps::Nodes(nodes) => self.run_nodes(nodes, input, &ctx, &mut run).await,
            WorkflowSteps::Function(func) => run_function(func, input, &ctx, &mut run).await,
        };
        match outcome {
            Ok(()) => {
                if run.status == RunStatus::Running {
                    run.status = RunStatus::Completed;
                }
            }
            Err(CadenceError::Cancelled) => run.status = RunStatus::Cancelled,
            Err(e) => {
                run.status = RunStatus::Error;
                run.failure = Some(RunFailure {
                    step_name: failing_node(&e).unwrap_or_else(|| self.name.clone()),
                    message: e.to_string(),
                });
            }
        }
        run.metrics = aggregate(&run.step_responses);

        if run.status == RunStatus::Completed {
            committed.merge_changes(&base, &working.snapshot());
        }
        if let Err(e) = self.persist(&run, &committed).await {
            error!(run_id = %run.run_id, error = %e, "Failed to persist workflow run");
        }

        let terminal = match run.status {
            RunStatus::Cancelled => {
                warn!(workflow = %self.name, run_id = %run.run_id, "Workflow run cancelled");
                WorkflowEventKind::RunCancelled
            }
            RunStatus::Error => {
                let failure = run.failure.clone();
                warn!(
                    workflow = %self.name,
                    run_id = %run.run_id,
                    step = ?failure.as_ref().map(|f| &f.step_name),
                    "Workflow run failed"
                );
                WorkflowEventKind::RunError {
                    step_name: failure.as_ref().map(|f| f.step_name.clone()),
                    message: failure.map(|f| f.message).unwrap_or_default(),
                }
            }
            status => {
                info!(
                    workflow = %self.name,
                    run_id = %run.run_id,
                    steps = run.step_responses.len(),
                    "Workflow run completed"
                );
                WorkflowEventKind::RunCompleted {
                    content: run.content.clone(),
                    status,
                }
            }
        };
        ctx.emit_terminal(terminal).await;
        Ok(run)
    }

    async fn run_nodes(
        &self,
        nodes: &[Node],
        input: WorkflowExecutionInput,
        ctx: &RunContext,
        run: &mut WorkflowRun,
    ) -> Result<()> {
        let mut step_input = StepInput {
            message: input.message,
            previous_step_content: None,
            previous_step_outputs: BTreeMap::new(),
            additional_data: input.additional_data,
            media: input.media,
        };

        for (index, node) in nodes.iter().enumerate() {
            debug!(
                workflow = %self.name,
                step = %node.name(),
                index = index + 1,
                total = nodes.len(),
                "Running top-level step"
            );
            let output = node.execute(step_input.clone(), ctx).await?;
            step_input = step_input.chain(node.name(), &output);
            run.media.extend(&output.media);
            run.content = output.content.clone();

            let success = output.success;
            let stop = output.stop;
            let failure = (!success).then(|| RunFailure {
                step_name: output.step_name.clone(),
                message: output
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("Step {} failed", output.step_name)),
            });
            run.step_responses.push(output);

            if let Some(failure) = failure {
                run.status = RunStatus::Error;
                run.failure = Some(failure);
                break;
            }
            if stop {
                info!(workflow = %self.name, step = %node.name(), "Early termination requested");
                break;
            }
        }
        Ok(())
    }

    /// Load stored state on the first run of a session.
    async fn prepare_session(&self) -> Result<(SessionId, SessionState)> {
        let (id, state, loaded) = {
            let slot = self.slot();
            (slot.id.clone(), slot.state.clone(), slot.loaded)
        };
        if loaded {
            return Ok((id, state));
        }

        if let Some(storage) = &self.storage {
            if let Some(record) = storage.read(&id).await? {
                debug!(
                    session_id = %id,
                    keys = record.session_state.len(),
                    runs = record.runs.len(),
                    "Loaded stored session"
                );
                state.update(|map| map.extend(record.session_state));
            }
        }

        let mut slot = self.slot();
        if slot.id == id {
            slot.loaded = true;
        }
        Ok((id, state))
    }

    async fn persist(&self, run: &WorkflowRun, state: &SessionState) -> Result<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        let _guard = self.persist_lock.lock().await;
        let mut record = match storage.read(&run.session_id).await? {
            Some(record) => record,
            None => SessionRecord::new(run.session_id.clone(), &self.workflow_id, &self.name),
        };
        record.workflow_name = self.name.clone();
        record.session_state = state.snapshot();
        record.upsert_run(run.clone());
        storage.upsert(record).await?;
        Ok(())
    }
}

async fn run_function(
    func: &WorkflowFn,
    input: WorkflowExecutionInput,
    ctx: &RunContext,
    run: &mut WorkflowRun,
) -> Result<()> {
    let call = func(input, ctx.clone());
    let content = tokio::select! {
        biased;
        _ = ctx.cancel_token().cancelled() => return Err(CadenceError::Cancelled),
        result = call => result?,
    };
    run.content = Some(content);
    Ok(())
}

/// The node a run-fatal error belongs to, when it names one.
fn failing_node(e: &CadenceError) -> Option<String> {
    match e {
        CadenceError::Executor { step, .. } | CadenceError::Timeout { step, .. } => {
            Some(step.clone())
        }
        CadenceError::Evaluator { node, .. } => Some(node.clone()),
        CadenceError::RouterMisconfigured { router, .. } => Some(router.clone()),
        _ => None,
    }
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let steps = match &self.steps {
            WorkflowSteps::Nodes(nodes) => format!("{} nodes", nodes.len()),
            WorkflowSteps::Function(_) => "function".to_string(),
        };
        f.debug_struct("Workflow")
            .field("workflow_id", &self.workflow_id)
            .field("name", &self.name)
            .field("steps", &steps)
            .field("has_storage", &self.storage.is_some())
            .finish_non_exhaustive()
    }
}
