use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::metrics::WorkflowMetrics;

/// Unique session identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier of one workflow run.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Payload carried by a run's message and by every step's content.
///
/// Resolved once from JSON at the boundary; use sites match on the variant
/// instead of probing the shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Number(f64),
    Object(Map<String, Value>),
    List(Vec<Value>),
}

impl Content {
    /// Convert an arbitrary JSON value. `null` has no content.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(Self::Text(b.to_string())),
            Value::Number(n) => n.as_f64().map(Self::Number),
            Value::String(s) => Some(Self::Text(s)),
            Value::Object(map) => Some(Self::Object(map)),
            Value::Array(items) => Some(Self::List(items)),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Text(s) => Value::String(s.clone()),
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Object(map) => Value::Object(map.clone()),
            Self::List(items) => Value::Array(items.clone()),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view. Text that parses as a number counts.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Text rendering: strings verbatim, everything else as pretty JSON.
    pub fn to_text_lossy(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Number(n) => n.to_string(),
            other => serde_json::to_string_pretty(&other.to_value()).unwrap_or_default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(s) => s.is_empty(),
            Self::Number(_) => false,
            Self::Object(map) => map.is_empty(),
            Self::List(items) => items.is_empty(),
        }
    }
}

impl From<&str> for Content {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Content {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<f64> for Content {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i64> for Content {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
}

/// Reference to a media artifact flowing between steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaArtifact {
    pub id: String,
    pub kind: MediaKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_base64: Option<String>,
}

impl MediaArtifact {
    pub fn from_url(kind: MediaKind, url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            url: Some(url.into()),
            mime_type: None,
            data_base64: None,
        }
    }
}

/// Images, videos and audio travelling together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaSet {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<MediaArtifact>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub videos: Vec<MediaArtifact>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audio: Vec<MediaArtifact>,
}

impl MediaSet {
    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.videos.is_empty() && self.audio.is_empty()
    }

    pub fn extend(&mut self, other: &MediaSet) {
        self.images.extend(other.images.iter().cloned());
        self.videos.extend(other.videos.iter().cloned());
        self.audio.extend(other.audio.iter().cloned());
    }

    pub fn push(&mut self, artifact: MediaArtifact) {
        match artifact.kind {
            MediaKind::Image => self.images.push(artifact),
            MediaKind::Video => self.videos.push(artifact),
            MediaKind::Audio => self.audio.push(artifact),
        }
    }
}

/// Who produced a StepOutput.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    Agent,
    Team,
    #[default]
    Function,
    Steps,
    Condition,
    Loop,
    Parallel,
    Router,
}

impl ExecutorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Team => "team",
            Self::Function => "function",
            Self::Steps => "steps",
            Self::Condition => "condition",
            Self::Loop => "loop",
            Self::Parallel => "parallel",
            Self::Router => "router",
        }
    }
}

impl std::fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal state of a Loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    /// The end condition returned true.
    Converged,
    /// `max_iterations` reached without convergence.
    Exhausted,
    /// An iteration failed or requested a stop.
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopTermination {
    pub state: LoopState,
    pub iterations: usize,
}

/// Input handed to every node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepInput {
    #[serde(default)]
    pub message: Option<Content>,
    #[serde(default)]
    pub previous_step_content: Option<Content>,
    #[serde(default)]
    pub previous_step_outputs: BTreeMap<String, StepOutput>,
    #[serde(default)]
    pub additional_data: Map<String, Value>,
    #[serde(default)]
    pub media: MediaSet,
}

impl StepInput {
    pub fn new(message: impl Into<Content>) -> Self {
        Self {
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn message_as_text(&self) -> Option<String> {
        self.message.as_ref().map(Content::to_text_lossy)
    }

    /// Look up an earlier step's output by name.
    pub fn get_step_output(&self, step_name: &str) -> Option<&StepOutput> {
        self.previous_step_outputs.get(step_name)
    }

    /// Content of an earlier step. For a Parallel node this is an object
    /// mapping each child's name to that child's content.
    pub fn get_step_content(&self, step_name: &str) -> Option<Content> {
        let output = self.get_step_output(step_name)?;
        if let Some(children) = &output.parallel_step_outputs {
            let map: Map<String, Value> = children
                .iter()
                .filter_map(|(name, child)| {
                    child.content.as_ref().map(|c| (name.clone(), c.to_value()))
                })
                .collect();
            return Some(Content::Object(map));
        }
        output.content.clone()
    }

    /// All previous content as `=== name ===` sections.
    pub fn get_all_previous_content(&self) -> String {
        self.previous_step_outputs
            .iter()
            .filter_map(|(name, output)| {
                output
                    .content
                    .as_ref()
                    .map(|c| format!("=== {} ===\n{}", name, c.to_text_lossy()))
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Input for the node after `output`: its content becomes the previous
    /// content, it is recorded under `name`, and its media is appended.
    pub fn chain(&self, name: &str, output: &StepOutput) -> StepInput {
        let mut next = self.clone();
        next.previous_step_content = output.content.clone();
        next.previous_step_outputs
            .insert(name.to_string(), output.clone());
        next.media.extend(&output.media);
        next
    }
}

/// Result of one node execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutput {
    #[serde(default)]
    pub step_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(default)]
    pub executor_type: ExecutorKind,
    #[serde(default)]
    pub executor_name: String,
    #[serde(default)]
    pub content: Option<Content>,
    /// Present only on a Parallel node's output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_step_outputs: Option<BTreeMap<String, StepOutput>>,
    /// Raw executor response, opaque to the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default)]
    pub media: MediaSet,
    /// Executor-reported metrics payload, opaque to the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub stop: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_termination: Option<LoopTermination>,
}

fn default_success() -> bool {
    true
}

impl Default for StepOutput {
    fn default() -> Self {
        Self {
            step_name: String::new(),
            step_id: None,
            executor_type: ExecutorKind::default(),
            executor_name: String::new(),
            content: None,
            parallel_step_outputs: None,
            response: None,
            media: MediaSet::default(),
            metrics: None,
            duration_ms: None,
            success: true,
            error: None,
            stop: false,
            loop_termination: None,
        }
    }
}

impl StepOutput {
    /// A successful output with the given content.
    pub fn content(content: impl Into<Content>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// A successful output with no content.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A failed output. `error` is set iff `success` is false.
    pub fn failure(step_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Ask the workflow to stop after this output.
    pub fn with_stop(mut self) -> Self {
        self.stop = true;
        self
    }

    pub fn with_metrics(mut self, metrics: Value) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_media(mut self, artifact: MediaArtifact) -> Self {
        self.media.push(artifact);
        self
    }

    pub fn with_response(mut self, response: Value) -> Self {
        self.response = Some(response);
        self
    }
}

/// What a caller passes to `Workflow::run`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowExecutionInput {
    #[serde(default)]
    pub message: Option<Content>,
    #[serde(default)]
    pub additional_data: Map<String, Value>,
    #[serde(default)]
    pub media: MediaSet,
}

impl WorkflowExecutionInput {
    pub fn new(message: impl Into<Content>) -> Self {
        Self {
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.additional_data.insert(key.into(), value);
        self
    }

    pub fn with_media(mut self, artifact: MediaArtifact) -> Self {
        self.media.push(artifact);
        self
    }
}

impl From<&str> for WorkflowExecutionInput {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for WorkflowExecutionInput {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<Content> for WorkflowExecutionInput {
    fn from(message: Content) -> Self {
        Self::new(message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
    Error,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Error)
    }
}

/// The first fatal failure of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    pub step_name: String,
    pub message: String,
}

/// Outcome of one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub run_id: RunId,
    pub session_id: SessionId,
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: RunStatus,
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub step_responses: Vec<StepOutput>,
    #[serde(default)]
    pub metrics: WorkflowMetrics,
    #[serde(default)]
    pub media: MediaSet,
    #[serde(default)]
    pub failure: Option<RunFailure>,
    pub created_at: DateTime<Utc>,
}

impl WorkflowRun {
    pub fn pending(
        run_id: RunId,
        session_id: SessionId,
        workflow_id: impl Into<String>,
        workflow_name: impl Into<String>,
    ) -> Self {
        Self {
            run_id,
            session_id,
            workflow_id: workflow_id.into(),
            workflow_name: workflow_name.into(),
            status: RunStatus::Pending,
            content: None,
            step_responses: vec![],
            metrics: WorkflowMetrics::default(),
            media: MediaSet::default(),
            failure: None,
            created_at: Utc::now(),
        }
    }
}

/// What the storage collaborator persists per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    #[serde(default)]
    pub session_name: Option<String>,
    pub workflow_id: String,
    pub workflow_name: String,
    #[serde(default)]
    pub session_state: Map<String, Value>,
    #[serde(default)]
    pub runs: Vec<WorkflowRun>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(
        session_id: SessionId,
        workflow_id: impl Into<String>,
        workflow_name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            session_name: None,
            workflow_id: workflow_id.into(),
            workflow_name: workflow_name.into(),
            session_state: Map::new(),
            runs: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the run with the same id, or append it.
    pub fn upsert_run(&mut self, run: WorkflowRun) {
        match self.runs.iter_mut().find(|r| r.run_id == run.run_id) {
            Some(existing) => *existing = run,
            None => self.runs.push(run),
        }
        self.updated_at = Utc::now();
    }

    pub fn get_run(&self, run_id: &RunId) -> Option<&WorkflowRun> {
        self.runs.iter().find(|r| &r.run_id == run_id)
    }
}
