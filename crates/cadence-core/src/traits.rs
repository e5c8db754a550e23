use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::state::SessionState;
use crate::types::*;

/// Context passed to executors alongside their input.
#[derive(Debug, Clone)]
pub struct ExecutorContext {
    pub session_id: SessionId,
    pub run_id: RunId,
    pub step_name: String,
    pub session_state: SessionState,
    pub cancel: CancellationToken,
}

/// One unit of an executor's streamed output.
#[derive(Debug, Clone)]
pub enum StreamItem {
    /// Partial output; its content is forwarded as a delta.
    Partial(StepOutput),
    /// The final output. Nothing after it is read.
    Final(StepOutput),
}

/// The collaborator that actually produces content (agent, team, function).
pub trait Executor: Send + Sync + 'static {
    /// Executor name, recorded on every output it produces.
    fn name(&self) -> &str;

    /// Kind reported in outputs and metrics.
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Function
    }

    /// Produce a single output for the given input.
    fn execute(&self, input: StepInput, ctx: ExecutorContext) -> BoxFuture<'_, Result<StepOutput>>;

    /// Produce a finite sequence of partial outputs ending with one final output.
    ///
    /// The default wraps [`Executor::execute`] as a single final item.
    fn execute_stream(
        &self,
        input: StepInput,
        ctx: ExecutorContext,
    ) -> BoxStream<'_, Result<StreamItem>> {
        Box::pin(futures::stream::once(async move {
            self.execute(input, ctx).await.map(StreamItem::Final)
        }))
    }
}

/// Persistence backend for sessions and their run history.
pub trait WorkflowStorage: Send + Sync + 'static {
    /// Read a session record.
    fn read(&self, session_id: &SessionId) -> BoxFuture<'_, Result<Option<SessionRecord>>>;

    /// Insert or replace a session record, returning what was stored.
    fn upsert(&self, record: SessionRecord) -> BoxFuture<'_, Result<SessionRecord>>;

    /// Delete a session. Returns whether it existed.
    fn delete(&self, session_id: &SessionId) -> BoxFuture<'_, Result<bool>>;

    /// List sessions, optionally restricted to one workflow.
    fn list_sessions(&self, workflow_id: Option<&str>)
        -> BoxFuture<'_, Result<Vec<SessionRecord>>>;

    /// Give a session a human-readable name.
    fn rename_session(&self, session_id: &SessionId, name: &str) -> BoxFuture<'_, Result<bool>> {
        let session_id = session_id.clone();
        let name = name.to_string();
        Box::pin(async move {
            match self.read(&session_id).await? {
                Some(mut record) => {
                    record.session_name = Some(name);
                    record.updated_at = chrono::Utc::now();
                    self.upsert(record).await?;
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }
}
