use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};

use cadence_core::error::{CadenceError, Result};
use cadence_core::event::WorkflowEvent;
use cadence_core::types::{RunId, WorkflowRun};

/// A run in streaming mode.
///
/// Yields the run's events in emission order and ends after the terminal
/// event. Dropping the stream cancels the run; call [`WorkflowRunStream::finish`]
/// to let it complete and collect the result.
pub struct WorkflowRunStream {
    run_id: RunId,
    events: ReceiverStream<WorkflowEvent>,
    cancel: CancellationToken,
    guard: DropGuard,
    handle: JoinHandle<Result<WorkflowRun>>,
}

impl WorkflowRunStream {
    pub(crate) fn new(
        run_id: RunId,
        rx: mpsc::Receiver<WorkflowEvent>,
        cancel: CancellationToken,
        handle: JoinHandle<Result<WorkflowRun>>,
    ) -> Self {
        Self {
            run_id,
            events: ReceiverStream::new(rx),
            guard: cancel.clone().drop_guard(),
            cancel,
            handle,
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Request cancellation. The stream still delivers the terminal event.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Stop reading events and wait for the run's result.
    pub async fn finish(self) -> Result<WorkflowRun> {
        let Self {
            events,
            guard,
            handle,
            ..
        } = self;
        let _ = guard.disarm();
        drop(events);
        join(handle).await
    }
}

impl Stream for WorkflowRunStream {
    type Item = WorkflowEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

impl std::fmt::Debug for WorkflowRunStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRunStream")
            .field("run_id", &self.run_id)
            .finish_non_exhaustive()
    }
}

/// A run detached from its caller. Dropping the handle does not cancel it.
#[derive(Debug)]
pub struct BackgroundRun {
    run_id: RunId,
    cancel: CancellationToken,
    handle: JoinHandle<Result<WorkflowRun>>,
}

impl BackgroundRun {
    pub(crate) fn new(
        run_id: RunId,
        cancel: CancellationToken,
        handle: JoinHandle<Result<WorkflowRun>>,
    ) -> Self {
        Self {
            run_id,
            cancel,
            handle,
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn wait(self) -> Result<WorkflowRun> {
        join(self.handle).await
    }
}

async fn join(handle: JoinHandle<Result<WorkflowRun>>) -> Result<WorkflowRun> {
    handle
        .await
        .map_err(|e| CadenceError::Runtime(format!("workflow task failed: {}", e)))?
}
