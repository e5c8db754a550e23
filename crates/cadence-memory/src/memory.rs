use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use futures::future::BoxFuture;

use cadence_core::error::Result;
use cadence_core::traits::WorkflowStorage;
use cadence_core::types::{SessionId, SessionRecord};

/// Process-local session store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    sessions: Mutex<HashMap<String, SessionRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, SessionRecord>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl WorkflowStorage for InMemoryStore {
    fn read(&self, session_id: &SessionId) -> BoxFuture<'_, Result<Option<SessionRecord>>> {
        let found = self.sessions().get(&session_id.0).cloned();
        Box::pin(async move { Ok(found) })
    }

    fn upsert(&self, record: SessionRecord) -> BoxFuture<'_, Result<SessionRecord>> {
        self.sessions()
            .insert(record.session_id.0.clone(), record.clone());
        Box::pin(async move { Ok(record) })
    }

    fn delete(&self, session_id: &SessionId) -> BoxFuture<'_, Result<bool>> {
        let removed = self.sessions().remove(&session_id.0).is_some();
        Box::pin(async move { Ok(removed) })
    }

    fn list_sessions(
        &self,
        workflow_id: Option<&str>,
    ) -> BoxFuture<'_, Result<Vec<SessionRecord>>> {
        let mut sessions: Vec<SessionRecord> = self
            .sessions()
            .values()
            .filter(|r| workflow_id.map_or(true, |id| r.workflow_id == id))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Box::pin(async move { Ok(sessions) })
    }
}
