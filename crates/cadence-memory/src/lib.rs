//! Session storage backends for Cadence workflows.

pub mod memory;
pub mod store;

use std::sync::Arc;

use cadence_core::config::{StorageBackend, StorageConfig};
use cadence_core::error::Result;
use cadence_core::traits::WorkflowStorage;

pub use memory::InMemoryStore;
pub use store::SqliteStore;

/// Open the backend named in the config.
pub fn open_storage(config: &StorageConfig) -> Result<Arc<dyn WorkflowStorage>> {
    match config.backend {
        StorageBackend::Sqlite => Ok(Arc::new(SqliteStore::open(&config.resolved_path())?)),
        StorageBackend::Memory => Ok(Arc::new(InMemoryStore::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::types::{SessionId, SessionRecord};

    #[tokio::test]
    async fn test_open_configured_backends() {
        let dir = tempfile::tempdir().unwrap();
        let sqlite = open_storage(&StorageConfig {
            backend: StorageBackend::Sqlite,
            path: dir.path().join("wf.db").display().to_string(),
        })
        .unwrap();
        let memory = open_storage(&StorageConfig {
            backend: StorageBackend::Memory,
            path: String::new(),
        })
        .unwrap();

        for storage in [sqlite, memory] {
            let sid = SessionId::new();
            storage
                .upsert(SessionRecord::new(sid.clone(), "wf", "Workflow"))
                .await
                .unwrap();
            assert!(storage.read(&sid).await.unwrap().is_some());
        }
    }
}
