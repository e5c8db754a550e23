use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::WorkflowStorage;
use cadence_core::types::{SessionId, SessionRecord};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS workflow_sessions (
        session_id TEXT PRIMARY KEY,
        session_name TEXT,
        workflow_id TEXT NOT NULL,
        workflow_name TEXT NOT NULL,
        session_state TEXT NOT NULL,
        runs TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_workflow_sessions_workflow
        ON workflow_sessions(workflow_id, updated_at);";

const COLUMNS: &str =
    "session_id, session_name, workflow_id, workflow_name, session_state, runs, created_at, updated_at";

/// SQLite-backed workflow session store.
///
/// One row per session; state and run history are JSON columns.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CadenceError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(db_err)?;

        // Enable WAL mode for concurrent readers
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!(path = %path.display(), "SQLite store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn db_err(e: rusqlite::Error) -> CadenceError {
    CadenceError::Database(e.to_string())
}

struct RawRecord {
    session_id: String,
    session_name: Option<String>,
    workflow_id: String,
    workflow_name: String,
    session_state: String,
    runs: String,
    created_at: String,
    updated_at: String,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            session_id: row.get(0)?,
            session_name: row.get(1)?,
            workflow_id: row.get(2)?,
            workflow_name: row.get(3)?,
            session_state: row.get(4)?,
            runs: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_record(self) -> Result<SessionRecord> {
        Ok(SessionRecord {
            session_id: SessionId(self.session_id),
            session_name: self.session_name,
            workflow_id: self.workflow_id,
            workflow_name: self.workflow_name,
            session_state: serde_json::from_str(&self.session_state)?,
            runs: serde_json::from_str(&self.runs)?,
            created_at: parse_ts(&self.created_at),
            updated_at: parse_ts(&self.updated_at),
        })
    }
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl WorkflowStorage for SqliteStore {
    fn read(&self, session_id: &SessionId) -> BoxFuture<'_, Result<Option<SessionRecord>>> {
        let sid = session_id.0.clone();

        Box::pin(async move {
            let raw = {
                let conn = self.conn.lock().map_err(|e| CadenceError::Database(e.to_string()))?;
                conn.query_row(
                    &format!("SELECT {} FROM workflow_sessions WHERE session_id = ?1", COLUMNS),
                    params![sid],
                    RawRecord::from_row,
                )
                .optional()
                .map_err(db_err)?
            };
            raw.map(RawRecord::into_record).transpose()
        })
    }

    fn upsert(&self, record: SessionRecord) -> BoxFuture<'_, Result<SessionRecord>> {
        Box::pin(async move {
            let state = serde_json::to_string(&record.session_state)?;
            let runs = serde_json::to_string(&record.runs)?;

            let conn = self.conn.lock().map_err(|e| CadenceError::Database(e.to_string()))?;
            conn.execute(
                "INSERT INTO workflow_sessions
                    (session_id, session_name, workflow_id, workflow_name,
                     session_state, runs, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(session_id) DO UPDATE SET
                    session_name = excluded.session_name,
                    workflow_id = excluded.workflow_id,
                    workflow_name = excluded.workflow_name,
                    session_state = excluded.session_state,
                    runs = excluded.runs,
                    updated_at = excluded.updated_at",
                params![
                    record.session_id.0,
                    record.session_name,
                    record.workflow_id,
                    record.workflow_name,
                    state,
                    runs,
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )
            .map_err(db_err)?;

            debug!(session_id = %record.session_id, runs = record.runs.len(), "Session stored");
            Ok(record)
        })
    }

    fn delete(&self, session_id: &SessionId) -> BoxFuture<'_, Result<bool>> {
        let sid = session_id.0.clone();

        Box::pin(async move {
            let conn = self.conn.lock().map_err(|e| CadenceError::Database(e.to_string()))?;
            let removed = conn
                .execute("DELETE FROM workflow_sessions WHERE session_id = ?1", params![sid])
                .map_err(db_err)?;
            Ok(removed > 0)
        })
    }

    fn list_sessions(
        &self,
        workflow_id: Option<&str>,
    ) -> BoxFuture<'_, Result<Vec<SessionRecord>>> {
        let workflow_id = workflow_id.map(str::to_string);

        Box::pin(async move {
            let raws = {
                let conn = self.conn.lock().map_err(|e| CadenceError::Database(e.to_string()))?;
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {} FROM workflow_sessions
                         WHERE ?1 IS NULL OR workflow_id = ?1
                         ORDER BY updated_at DESC",
                        COLUMNS
                    ))
                    .map_err(db_err)?;
                let rows = stmt
                    .query_map(params![workflow_id], RawRecord::from_row)
                    .map_err(db_err)?;

                let mut raws = Vec::new();
                for row in rows {
                    raws.push(row.map_err(db_err)?);
                }
                raws
            };
            raws.into_iter().map(RawRecord::into_record).collect()
        })
    }
}
