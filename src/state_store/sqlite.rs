//! SQLite-backed state store implementation.
//!
//! This module provides [`SqliteStateStore`], a persistent implementation
//! of [`StateStore`] backed by SQLite.

use crate::{FolioError, Result, WorkflowState, WorkflowStatus};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::StateStore;

/// Schema version for migrations.
const SCHEMA_VERSION: i32 = 1;

/// SQL for creating the workflows table.
const CREATE_WORKFLOWS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS workflows (
        workflow_id TEXT NOT NULL PRIMARY KEY,
        status TEXT NOT NULL,
        state_json TEXT NOT NULL,
        last_updated TEXT NOT NULL
    )
"#;

/// SQL for creating the schema_version table.
const CREATE_SCHEMA_VERSION_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER NOT NULL
    )
"#;

/// Index on workflows for querying by status.
const CREATE_STATUS_INDEX: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_workflow_status
    ON workflows (status)
"#;

/// Fixed-width timestamp text, so equality in SQL matches equality in Rust.
fn version_text(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Result of a conditional write, decided inside the blocking task.
enum SaveOutcome {
    Saved,
    Conflict,
    NotFound,
}

/// A SQLite-backed implementation of [`StateStore`].
///
/// Each workflow is one row holding the whole record as JSON, so a save
/// replaces the record in a single statement. Updates are conditional on
/// the `last_updated` column still holding the version the caller loaded.
///
/// # Thread Safety
///
/// The store wraps the SQLite connection in a `Mutex` and uses
/// `spawn_blocking` for all database operations, making it safe
/// for use in async contexts.
///
/// # Example
///
/// ```rust,ignore
/// use folio::SqliteStateStore;
///
/// // Open or create a database file
/// let store = SqliteStateStore::open("folio.db").await?;
///
/// // Or use an in-memory database for testing
/// let store = SqliteStateStore::open_in_memory().await?;
/// ```
#[derive(Clone)]
pub struct SqliteStateStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStateStore {
    /// Opens a SQLite database at the given path.
    ///
    /// Creates the database and schema if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the
    /// schema cannot be created.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let conn = tokio::task::spawn_blocking(move || Connection::open(&path))
            .await
            .map_err(|e| FolioError::StateStore(format!("spawn_blocking failed: {}", e)))?
            .map_err(|e| FolioError::Database(format!("failed to open database: {}", e)))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        store.run_migrations().await?;
        Ok(store)
    }

    /// Opens an in-memory SQLite database.
    ///
    /// Useful for testing. The database is lost when the store is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub async fn open_in_memory() -> Result<Self> {
        let conn = tokio::task::spawn_blocking(Connection::open_in_memory)
            .await
            .map_err(|e| FolioError::StateStore(format!("spawn_blocking failed: {}", e)))?
            .map_err(|e| {
                FolioError::Database(format!("failed to open in-memory database: {}", e))
            })?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        store.run_migrations().await?;
        Ok(store)
    }

    /// Runs schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();

            conn.execute(CREATE_SCHEMA_VERSION_TABLE, [])?;

            let version: Option<i32> = conn
                .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                    row.get(0)
                })
                .optional()?;

            if version.map_or(true, |v| v < SCHEMA_VERSION) {
                conn.execute(CREATE_WORKFLOWS_TABLE, [])?;
                conn.execute(CREATE_STATUS_INDEX, [])?;

                conn.execute("DELETE FROM schema_version", [])?;
                conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?1)",
                    params![SCHEMA_VERSION],
                )?;
            }

            Ok::<(), rusqlite::Error>(())
        })
        .await
        .map_err(|e| FolioError::StateStore(format!("spawn_blocking failed: {}", e)))?
        .map_err(|e| FolioError::Database(format!("migration failed: {}", e)))?;

        Ok(())
    }

    /// Checks if the required tables exist.
    ///
    /// Useful for testing that the schema was created correctly.
    pub async fn tables_exist(&self) -> Result<bool> {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();

            let tables: Vec<String> = {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master WHERE type='table' AND name IN ('workflows', 'schema_version')",
                )?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                rows.filter_map(|r| r.ok()).collect()
            };

            Ok::<bool, rusqlite::Error>(tables.len() == 2)
        })
        .await
        .map_err(|e| FolioError::StateStore(format!("spawn_blocking failed: {}", e)))?
        .map_err(|e| FolioError::Database(format!("table check failed: {}", e)))
    }

    /// Lists the ids of workflows in the given status.
    pub async fn list_by_status(&self, status: WorkflowStatus) -> Result<Vec<String>> {
        let conn = Arc::clone(&self.conn);
        let status = status.as_str();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(
                "SELECT workflow_id FROM workflows WHERE status = ?1 ORDER BY workflow_id",
            )?;
            let rows = stmt.query_map(params![status], |row| row.get(0))?;
            rows.collect::<std::result::Result<Vec<String>, _>>()
        })
        .await
        .map_err(|e| FolioError::StateStore(format!("spawn_blocking failed: {}", e)))?
        .map_err(|e| FolioError::Database(format!("query failed: {}", e)))
    }
}

// Debug implementation that doesn't expose connection details
impl std::fmt::Debug for SqliteStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStateStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn load(&self, workflow_id: &str) -> Result<Option<WorkflowState>> {
        let conn = Arc::clone(&self.conn);
        let workflow_id = workflow_id.to_string();

        let state_json = tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.query_row(
                "SELECT state_json FROM workflows WHERE workflow_id = ?1",
                params![workflow_id],
                |row| row.get::<_, String>(0),
            )
            .optional()
        })
        .await
        .map_err(|e| FolioError::StateStore(format!("spawn_blocking failed: {}", e)))?
        .map_err(|e| FolioError::Database(format!("select failed: {}", e)))?;

        match state_json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn save(
        &self,
        workflow_id: &str,
        state: &WorkflowState,
        expected: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let id = workflow_id.to_string();
        let state_json = serde_json::to_string(state)?;
        let status = state.status.as_str();
        let last_updated = version_text(state.last_updated);
        let expected = expected.map(version_text);

        let outcome = tokio::task::spawn_blocking(move || -> rusqlite::Result<SaveOutcome> {
            let conn = conn.blocking_lock();

            match expected {
                None => {
                    let inserted = conn.execute(
                        "INSERT INTO workflows (workflow_id, status, state_json, last_updated) VALUES (?1, ?2, ?3, ?4)",
                        params![id, status, state_json, last_updated],
                    );
                    match inserted {
                        Ok(_) => Ok(SaveOutcome::Saved),
                        Err(rusqlite::Error::SqliteFailure(e, _))
                            if e.code == ErrorCode::ConstraintViolation =>
                        {
                            Ok(SaveOutcome::Conflict)
                        }
                        Err(e) => Err(e),
                    }
                }
                Some(expected) => {
                    let updated = conn.execute(
                        "UPDATE workflows SET status = ?2, state_json = ?3, last_updated = ?4 WHERE workflow_id = ?1 AND last_updated = ?5",
                        params![id, status, state_json, last_updated, expected],
                    )?;
                    if updated == 1 {
                        return Ok(SaveOutcome::Saved);
                    }

                    let exists = conn
                        .query_row(
                            "SELECT 1 FROM workflows WHERE workflow_id = ?1",
                            params![id],
                            |_| Ok(()),
                        )
                        .optional()?
                        .is_some();
                    Ok(if exists {
                        SaveOutcome::Conflict
                    } else {
                        SaveOutcome::NotFound
                    })
                }
            }
        })
        .await
        .map_err(|e| FolioError::StateStore(format!("spawn_blocking failed: {}", e)))?
        .map_err(|e| FolioError::Database(format!("save failed: {}", e)))?;

        match outcome {
            SaveOutcome::Saved => Ok(()),
            SaveOutcome::Conflict => Err(FolioError::Conflict(workflow_id.to_string())),
            SaveOutcome::NotFound => Err(FolioError::NotFound(workflow_id.to_string())),
        }
    }

    async fn delete(&self, workflow_id: &str) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let workflow_id = workflow_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "DELETE FROM workflows WHERE workflow_id = ?1",
                params![workflow_id],
            )?;
            Ok::<(), rusqlite::Error>(())
        })
        .await
        .map_err(|e| FolioError::StateStore(format!("spawn_blocking failed: {}", e)))?
        .map_err(|e| FolioError::Database(format!("delete failed: {}", e)))
    }

    async fn list(&self) -> Result<Vec<String>> {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare("SELECT workflow_id FROM workflows ORDER BY workflow_id")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<std::result::Result<Vec<String>, _>>()
        })
        .await
        .map_err(|e| FolioError::StateStore(format!("spawn_blocking failed: {}", e)))?
        .map_err(|e| FolioError::Database(format!("list failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Stage, StageRegistry, WorkflowSettings};

    fn state(id: &str) -> WorkflowState {
        WorkflowState::new(id, &StageRegistry::content_pipeline(), WorkflowSettings::default())
    }

    #[tokio::test]
    async fn test_open_in_memory() {
        let store = SqliteStateStore::open_in_memory().await.unwrap();
        assert!(store.tables_exist().await.unwrap());
    }

    #[tokio::test]
    async fn test_reopen_preserves_schema() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("folio.db");

        {
            let store = SqliteStateStore::open(&db_path).await.unwrap();
            assert!(store.tables_exist().await.unwrap());
        }

        {
            let store = SqliteStateStore::open(&db_path).await.unwrap();
            assert!(store.tables_exist().await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_insert_and_load() {
        let store = SqliteStateStore::open_in_memory().await.unwrap();
        assert!(store.load("wf-1").await.unwrap().is_none());

        let mut original = state("wf-1");
        original
            .metadata
            .insert("research".to_string(), serde_json::json!({"sources": 2}));
        store.save("wf-1", &original, None).await.unwrap();

        let loaded = store.load("wf-1").await.unwrap().unwrap();
        assert_eq!(loaded, original);
    }

    #[tokio::test]
    async fn test_insert_twice_conflicts() {
        let store = SqliteStateStore::open_in_memory().await.unwrap();
        store.save("wf-1", &state("wf-1"), None).await.unwrap();
        let result = store.save("wf-1", &state("wf-1"), None).await;
        assert!(matches!(result, Err(FolioError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_conditional_update() {
        let store = SqliteStateStore::open_in_memory().await.unwrap();
        store.save("wf-1", &state("wf-1"), None).await.unwrap();

        let loaded = store.load("wf-1").await.unwrap().unwrap();

        let mut winner = loaded.clone();
        winner.status = WorkflowStatus::InProgress;
        winner.touch();
        store
            .save("wf-1", &winner, Some(loaded.last_updated))
            .await
            .unwrap();

        let mut stale = loaded.clone();
        stale.status = WorkflowStatus::Failed;
        stale.touch();
        let result = store.save("wf-1", &stale, Some(loaded.last_updated)).await;
        assert!(matches!(result, Err(FolioError::Conflict(_))));

        let stored = store.load("wf-1").await.unwrap().unwrap();
        assert_eq!(stored.status, WorkflowStatus::InProgress);
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let store = SqliteStateStore::open_in_memory().await.unwrap();
        let orphan = state("wf-9");
        let result = store.save("wf-9", &orphan, Some(orphan.last_updated)).await;
        assert!(matches!(result, Err(FolioError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_and_list() {
        let store = SqliteStateStore::open_in_memory().await.unwrap();
        store.save("wf-b", &state("wf-b"), None).await.unwrap();
        store.save("wf-a", &state("wf-a"), None).await.unwrap();
        assert_eq!(store.list().await.unwrap(), vec!["wf-a", "wf-b"]);

        store.delete("wf-a").await.unwrap();
        assert_eq!(store.list().await.unwrap(), vec!["wf-b"]);
    }

    #[tokio::test]
    async fn test_list_by_status() {
        let store = SqliteStateStore::open_in_memory().await.unwrap();
        store.save("wf-1", &state("wf-1"), None).await.unwrap();

        let mut suspended = state("wf-2");
        suspended.status = WorkflowStatus::NeedsReview;
        store.save("wf-2", &suspended, None).await.unwrap();

        assert_eq!(
            store.list_by_status(WorkflowStatus::NeedsReview).await.unwrap(),
            vec!["wf-2"]
        );
        assert_eq!(
            store.list_by_status(WorkflowStatus::NotStarted).await.unwrap(),
            vec!["wf-1"]
        );
    }

    #[tokio::test]
    async fn test_persistence_across_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("persist.db");

        {
            let store = SqliteStateStore::open(&db_path).await.unwrap();
            let mut record = state("wf-1");
            record.completed_stages = vec![Stage::Research];
            record.current_stage = Stage::PillarValidation;
            record.status = WorkflowStatus::InProgress;
            store.save("wf-1", &record, None).await.unwrap();
        }

        {
            let store = SqliteStateStore::open(&db_path).await.unwrap();
            let record = store.load("wf-1").await.unwrap().unwrap();
            assert_eq!(record.completed_stages, vec![Stage::Research]);
            assert_eq!(record.current_stage, Stage::PillarValidation);

            let mut next = record.clone();
            next.touch();
            store
                .save("wf-1", &next, Some(record.last_updated))
                .await
                .unwrap();
        }
    }
}
