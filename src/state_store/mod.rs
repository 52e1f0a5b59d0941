//! Workflow persistence for the Folio engine.
//!
//! This module provides the [`StateStore`] trait for persisting and
//! retrieving whole workflow records, along with concrete implementations:
//!
//! - [`MemoryStateStore`]: Thread-safe in-memory storage for testing/development
//! - [`SqliteStateStore`]: SQLite-backed storage (feature `sqlite`)
//!
//! # Example
//!
//! ```
//! use folio::{MemoryStateStore, StageRegistry, StateStore, WorkflowSettings, WorkflowState};
//!
//! # async fn example() -> folio::Result<()> {
//! let store = MemoryStateStore::new();
//! let registry = StageRegistry::content_pipeline();
//!
//! // Insert a new record
//! let state = WorkflowState::new("article-1", &registry, WorkflowSettings::default());
//! store.save("article-1", &state, None).await?;
//!
//! // Update it, naming the version we loaded
//! let mut updated = store.load("article-1").await?.expect("just saved");
//! let expected = updated.last_updated;
//! updated.touch();
//! store.save("article-1", &updated, Some(expected)).await?;
//! # Ok(())
//! # }
//! ```

mod memory;

#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryStateStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStateStore;

use crate::{Result, WorkflowState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A trait for persisting and retrieving workflow records.
///
/// A record is always written as a whole: after a failed or interrupted
/// `save` the store still holds the previous record unchanged.
///
/// # Optimistic concurrency
///
/// `save` takes the `last_updated` value of the record the caller loaded.
/// If the stored record's `last_updated` differs, the save is rejected with
/// [`FolioError::Conflict`](crate::FolioError::Conflict) and the caller must
/// reload. Passing `None` inserts a new record and is rejected with
/// `Conflict` if one already exists.
///
/// # Object Safety
///
/// This trait is object-safe, allowing for dynamic dispatch with
/// `dyn StateStore`.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads a workflow record.
    ///
    /// Returns `Ok(None)` if no record exists for the id.
    async fn load(&self, workflow_id: &str) -> Result<Option<WorkflowState>>;

    /// Atomically replaces (or inserts) a workflow record.
    ///
    /// # Errors
    ///
    /// - [`FolioError::Conflict`](crate::FolioError::Conflict) if `expected`
    ///   does not match the stored record
    /// - [`FolioError::NotFound`](crate::FolioError::NotFound) if `expected`
    ///   is `Some` but no record exists
    async fn save(
        &self,
        workflow_id: &str,
        state: &WorkflowState,
        expected: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Deletes a workflow record. Deleting a missing record is not an error.
    async fn delete(&self, workflow_id: &str) -> Result<()>;

    /// Lists the ids of all stored workflows.
    async fn list(&self) -> Result<Vec<String>>;
}
