//! In-memory state store implementation.
//!
//! This module provides [`MemoryStateStore`], a thread-safe in-memory
//! implementation of [`StateStore`] suitable for testing and development.

use crate::{FolioError, Result, WorkflowState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::StateStore;

/// Internal storage for the memory state store.
#[derive(Debug, Default)]
struct Storage {
    /// Workflow records indexed by workflow id.
    workflows: HashMap<String, WorkflowState>,
    /// Number of successful saves, for tests.
    saves: u64,
}

/// An in-memory implementation of [`StateStore`].
///
/// This implementation uses `Arc<RwLock<...>>` internally, making it
/// safe to clone and share across async tasks. The concurrency check and
/// the replacement happen under one write lock.
#[derive(Debug, Clone)]
pub struct MemoryStateStore {
    storage: Arc<RwLock<Storage>>,
}

impl MemoryStateStore {
    /// Creates a new, empty in-memory state store.
    pub fn new() -> Self {
        Self {
            storage: Arc::new(RwLock::new(Storage::default())),
        }
    }

    /// Returns the number of workflows currently stored.
    ///
    /// Useful for testing.
    pub async fn item_count(&self) -> usize {
        self.storage.read().await.workflows.len()
    }

    /// Returns the number of successful saves since creation.
    ///
    /// Useful for asserting that an operation did not write.
    pub async fn save_count(&self) -> u64 {
        self.storage.read().await.saves
    }

    /// Clears all stored data.
    ///
    /// Useful for resetting state between tests.
    pub async fn clear(&self) {
        let mut storage = self.storage.write().await;
        storage.workflows.clear();
        storage.saves = 0;
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, workflow_id: &str) -> Result<Option<WorkflowState>> {
        let storage = self.storage.read().await;
        Ok(storage.workflows.get(workflow_id).cloned())
    }

    async fn save(
        &self,
        workflow_id: &str,
        state: &WorkflowState,
        expected: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut storage = self.storage.write().await;
        let stored = storage.workflows.get(workflow_id).map(|s| s.last_updated);

        match (stored, expected) {
            (None, None) => {}
            (Some(_), None) => return Err(FolioError::Conflict(workflow_id.to_string())),
            (None, Some(_)) => return Err(FolioError::NotFound(workflow_id.to_string())),
            (Some(current), Some(expected)) if current != expected => {
                return Err(FolioError::Conflict(workflow_id.to_string()))
            }
            (Some(_), Some(_)) => {}
        }

        storage
            .workflows
            .insert(workflow_id.to_string(), state.clone());
        storage.saves += 1;
        Ok(())
    }

    async fn delete(&self, workflow_id: &str) -> Result<()> {
        let mut storage = self.storage.write().await;
        storage.workflows.remove(workflow_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let storage = self.storage.read().await;
        let mut ids: Vec<String> = storage.workflows.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
