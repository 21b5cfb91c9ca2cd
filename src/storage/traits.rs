//! Storage traits and error types
//!
//! This module defines the collaborator interfaces the pipeline persists
//! through: the task store (durable task records) and the result sink
//! (extracted records).

use crate::task::{ResultRecord, Task, TaskStatus};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Task not found: {project}:{task_id}")]
    TaskNotFound { project: String, task_id: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Durable task records
///
/// Implementations are shared between the scheduler and tooling, so every
/// method takes `&self` and handles its own synchronization. Writes for one
/// task must be applied in call order.
pub trait TaskStore: Send + Sync {
    /// Gets a task by project and id
    ///
    /// # Returns
    ///
    /// * `Ok(Some(Task))` - The stored task
    /// * `Ok(None)` - The task was never stored
    fn get_task(&self, project: &str, task_id: &str) -> StorageResult<Option<Task>>;

    /// Inserts or replaces a task
    fn put_task(&self, task: &Task) -> StorageResult<()>;

    /// Gets every ACTIVE task of a project
    ///
    /// Used at scheduler startup to rebuild the pending set after a restart.
    fn scan_active(&self, project: &str) -> StorageResult<Vec<Task>>;

    /// Counts the tasks of a project by status
    fn count_by_status(&self, project: &str) -> StorageResult<BTreeMap<TaskStatus, u64>>;
}

/// Destination of extracted result records
pub trait ResultSink: Send + Sync {
    fn save_result(&self, record: &ResultRecord) -> StorageResult<()>;
}
