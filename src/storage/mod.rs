//! Storage module for persisting task state and results
//!
//! This module handles all persistence for the dispatch pipeline, including:
//! - SQLite database initialization and schema management
//! - Task record persistence (the scheduler's durable state)
//! - Result record persistence (the result sink)
//! - An in-memory backend for tests

mod memory;
mod schema;
mod sqlite;
mod traits;

pub use memory::MemoryTaskStore;
pub use sqlite::SqliteStorage;
pub use traits::{ResultSink, StorageError, StorageResult, TaskStore};

use std::path::Path;

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(StorageError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> StorageResult<SqliteStorage> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    SqliteStorage::new(path)
}
