//! In-memory storage backend
//!
//! Used by tests and by throwaway runs that do not need durability. Read and
//! write failures can be injected to exercise the scheduler's store retry
//! paths.

use crate::storage::traits::{ResultSink, StorageError, StorageResult, TaskStore};
use crate::task::{ResultRecord, Task, TaskKey, TaskStatus};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MemoryState {
    tasks: BTreeMap<TaskKey, Task>,
    results: Vec<ResultRecord>,
    failing_writes: u32,
    failing_reads: u32,
    writes: u64,
}

/// Task store and result sink backed by in-process maps
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    state: Mutex<MemoryState>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` task writes fail
    pub fn fail_next_writes(&self, count: u32) {
        if let Ok(mut state) = self.lock() {
            state.failing_writes = count;
        }
    }

    /// Makes the next `count` task reads (`get_task`, `scan_active`) fail
    pub fn fail_next_reads(&self, count: u32) {
        if let Ok(mut state) = self.lock() {
            state.failing_reads = count;
        }
    }

    /// Number of task writes that reached the store
    pub fn write_count(&self) -> u64 {
        self.lock().map(|state| state.writes).unwrap_or(0)
    }

    /// Snapshot of every stored result
    pub fn results(&self) -> Vec<ResultRecord> {
        self.lock()
            .map(|state| state.results.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| StorageError::Database("memory store mutex poisoned".to_string()))
    }

    fn read(&self, what: &str) -> StorageResult<MutexGuard<'_, MemoryState>> {
        let mut state = self.lock()?;
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(StorageError::Unavailable(format!(
                "injected read failure for {}",
                what
            )));
        }
        Ok(state)
    }
}

impl TaskStore for MemoryTaskStore {
    fn get_task(&self, project: &str, task_id: &str) -> StorageResult<Option<Task>> {
        let key = TaskKey::new(project, task_id);
        Ok(self.read(&key.to_string())?.tasks.get(&key).cloned())
    }

    fn put_task(&self, task: &Task) -> StorageResult<()> {
        let mut state = self.lock()?;
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(StorageError::Unavailable(format!(
                "injected write failure for {}",
                task.key()
            )));
        }
        state.writes += 1;
        state.tasks.insert(task.key(), task.clone());
        Ok(())
    }

    fn scan_active(&self, project: &str) -> StorageResult<Vec<Task>> {
        Ok(self
            .read(project)?
            .tasks
            .values()
            .filter(|task| task.project == project && task.status == TaskStatus::Active)
            .cloned()
            .collect())
    }

    fn count_by_status(&self, project: &str) -> StorageResult<BTreeMap<TaskStatus, u64>> {
        let state = self.lock()?;
        let mut counts = BTreeMap::new();
        for task in state.tasks.values().filter(|task| task.project == project) {
            *counts.entry(task.status).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

impl ResultSink for MemoryTaskStore {
    fn save_result(&self, record: &ResultRecord) -> StorageResult<()> {
        self.lock()?.results.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::NewTask;
    use chrono::Utc;

    fn task(project: &str, id: &str) -> Task {
        NewTask::new(project, "https://example.com/")
            .with_task_id(id)
            .build(Utc::now(), 0)
            .unwrap()
    }

    #[test]
    fn test_round_trip_and_scan() {
        let store = MemoryTaskStore::new();
        store.put_task(&task("p", "a")).unwrap();
        store.put_task(&task("q", "b")).unwrap();

        assert!(store.get_task("p", "a").unwrap().is_some());
        assert_eq!(store.scan_active("p").unwrap().len(), 1);
        assert_eq!(store.write_count(), 2);
    }

    #[test]
    fn test_injected_failures_are_consumed() {
        let store = MemoryTaskStore::new();
        store.fail_next_writes(2);

        assert!(store.put_task(&task("p", "a")).is_err());
        assert!(store.put_task(&task("p", "a")).is_err());
        assert!(store.put_task(&task("p", "a")).is_ok());
        assert_eq!(store.write_count(), 1);
    }

    #[test]
    fn test_injected_read_failures_are_consumed() {
        let store = MemoryTaskStore::new();
        store.put_task(&task("p", "a")).unwrap();
        store.fail_next_reads(2);

        assert!(store.get_task("p", "a").is_err());
        assert!(store.scan_active("p").is_err());
        assert!(store.get_task("p", "a").unwrap().is_some());
        assert_eq!(store.scan_active("p").unwrap().len(), 1);
    }
}
