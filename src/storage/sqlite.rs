//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the TaskStore and
//! ResultSink traits.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{ResultSink, StorageError, StorageResult, TaskStore};
use crate::task::{FetchParams, ResultRecord, Schedule, Task, TaskStatus};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const TASK_COLUMNS: &str = "project, task_id, url, method, fetch_params, priority, status,
     retries, retried, exetime, age, itag, lastcrawltime, updatetime, last_error";

/// SQLite storage backend
///
/// The connection sits behind a mutex so one instance can serve the
/// scheduler and the result sink worker at the same time.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        // Configure SQLite for better performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA mmap_size = 268435456;
        ",
        )?;

        initialize_schema(&conn)?;

        tracing::debug!("Opened task database at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Counts stored results of a project
    pub fn count_results(&self, project: &str) -> StorageResult<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM results WHERE project = ?1",
            params![project],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Lists the distinct projects that have stored tasks
    pub fn list_task_projects(&self) -> StorageResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT DISTINCT project FROM tasks ORDER BY project")?;
        let projects = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(projects)
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Database("connection mutex poisoned".to_string()))
    }
}

/// Raw column values of a task row
struct TaskRow {
    project: String,
    task_id: String,
    url: String,
    method: String,
    fetch_params: String,
    priority: i32,
    status: String,
    retries: u32,
    retried: u32,
    exetime: String,
    age: i64,
    itag: Option<String>,
    lastcrawltime: Option<String>,
    updatetime: String,
    last_error: Option<String>,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            project: row.get(0)?,
            task_id: row.get(1)?,
            url: row.get(2)?,
            method: row.get(3)?,
            fetch_params: row.get(4)?,
            priority: row.get(5)?,
            status: row.get(6)?,
            retries: row.get(7)?,
            retried: row.get(8)?,
            exetime: row.get(9)?,
            age: row.get(10)?,
            itag: row.get(11)?,
            lastcrawltime: row.get(12)?,
            updatetime: row.get(13)?,
            last_error: row.get(14)?,
        })
    }

    fn into_task(self) -> StorageResult<Task> {
        let status = TaskStatus::from_db_string(&self.status).ok_or_else(|| {
            StorageError::Serialization(format!("unknown task status '{}'", self.status))
        })?;
        let fetch_params: FetchParams = serde_json::from_str(&self.fetch_params)?;
        let lastcrawltime = self.lastcrawltime.as_deref().map(parse_time).transpose()?;

        Ok(Task {
            task_id: self.task_id,
            project: self.project,
            url: self.url,
            method: self.method,
            fetch_params,
            priority: self.priority,
            schedule: Schedule {
                retries: self.retries,
                retried: self.retried,
                exetime: parse_time(&self.exetime)?,
                age: self.age,
                itag: self.itag,
            },
            status,
            lastcrawltime,
            updatetime: parse_time(&self.updatetime)?,
            last_error: self.last_error,
        })
    }
}

fn parse_time(value: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Serialization(format!("bad timestamp '{}': {}", value, e)))
}

impl TaskStore for SqliteStorage {
    fn get_task(&self, project: &str, task_id: &str) -> StorageResult<Option<Task>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM tasks WHERE project = ?1 AND task_id = ?2",
                    TASK_COLUMNS
                ),
                params![project, task_id],
                TaskRow::from_row,
            )
            .optional()?;

        row.map(TaskRow::into_task).transpose()
    }

    fn put_task(&self, task: &Task) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO tasks ({}) VALUES
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                TASK_COLUMNS
            ),
            params![
                task.project,
                task.task_id,
                task.url,
                task.method,
                task.fetch_params.canonical_json(),
                task.priority,
                task.status.to_db_string(),
                task.schedule.retries,
                task.schedule.retried,
                task.schedule.exetime.to_rfc3339(),
                task.schedule.age,
                task.schedule.itag,
                task.lastcrawltime.map(|t| t.to_rfc3339()),
                task.updatetime.to_rfc3339(),
                task.last_error,
            ],
        )?;
        Ok(())
    }

    fn scan_active(&self, project: &str) -> StorageResult<Vec<Task>> {
        let rows = {
            let conn = self.lock()?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM tasks WHERE project = ?1 AND status = ?2 ORDER BY task_id",
                TASK_COLUMNS
            ))?;
            let rows = stmt
                .query_map(
                    params![project, TaskStatus::Active.to_db_string()],
                    TaskRow::from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        // One corrupt row must not hide the rest of the project
        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            let task_id = row.task_id.clone();
            match row.into_task() {
                Ok(task) => tasks.push(task),
                Err(e) => {
                    tracing::warn!("Skipping unreadable task {}:{}: {}", project, task_id, e)
                }
            }
        }
        Ok(tasks)
    }

    fn count_by_status(&self, project: &str) -> StorageResult<BTreeMap<TaskStatus, u64>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM tasks WHERE project = ?1 GROUP BY status")?;
        let rows = stmt
            .query_map(params![project], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut counts = BTreeMap::new();
        for (status, count) in rows {
            match TaskStatus::from_db_string(&status) {
                Some(status) => {
                    counts.insert(status, count as u64);
                }
                None => tracing::warn!("Ignoring tasks with unknown status '{}'", status),
            }
        }
        Ok(counts)
    }
}

impl ResultSink for SqliteStorage {
    fn save_result(&self, record: &ResultRecord) -> StorageResult<()> {
        let payload = serde_json::to_string(&record.extracted_payload)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO results (project, task_id, url, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.project,
                record.task_id,
                record.url,
                payload,
                record.timestamp.to_rfc3339()
            ],
        )?;
        Ok(())
    }
}
