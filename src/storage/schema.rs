//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Sumi-Dispatch database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Durable task records, one row per (project, task_id)
CREATE TABLE IF NOT EXISTS tasks (
    project TEXT NOT NULL,
    task_id TEXT NOT NULL,
    url TEXT NOT NULL,
    method TEXT NOT NULL,
    fetch_params TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    retries INTEGER NOT NULL,
    retried INTEGER NOT NULL DEFAULT 0,
    exetime TEXT NOT NULL,
    age INTEGER NOT NULL DEFAULT 0,
    itag TEXT,
    lastcrawltime TEXT,
    updatetime TEXT NOT NULL,
    last_error TEXT,
    PRIMARY KEY (project, task_id)
);

CREATE INDEX IF NOT EXISTS idx_tasks_project_status ON tasks(project, status);

-- Extracted results, appended by the result sink
CREATE TABLE IF NOT EXISTS results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project TEXT NOT NULL,
    task_id TEXT NOT NULL,
    url TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_results_task ON results(project, task_id);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        initialize_schema(&conn).unwrap();
        let result = initialize_schema(&conn);

        assert!(result.is_ok());
    }

    #[test]
    fn test_tables_exist_after_init() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        for table in ["tasks", "results"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "Table {} should exist", table);
        }
    }
}
