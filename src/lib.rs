//! Sumi-Dispatch: a crawl scheduling and dispatch pipeline
//!
//! This crate coordinates a scheduler, a fetcher pool, a processor pool and a
//! result sink through bounded priority queues, with per-project rate limiting,
//! retry/backoff and crash-safe task status persistence.

pub mod config;
pub mod crawler;
pub mod project;
pub mod queue;
pub mod scheduler;
pub mod storage;
pub mod task;

use thiserror::Error;

/// Main error type for Sumi-Dispatch operations
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] queue::QueueError),

    #[error("Project error: {0}")]
    Project(#[from] project::ProjectError),

    #[error("Task error: {0}")]
    Task(#[from] task::TaskError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] crawler::FetchError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Sumi-Dispatch operations
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::Pipeline;
pub use project::{Project, ProjectStatus};
pub use queue::Queue;
pub use scheduler::Scheduler;
pub use task::{Task, TaskStatus};
