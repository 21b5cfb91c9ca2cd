//! Project registry: per-project dispatch settings
//!
//! A project is the scheduling domain of a set of tasks. It carries the
//! token-bucket parameters the rate controller enforces and a status gating
//! whether its tasks may be dispatched at all.

mod registry;

pub use registry::MemoryProjectRegistry;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised by project registration and lookups
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProjectError {
    #[error("Project not found: {0}")]
    NotFound(String),

    #[error("Invalid project '{name}': {reason}")]
    Invalid { name: String, reason: String },
}

/// Lifecycle status of a project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    /// Tasks are dispatched subject to rate limiting
    Running,

    /// No new dispatches; in-flight tasks drain
    Paused,

    /// No new dispatches; in-flight tasks drain
    Stopped,

    /// Project is being debugged; treated like `Paused` by the scheduler
    Checking,
}

impl ProjectStatus {
    /// Returns true if tasks of a project in this status may be dispatched
    pub fn allows_dispatch(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Checking => "checking",
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling settings of a project
#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub name: String,
    pub status: ProjectStatus,

    /// Dispatches per second
    pub rate: f64,

    /// Token bucket size
    pub burst: f64,
}

impl Project {
    pub fn new(name: impl Into<String>, rate: f64, burst: f64) -> Self {
        Self {
            name: name.into(),
            status: ProjectStatus::Running,
            rate,
            burst,
        }
    }

    pub fn with_status(mut self, status: ProjectStatus) -> Self {
        self.status = status;
        self
    }

    /// Checks the invariants required at registration time
    pub fn validate(&self) -> Result<(), ProjectError> {
        let invalid = |reason: String| ProjectError::Invalid {
            name: self.name.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name cannot be empty".to_string()));
        }
        if !self.rate.is_finite() || self.rate < 0.0 {
            return Err(invalid(format!("rate must be >= 0, got {}", self.rate)));
        }
        if !self.burst.is_finite() || self.burst < 0.0 {
            return Err(invalid(format!("burst must be >= 0, got {}", self.burst)));
        }
        Ok(())
    }
}

/// Read side of the project registry consumed by the scheduler
pub trait ProjectRegistry: Send + Sync {
    /// Lists every registered project
    fn list_projects(&self) -> Vec<Project>;

    /// Looks up a single project
    fn get_project(&self, name: &str) -> Result<Project, ProjectError>;

    /// Monotonic counter bumped on every change
    ///
    /// The scheduler polls this to decide whether its cached view is stale.
    fn version(&self) -> u64;
}
