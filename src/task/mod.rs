//! Task model for the dispatch pipeline
//!
//! # Components
//!
//! - `Task`, `Schedule`, `FetchParams`: the durable unit of work
//! - `TaskStatus`: status as persisted in the task store
//! - `NewTask`: a submission, validated into a `Task` by the scheduler
//! - `message`: the typed payloads carried by each queue edge

mod id;
pub mod message;
mod model;
mod status;

pub use id::{compute_task_id, content_fingerprint, normalize_url};
pub use message::{
    ControlMessage, FetchOutcome, FetchRequest, FetchResponse, Outcome, ResultRecord,
    StatusReport,
};
pub(crate) use model::MAX_AGE_SECS;
pub use model::{FetchParams, NewTask, Schedule, Task, TaskKey};
pub use status::TaskStatus;

use thiserror::Error;

/// Reasons a submission is rejected as malformed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("Submission for {url} has no project")]
    MissingProject { url: String },

    #[error("Unknown project '{0}'")]
    UnknownProject(String),

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Unsupported HTTP method '{0}'")]
    InvalidMethod(String),

    #[error("Malformed control message: {0}")]
    Decode(String),
}
