//! Typed messages exchanged between pipeline stages
//!
//! Every queue edge carries exactly one of these shapes:
//!
//! | Edge | Payload |
//! |------|---------|
//! | control (processor/admin → scheduler) | [`ControlMessage`] |
//! | scheduler → fetcher | [`FetchRequest`] |
//! | fetcher → processor | [`FetchOutcome`] |
//! | processor → result sink | [`ResultRecord`] |

use crate::task::{FetchParams, NewTask, TaskError, TaskKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A message consumed by the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    NewTask(NewTask),
    StatusReport(StatusReport),
}

impl ControlMessage {
    /// Decodes a control message from its JSON form
    ///
    /// Used by administrative tooling that injects work onto the control
    /// queue; shape errors surface here instead of inside the scheduler.
    pub fn from_json(json: &str) -> Result<Self, TaskError> {
        serde_json::from_str(json).map_err(|e| TaskError::Decode(e.to_string()))
    }

    /// Queue priority of this message
    ///
    /// Status reports go ahead of new submissions so in-flight slots are
    /// released before more work is admitted.
    pub fn queue_priority(&self) -> i32 {
        match self {
            Self::StatusReport(_) => 1,
            Self::NewTask(_) => 0,
        }
    }
}

/// Outcome of a fetch + process attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

/// Completion report for a dispatched task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub task_id: String,
    pub project: String,
    pub outcome: Outcome,

    /// New content fingerprint, if the processor computed one
    #[serde(default)]
    pub itag: Option<String>,

    /// Replaces the task's re-crawl age (seconds)
    #[serde(default)]
    pub age_override: Option<i64>,

    #[serde(default)]
    pub error: Option<String>,
}

impl StatusReport {
    pub fn success(project: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            project: project.into(),
            outcome: Outcome::Success,
            itag: None,
            age_override: None,
            error: None,
        }
    }

    pub fn failure(
        project: impl Into<String>,
        task_id: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            project: project.into(),
            outcome: Outcome::Failure,
            itag: None,
            age_override: None,
            error: Some(error.into()),
        }
    }

    pub fn with_itag(mut self, itag: impl Into<String>) -> Self {
        self.itag = Some(itag.into());
        self
    }

    pub fn with_age_override(mut self, age_secs: i64) -> Self {
        self.age_override = Some(age_secs);
        self
    }

    pub fn key(&self) -> TaskKey {
        TaskKey::new(&self.project, &self.task_id)
    }
}

/// Work item on the scheduler → fetcher edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub task_id: String,
    pub project: String,
    pub url: String,
    pub method: String,
    pub fetch_params: FetchParams,
    pub priority: i32,
}

/// What the fetcher observed; transport errors are carried, never raised
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchResponse {
    pub status_code: Option<u16>,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    pub error: Option<String>,
}

impl FetchResponse {
    pub fn from_error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// True when the transport succeeded and the status is not 4xx/5xx
    pub fn is_ok(&self) -> bool {
        self.error.is_none() && self.status_code.map_or(false, |code| code < 400)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(String::as_str)
    }
}

/// Work item on the fetcher → processor edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchOutcome {
    pub task: FetchRequest,
    pub fetch_result: FetchResponse,
}

/// Final extracted record on the processor → result sink edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub project: String,
    pub task_id: String,
    pub url: String,
    pub extracted_payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_new_task_message() {
        let msg = ControlMessage::from_json(
            r#"{"type": "new_task", "project": "p", "url": "https://example.com/", "priority": 3, "force_update": true}"#,
        )
        .unwrap();

        match msg {
            ControlMessage::NewTask(task) => {
                assert_eq!(task.project, "p");
                assert_eq!(task.priority, 3);
                assert!(task.force_update);
                assert!(task.itag.is_none());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_decode_status_report_message() {
        let msg = ControlMessage::from_json(
            r#"{"type": "status_report", "project": "p", "task_id": "t", "outcome": "failure", "error": "timeout"}"#,
        )
        .unwrap();

        assert_eq!(
            msg,
            ControlMessage::StatusReport(StatusReport::failure("p", "t", "timeout"))
        );
    }

    #[test]
    fn test_decode_rejects_unknown_shape() {
        assert!(ControlMessage::from_json(r#"{"type": "pause", "project": "p"}"#).is_err());
        assert!(ControlMessage::from_json(r#"{"type": "status_report", "project": "p"}"#).is_err());
    }

    #[test]
    fn test_reports_outrank_submissions() {
        let report = ControlMessage::StatusReport(StatusReport::success("p", "t"));
        let submit = ControlMessage::NewTask(NewTask::new("p", "https://example.com/"));
        assert!(report.queue_priority() > submit.queue_priority());
    }

    #[test]
    fn test_fetch_response_is_ok() {
        let mut response = FetchResponse {
            status_code: Some(200),
            ..FetchResponse::default()
        };
        assert!(response.is_ok());

        response.status_code = Some(404);
        assert!(!response.is_ok());

        assert!(!FetchResponse::from_error("connection refused").is_ok());
    }
}
