use crate::task::id::{compute_task_id, normalize_url};
use crate::task::message::FetchRequest;
use crate::task::{TaskError, TaskStatus};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Ten years; longer re-crawl periods are clamped
pub(crate) const MAX_AGE_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// HTTP methods a task may use
const METHODS: &[&str] = &["GET", "HEAD", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"];

/// Request parameters beyond method and URL
///
/// Opaque to the scheduler apart from taking part in the task id, so the
/// headers are kept in a sorted map to give a canonical serialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchParams {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    /// Per-request timeout override (seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl FetchParams {
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Deterministic JSON form used for hashing and persistence
    pub fn canonical_json(&self) -> String {
        // Serializing plain strings and maps cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Scheduling metadata of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    /// Remaining retry budget
    pub retries: u32,

    /// Number of retries already consumed
    pub retried: u32,

    /// Earliest instant the task may be dispatched
    pub exetime: DateTime<Utc>,

    /// Re-crawl period in seconds; 0 or negative disables age-based re-crawl
    pub age: i64,

    /// Fingerprint of the last known content version
    pub itag: Option<String>,
}

impl Schedule {
    /// The re-crawl period, if age-based re-crawl is enabled
    pub fn age_duration(&self) -> Option<Duration> {
        (self.age > 0).then(|| Duration::seconds(self.age.min(MAX_AGE_SECS)))
    }
}

/// Identity of a task: task ids are unique within a project
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKey {
    pub project: String,
    pub task_id: String,
}

impl TaskKey {
    pub fn new(project: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            task_id: task_id.into(),
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.project, self.task_id)
    }
}

/// The unit of work tracked by the scheduler and the task store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub project: String,
    pub url: String,
    pub method: String,
    pub fetch_params: FetchParams,

    /// Higher values are dispatched first
    pub priority: i32,
    pub schedule: Schedule,
    pub status: TaskStatus,

    /// Last time the task was dispatched
    pub lastcrawltime: Option<DateTime<Utc>>,

    /// Last time the scheduler changed this record
    pub updatetime: DateTime<Utc>,

    /// Error message of the last failed attempt or rejection
    pub last_error: Option<String>,
}

impl Task {
    pub fn key(&self) -> TaskKey {
        TaskKey::new(&self.project, &self.task_id)
    }

    /// The descriptor handed to the fetcher pool
    pub fn to_fetch_request(&self) -> FetchRequest {
        FetchRequest {
            task_id: self.task_id.clone(),
            project: self.project.clone(),
            url: self.url.clone(),
            method: self.method.clone(),
            fetch_params: self.fetch_params.clone(),
            priority: self.priority,
        }
    }
}

/// A task submission as it arrives on the control queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub project: String,
    pub url: String,

    /// Defaults to GET
    #[serde(default)]
    pub method: Option<String>,

    #[serde(default)]
    pub fetch_params: FetchParams,

    /// Explicit id; computed from the request when absent
    #[serde(default)]
    pub task_id: Option<String>,

    #[serde(default)]
    pub priority: i32,

    /// Retry budget; the scheduler default applies when absent
    #[serde(default)]
    pub retries: Option<u32>,

    /// Earliest dispatch time; immediately when absent
    #[serde(default)]
    pub exetime: Option<DateTime<Utc>>,

    #[serde(default)]
    pub age: i64,

    #[serde(default)]
    pub itag: Option<String>,

    /// Re-schedule even if the stored task is unchanged
    #[serde(default)]
    pub force_update: bool,

    /// Mark the task BAD and drop it from the pending set
    #[serde(default)]
    pub cancel: bool,
}

impl NewTask {
    pub fn new(project: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            url: url.into(),
            method: None,
            fetch_params: FetchParams::default(),
            task_id: None,
            priority: 0,
            retries: None,
            exetime: None,
            age: 0,
            itag: None,
            force_update: false,
            cancel: false,
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_fetch_params(mut self, params: FetchParams) -> Self {
        self.fetch_params = params;
        self
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn with_exetime(mut self, exetime: DateTime<Utc>) -> Self {
        self.exetime = Some(exetime);
        self
    }

    pub fn with_age(mut self, age_secs: i64) -> Self {
        self.age = age_secs;
        self
    }

    pub fn with_itag(mut self, itag: impl Into<String>) -> Self {
        self.itag = Some(itag.into());
        self
    }

    pub fn force_update(mut self) -> Self {
        self.force_update = true;
        self
    }

    pub fn cancel(mut self) -> Self {
        self.cancel = true;
        self
    }

    fn normalized_method(&self) -> String {
        self.method
            .as_deref()
            .unwrap_or("GET")
            .trim()
            .to_ascii_uppercase()
    }

    /// Validates the submission and builds the ACTIVE task it describes
    ///
    /// # Errors
    ///
    /// * `TaskError::MissingProject` - the project name is empty
    /// * `TaskError::InvalidUrl` - the URL does not parse as http(s)
    /// * `TaskError::InvalidMethod` - the method is not a known HTTP method
    pub fn build(&self, now: DateTime<Utc>, default_retries: u32) -> Result<Task, TaskError> {
        if self.project.trim().is_empty() {
            return Err(TaskError::MissingProject {
                url: self.url.clone(),
            });
        }

        let method = self.normalized_method();
        if !METHODS.contains(&method.as_str()) {
            return Err(TaskError::InvalidMethod(method));
        }

        let url = normalize_url(&self.url)?;
        let task_id = match &self.task_id {
            Some(id) if !id.trim().is_empty() => id.clone(),
            _ => compute_task_id(&self.project, &method, url.as_str(), &self.fetch_params),
        };

        Ok(self.assemble(task_id, url.to_string(), method, now, default_retries))
    }

    /// Builds the BAD record stored for a rejected submission
    ///
    /// Uses the raw URL for the id since it may not normalize.
    pub fn rejected(&self, now: DateTime<Utc>, default_retries: u32, reason: &TaskError) -> Task {
        let method = self.normalized_method();
        let task_id = match &self.task_id {
            Some(id) if !id.trim().is_empty() => id.clone(),
            _ => compute_task_id(&self.project, &method, self.url.trim(), &self.fetch_params),
        };

        let mut task = self.assemble(task_id, self.url.clone(), method, now, default_retries);
        task.status = TaskStatus::Bad;
        task.last_error = Some(reason.to_string());
        task
    }

    fn assemble(
        &self,
        task_id: String,
        url: String,
        method: String,
        now: DateTime<Utc>,
        default_retries: u32,
    ) -> Task {
        Task {
            task_id,
            project: self.project.clone(),
            url,
            method,
            fetch_params: self.fetch_params.clone(),
            priority: self.priority,
            schedule: Schedule {
                retries: self.retries.unwrap_or(default_retries),
                retried: 0,
                exetime: self.exetime.unwrap_or(now),
                age: self.age,
                itag: self.itag.clone(),
            },
            status: TaskStatus::Active,
            lastcrawltime: None,
            updatetime: now,
            last_error: None,
        }
    }
}
