use crate::project::ProjectStatus;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Sumi-Dispatch
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub queues: QueueConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    pub storage: StorageConfig,
    #[serde(default, rename = "project")]
    pub projects: Vec<ProjectEntry>,
}

/// Scheduling loop tuning knobs
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SchedulerConfig {
    /// Upper bound on the idle wait between scheduling cycles (milliseconds)
    pub tick_interval_ms: u64,

    /// In-flight tasks without a report after this long are treated as failed
    pub inflight_timeout_secs: u64,

    /// Base delay of the retry backoff (seconds)
    pub backoff_base_secs: u64,

    /// Ceiling of the retry backoff (seconds)
    pub max_backoff_secs: u64,

    /// Retry budget for submissions that do not carry their own
    pub default_retries: u32,

    /// Maximum number of dispatches in a single scheduling cycle
    pub max_dispatch_per_cycle: usize,

    /// Maximum pending tasks per project, 0 for unlimited
    pub inqueue_limit: usize,

    /// How often the project registry is polled for changes (seconds)
    pub project_refresh_secs: u64,

    /// Attempts made for a single task store write before giving up
    pub store_retry_attempts: u32,

    /// Base delay between task store write attempts (milliseconds)
    pub store_retry_base_ms: u64,

    /// How often the scheduler logs its counters (seconds)
    pub stats_interval_secs: u64,
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn inflight_timeout(&self) -> Duration {
        Duration::from_secs(self.inflight_timeout_secs)
    }

    pub fn project_refresh(&self) -> Duration {
        Duration::from_secs(self.project_refresh_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            inflight_timeout_secs: 300,
            backoff_base_secs: 30,
            max_backoff_secs: 3600,
            default_retries: 3,
            max_dispatch_per_cycle: 1000,
            inqueue_limit: 0,
            project_refresh_secs: 5,
            store_retry_attempts: 5,
            store_retry_base_ms: 100,
            stats_interval_secs: 60,
        }
    }
}

/// Capacities of the four pipeline edges
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct QueueConfig {
    pub control_capacity: usize,
    pub fetch_capacity: usize,
    pub process_capacity: usize,
    pub result_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            control_capacity: 1000,
            fetch_capacity: 100,
            process_capacity: 100,
            result_capacity: 1000,
        }
    }
}

/// Fetcher pool configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FetcherConfig {
    /// Number of concurrent fetch workers
    pub workers: usize,

    /// Default request timeout (seconds)
    pub timeout_secs: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            timeout_secs: 30,
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Formats the header value: `Name/Version (+ContactURL; ContactEmail)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Processor pool configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ProcessorConfig {
    /// Number of concurrent processor workers
    pub workers: usize,

    /// Whether links found on pages are submitted as new tasks
    pub follow_links: bool,

    /// Only follow links that stay on the host of the page they were found on
    pub same_host_only: bool,

    /// Maximum number of links followed from a single page
    pub max_links_per_page: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            follow_links: true,
            same_host_only: true,
            max_links_per_page: 100,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// A project to register at startup
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectEntry {
    pub name: String,

    #[serde(default = "default_project_status")]
    pub status: ProjectStatus,

    /// Dispatches per second
    pub rate: f64,

    /// Token bucket size
    pub burst: f64,

    /// Priority given to seed tasks
    #[serde(default)]
    pub priority: i32,

    /// Seed URLs submitted when the pipeline starts
    #[serde(default)]
    pub seeds: Vec<String>,
}

fn default_project_status() -> ProjectStatus {
    ProjectStatus::Running
}
