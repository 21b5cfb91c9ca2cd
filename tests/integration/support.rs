use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use sumi_dispatch::config::{parse_config, Config};
use sumi_dispatch::crawler::{HttpFetcher, LinkProcessor, Pipeline};
use sumi_dispatch::project::MemoryProjectRegistry;
use sumi_dispatch::storage::{open_storage, SqliteStorage, TaskStore};
use sumi_dispatch::TaskStatus;

/// Builds a validated configuration for a single project `site`
pub fn create_test_config(db_path: &Path, status: &str, seeds: &[String]) -> Config {
    let seeds = seeds
        .iter()
        .map(|seed| format!("\"{}\"", seed))
        .collect::<Vec<_>>()
        .join(", ");

    let toml = format!(
        r#"
[scheduler]
tick-interval-ms = 50
backoff-base-secs = 1
max-backoff-secs = 1
default-retries = 1
project-refresh-secs = 1

[queues]
fetch-capacity = 10
process-capacity = 10

[fetcher]
workers = 2
timeout-secs = 5

[user-agent]
crawler-name = "TestBot"
crawler-version = "1.0.0"
contact-url = "https://example.com/contact"
contact-email = "test@example.com"

[processor]
workers = 2

[storage]
database-path = "{}"

[[project]]
name = "site"
status = "{}"
rate = 50.0
burst = 50.0
seeds = [{}]
"#,
        db_path.display(),
        status,
        seeds
    );

    parse_config(&toml).expect("test config should be valid")
}

/// Starts a pipeline with the HTTP fetcher and the link processor
pub fn start_pipeline(
    config: &Config,
    storage: Arc<SqliteStorage>,
) -> (Pipeline, Arc<MemoryProjectRegistry>) {
    let registry = Arc::new(
        MemoryProjectRegistry::from_entries(&config.projects).expect("projects should register"),
    );
    let fetcher = HttpFetcher::new(&config.user_agent, &config.fetcher).expect("client");
    let processor = LinkProcessor::new(config.processor.clone());

    let pipeline = Pipeline::start(
        config,
        storage.clone(),
        storage,
        registry.clone(),
        Arc::new(fetcher),
        Arc::new(processor),
    );
    (pipeline, registry)
}

pub fn open_test_storage(path: &Path) -> Arc<SqliteStorage> {
    Arc::new(open_storage(path).expect("Failed to open DB"))
}

/// Number of tasks of `site` in the given status
pub fn count(storage: &SqliteStorage, status: TaskStatus) -> u64 {
    storage
        .count_by_status("site")
        .expect("Failed to count tasks")
        .get(&status)
        .copied()
        .unwrap_or(0)
}

/// Polls `check` until it holds or `timeout` elapses
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
