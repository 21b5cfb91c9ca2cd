use crate::config::types::{
    Config, FetcherConfig, ProcessorConfig, ProjectEntry, QueueConfig, SchedulerConfig,
    StorageConfig, UserAgentConfig,
};
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Largest worker pool either stage may be configured with
const MAX_WORKERS: usize = 256;

/// Thirty days
const MAX_BACKOFF_CEILING_SECS: u64 = 30 * 24 * 60 * 60;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_scheduler_config(&config.scheduler)?;
    validate_queue_config(&config.queues)?;
    validate_fetcher_config(&config.fetcher)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_processor_config(&config.processor)?;
    validate_storage_config(&config.storage)?;
    validate_projects(&config.projects)?;
    Ok(())
}

fn validate_scheduler_config(config: &SchedulerConfig) -> Result<(), ConfigError> {
    if config.tick_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "tick-interval-ms must be > 0".to_string(),
        ));
    }

    if config.inflight_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "inflight-timeout-secs must be > 0".to_string(),
        ));
    }

    if config.backoff_base_secs == 0 {
        return Err(ConfigError::Validation(
            "backoff-base-secs must be > 0".to_string(),
        ));
    }

    if config.max_backoff_secs < config.backoff_base_secs {
        return Err(ConfigError::Validation(format!(
            "max-backoff-secs ({}) must be >= backoff-base-secs ({})",
            config.max_backoff_secs, config.backoff_base_secs
        )));
    }

    if config.max_backoff_secs > MAX_BACKOFF_CEILING_SECS {
        return Err(ConfigError::Validation(format!(
            "max-backoff-secs must be <= {}",
            MAX_BACKOFF_CEILING_SECS
        )));
    }

    if config.max_dispatch_per_cycle == 0 {
        return Err(ConfigError::Validation(
            "max-dispatch-per-cycle must be >= 1".to_string(),
        ));
    }

    if config.store_retry_attempts == 0 {
        return Err(ConfigError::Validation(
            "store-retry-attempts must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_queue_config(config: &QueueConfig) -> Result<(), ConfigError> {
    for (name, capacity) in [
        ("control-capacity", config.control_capacity),
        ("fetch-capacity", config.fetch_capacity),
        ("process-capacity", config.process_capacity),
        ("result-capacity", config.result_capacity),
    ] {
        if capacity == 0 {
            return Err(ConfigError::Validation(format!("{} must be >= 1", name)));
        }
    }
    Ok(())
}

fn validate_fetcher_config(config: &FetcherConfig) -> Result<(), ConfigError> {
    validate_workers("fetcher", config.workers)?;

    if config.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "fetcher timeout-secs must be > 0".to_string(),
        ));
    }

    Ok(())
}

fn validate_processor_config(config: &ProcessorConfig) -> Result<(), ConfigError> {
    validate_workers("processor", config.workers)
}

fn validate_workers(stage: &str, workers: usize) -> Result<(), ConfigError> {
    if workers < 1 || workers > MAX_WORKERS {
        return Err(ConfigError::Validation(format!(
            "{} workers must be between 1 and {}, got {}",
            stage, MAX_WORKERS, workers
        )));
    }
    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler-name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler-name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact-url: {}", e)))?;

    validate_email(&config.contact_email)
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Validates project entries: unique names, sane limits, parsable seeds
fn validate_projects(projects: &[ProjectEntry]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for entry in projects {
        if entry.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "project name cannot be empty".to_string(),
            ));
        }

        if !seen.insert(entry.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate project '{}'",
                entry.name
            )));
        }

        if !entry.rate.is_finite() || entry.rate < 0.0 {
            return Err(ConfigError::Validation(format!(
                "project '{}' rate must be >= 0, got {}",
                entry.name, entry.rate
            )));
        }

        if !entry.burst.is_finite() || entry.burst < 0.0 {
            return Err(ConfigError::Validation(format!(
                "project '{}' burst must be >= 0, got {}",
                entry.name, entry.burst
            )));
        }

        // A bucket smaller than one token never grants a dispatch
        if entry.rate > 0.0 && entry.burst < 1.0 {
            return Err(ConfigError::Validation(format!(
                "project '{}' burst must be >= 1 when rate > 0, got {}",
                entry.name, entry.burst
            )));
        }

        for seed in &entry.seeds {
            let url = Url::parse(seed).map_err(|e| {
                ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e))
            })?;

            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(ConfigError::Validation(format!(
                    "Seed URL '{}' must use HTTP or HTTPS",
                    seed
                )));
            }
        }
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    let invalid = || ConfigError::Validation(format!("Invalid contact-email: '{}'", email));

    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') || !domain.contains('.') {
        return Err(invalid());
    }

    Ok(())
}
