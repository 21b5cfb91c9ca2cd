use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration from TOML text
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Logged at startup so operators can tell which configuration a
/// scheduler instance was started with.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::ProjectStatus;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL: &str = r#"
[user-agent]
crawler-name = "TestDispatch"
crawler-version = "1.0"
contact-url = "https://example.com/about"
contact-email = "admin@example.com"

[storage]
database-path = "./dispatch.db"
"#;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_minimal_config_uses_defaults() {
        let file = create_temp_config(MINIMAL);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.scheduler.default_retries, 3);
        assert_eq!(config.scheduler.backoff_base_secs, 30);
        assert_eq!(config.queues.fetch_capacity, 100);
        assert_eq!(config.fetcher.workers, 4);
        assert!(config.processor.follow_links);
        assert!(config.projects.is_empty());
    }

    #[test]
    fn test_load_full_config() {
        let content = format!(
            r#"
[scheduler]
tick-interval-ms = 250
inflight-timeout-secs = 60
backoff-base-secs = 5
max-backoff-secs = 600
default-retries = 2

[queues]
control-capacity = 50
fetch-capacity = 10
process-capacity = 10
result-capacity = 20

[fetcher]
workers = 8
timeout-secs = 15

[processor]
workers = 3
same-host-only = false
{MINIMAL}
[[project]]
name = "news"
rate = 2.0
burst = 4.0
priority = 5
seeds = ["https://example.com/"]

[[project]]
name = "archive"
status = "paused"
rate = 0.5
burst = 1.0
"#
        );
        let file = create_temp_config(&content);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.scheduler.tick_interval_ms, 250);
        assert_eq!(config.scheduler.default_retries, 2);
        assert_eq!(config.queues.fetch_capacity, 10);
        assert_eq!(config.fetcher.workers, 8);
        assert!(!config.processor.same_host_only);
        assert_eq!(config.projects.len(), 2);
        assert_eq!(config.projects[0].status, ProjectStatus::Running);
        assert_eq!(config.projects[0].priority, 5);
        assert_eq!(config.projects[1].status, ProjectStatus::Paused);
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/dispatch.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_negative_rate_is_rejected() {
        let content = format!(
            r#"{MINIMAL}
[[project]]
name = "bad"
rate = -1.0
burst = 1.0
"#
        );
        let result = parse_config(&content);
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_compute_config_hash() {
        let file = create_temp_config("test content");

        let hash1 = compute_config_hash(file.path()).unwrap();
        let hash2 = compute_config_hash(file.path()).unwrap();

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_different_content_different_hash() {
        let file1 = create_temp_config("content 1");
        let file2 = create_temp_config("content 2");

        let hash1 = compute_config_hash(file1.path()).unwrap();
        let hash2 = compute_config_hash(file2.path()).unwrap();

        assert_ne!(hash1, hash2);
    }
}
