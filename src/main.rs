//! Sumi-Dispatch main entry point
//!
//! This is the command-line interface for the Sumi-Dispatch crawl pipeline.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use sumi_dispatch::config::{load_config_with_hash, Config};
use sumi_dispatch::crawler::{seed_tasks, HttpFetcher, LinkProcessor, Pipeline};
use sumi_dispatch::project::MemoryProjectRegistry;
use sumi_dispatch::storage::{open_storage, TaskStore};
use sumi_dispatch::TaskStatus;
use tracing_subscriber::EnvFilter;

/// Sumi-Dispatch: a crawl scheduling and dispatch pipeline
///
/// Schedules crawl tasks per project with rate limiting, retries and
/// re-crawl periods, fetches them over HTTP, follows links and stores the
/// extracted results.
#[derive(Parser, Debug)]
#[command(name = "sumi-dispatch")]
#[command(version = "1.0.0")]
#[command(about = "A crawl scheduling and dispatch pipeline", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be scheduled without running
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show per-project task counts from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long, value_name = "SECS", conflicts_with_all = ["dry_run", "stats"])]
    run_for: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_run(config, cli.run_for).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_dispatch=info,warn"),
            1 => EnvFilter::new("sumi_dispatch=debug,info"),
            2 => EnvFilter::new("sumi_dispatch=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows the validated configuration
fn handle_dry_run(config: &Config) {
    println!("=== Sumi-Dispatch Dry Run ===\n");

    let scheduler = &config.scheduler;
    println!("Scheduler:");
    println!("  Tick interval: {}ms", scheduler.tick_interval_ms);
    println!("  In-flight timeout: {}s", scheduler.inflight_timeout_secs);
    println!(
        "  Retry backoff: {}s doubling up to {}s, {} retries by default",
        scheduler.backoff_base_secs, scheduler.max_backoff_secs, scheduler.default_retries
    );
    println!(
        "  Max dispatches per cycle: {}",
        scheduler.max_dispatch_per_cycle
    );

    println!("\nQueues:");
    println!("  control: {}", config.queues.control_capacity);
    println!("  fetch: {}", config.queues.fetch_capacity);
    println!("  process: {}", config.queues.process_capacity);
    println!("  result: {}", config.queues.result_capacity);

    println!("\nWorkers:");
    println!(
        "  Fetchers: {} (timeout {}s)",
        config.fetcher.workers, config.fetcher.timeout_secs
    );
    println!("  Processors: {}", config.processor.workers);
    println!("  User agent: {}", config.user_agent.header_value());

    println!("\nStorage:");
    println!("  Database: {}", config.storage.database_path);

    println!("\nProjects ({}):", config.projects.len());
    for entry in &config.projects {
        println!(
            "  - {} [{}] rate={}/s burst={} ({} seeds)",
            entry.name,
            entry.status,
            entry.rate,
            entry.burst,
            entry.seeds.len()
        );
        for seed in &entry.seeds {
            println!("    * {}", seed);
        }
    }

    println!("\n✓ Configuration is valid");
    println!(
        "✓ Would submit {} seed tasks",
        seed_tasks(&config.projects).len()
    );
}

/// Handles the --stats mode: per-project task counts by status
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    let path = PathBuf::from(&config.storage.database_path);
    println!("Database: {}\n", path.display());

    let storage = open_storage(&path).context("Failed to open task database")?;

    let mut projects = storage.list_task_projects()?;
    for entry in &config.projects {
        if !projects.contains(&entry.name) {
            projects.push(entry.name.clone());
        }
    }
    projects.sort();

    println!(
        "{:<24} {:>8} {:>8} {:>8} {:>8} {:>8}",
        "project", "active", "success", "failed", "bad", "results"
    );
    for project in projects {
        let counts = storage.count_by_status(&project)?;
        let get = |status: TaskStatus| counts.get(&status).copied().unwrap_or(0);
        println!(
            "{:<24} {:>8} {:>8} {:>8} {:>8} {:>8}",
            project,
            get(TaskStatus::Active),
            get(TaskStatus::Success),
            get(TaskStatus::Failed),
            get(TaskStatus::Bad),
            storage.count_results(&project)?
        );
    }

    Ok(())
}

/// Handles the main mode: runs the pipeline until Ctrl-C or `--run-for`
async fn handle_run(config: Config, run_for: Option<u64>) -> anyhow::Result<()> {
    let storage = Arc::new(
        open_storage(std::path::Path::new(&config.storage.database_path))
            .context("Failed to open task database")?,
    );
    let registry = Arc::new(
        MemoryProjectRegistry::from_entries(&config.projects)
            .context("Failed to register projects")?,
    );
    let fetcher = HttpFetcher::new(&config.user_agent, &config.fetcher)
        .context("Failed to build HTTP client")?;
    let processor = LinkProcessor::new(config.processor.clone());

    let pipeline = Pipeline::start(
        &config,
        storage.clone(),
        storage,
        registry,
        Arc::new(fetcher),
        Arc::new(processor),
    );

    let seeds = seed_tasks(&config.projects);
    tracing::info!("Submitting {} seed tasks", seeds.len());
    for task in seeds {
        pipeline.submit(task).await?;
    }

    match run_for {
        Some(secs) => {
            tracing::info!("Running for {} seconds", secs);
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted"),
            }
        }
        None => {
            tracing::info!("Running until Ctrl-C");
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
        }
    }

    let report = pipeline.shutdown().await?;
    for (name, stats) in &report.queues {
        tracing::info!(
            "Queue {}: {} puts, {} gets, {} dropped, {} left",
            name,
            stats.puts,
            stats.gets,
            stats.dropped,
            stats.len
        );
    }
    Ok(())
}
