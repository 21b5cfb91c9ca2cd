//! Crawler module: the stages downstream of the scheduler
//!
//! This module contains the worker side of the pipeline, including:
//! - HTTP fetching (`Fetcher`, `HttpFetcher`) and the fetch worker pool
//! - Page processing (`Processor`, `LinkProcessor`) and the process worker pool
//! - The result sink worker
//! - The `Pipeline` coordinator wiring everything together

mod coordinator;
mod fetcher;
mod parser;
mod processor;
mod sink;

pub use coordinator::{seed_tasks, Pipeline, PipelineReport};
pub use fetcher::{build_http_client, FetchError, FetchWorker, Fetcher, HttpFetcher};
pub use parser::{parse_html, ParsedPage};
pub use processor::{LinkProcessor, ProcessOutput, ProcessWorker, Processor};
pub use sink::SinkWorker;
