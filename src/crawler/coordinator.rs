//! Pipeline coordinator
//!
//! Wires the scheduler, the fetch and process worker pools and the result
//! sink together through four bounded queues:
//!
//! ```text
//!            ┌──────────── control ◀────────────┐
//!            ▼                                  │
//!       Scheduler ── fetch ──▶ Fetchers ── process ──▶ Processors ── result ──▶ Sink
//! ```
//!
//! Every stage owns its tasks; the queues are the only shared state.

use crate::config::{Config, ProjectEntry};
use crate::crawler::fetcher::{FetchWorker, Fetcher};
use crate::crawler::processor::{ProcessWorker, Processor};
use crate::crawler::sink::SinkWorker;
use crate::project::ProjectRegistry;
use crate::queue::{Queue, QueueError, QueueStats};
use crate::scheduler::{Scheduler, SchedulerStats};
use crate::storage::{ResultSink, TaskStore};
use crate::task::{ControlMessage, FetchOutcome, FetchRequest, NewTask, ResultRecord};
use crate::DispatchError;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// How long shutdown waits for each stage to stop
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Final counters of a pipeline run
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub scheduler: SchedulerStats,
    pub fetched: u64,
    pub processed: u64,
    pub results_saved: u64,
    pub queues: Vec<(String, QueueStats)>,
}

/// A running pipeline
pub struct Pipeline {
    control: Arc<Queue<ControlMessage>>,
    fetch: Arc<Queue<FetchRequest>>,
    process: Arc<Queue<FetchOutcome>>,
    results: Arc<Queue<ResultRecord>>,
    registry: Arc<dyn ProjectRegistry>,
    shutdown_tx: broadcast::Sender<()>,
    scheduler: JoinHandle<SchedulerStats>,
    fetchers: Vec<JoinHandle<u64>>,
    processors: Vec<JoinHandle<u64>>,
    sink: JoinHandle<u64>,
}

impl Pipeline {
    /// Builds the queues, recovers the scheduler and spawns every stage
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `config` - Queue capacities, pool sizes and scheduler settings
    /// * `store` - Durable task records
    /// * `sink` - Destination of result records
    /// * `registry` - Project settings
    /// * `fetcher` - Shared by every fetch worker
    /// * `processor` - Shared by every process worker
    pub fn start(
        config: &Config,
        store: Arc<dyn TaskStore>,
        sink: Arc<dyn ResultSink>,
        registry: Arc<dyn ProjectRegistry>,
        fetcher: Arc<dyn Fetcher>,
        processor: Arc<dyn Processor>,
    ) -> Self {
        let control = Arc::new(Queue::new("control", config.queues.control_capacity));
        let fetch = Arc::new(Queue::new("fetch", config.queues.fetch_capacity));
        let process = Arc::new(Queue::new("process", config.queues.process_capacity));
        let results = Arc::new(Queue::new("result", config.queues.result_capacity));

        let (shutdown_tx, _) = broadcast::channel(1);

        let mut scheduler = Scheduler::new(
            config.scheduler.clone(),
            Arc::clone(&registry),
            store,
            Arc::clone(&control),
            Arc::clone(&fetch),
        );
        scheduler.recover(Utc::now());
        let scheduler = tokio::spawn(scheduler.run(shutdown_tx.subscribe()));

        let fetchers = (0..config.fetcher.workers)
            .map(|id| {
                let worker = FetchWorker::new(
                    id,
                    Arc::clone(&fetcher),
                    Arc::clone(&fetch),
                    Arc::clone(&process),
                    shutdown_tx.subscribe(),
                );
                tokio::spawn(worker.run())
            })
            .collect();

        let processors = (0..config.processor.workers)
            .map(|id| {
                let worker = ProcessWorker::new(
                    id,
                    Arc::clone(&processor),
                    Arc::clone(&process),
                    Arc::clone(&control),
                    Arc::clone(&results),
                    shutdown_tx.subscribe(),
                );
                tokio::spawn(worker.run())
            })
            .collect();

        let sink = tokio::spawn(
            SinkWorker::new(sink, Arc::clone(&results), shutdown_tx.subscribe()).run(),
        );

        tracing::info!(
            "Pipeline started: {} fetch workers, {} process workers",
            config.fetcher.workers,
            config.processor.workers
        );

        Self {
            control,
            fetch,
            process,
            results,
            registry,
            shutdown_tx,
            scheduler,
            fetchers,
            processors,
            sink,
        }
    }

    /// Submits a task through the control queue, waiting for room
    pub async fn submit(&self, task: NewTask) -> Result<(), QueueError> {
        self.control
            .put(ControlMessage::NewTask(task), 0, None)
            .await
            .map_err(QueueError::from)
    }

    /// The scheduler's input queue, for administrative injection
    pub fn control(&self) -> &Arc<Queue<ControlMessage>> {
        &self.control
    }

    pub fn registry(&self) -> &Arc<dyn ProjectRegistry> {
        &self.registry
    }

    /// Snapshot of every queue's counters, in pipeline order
    pub fn queue_stats(&self) -> Vec<(String, QueueStats)> {
        vec![
            (self.control.name().to_string(), self.control.stats()),
            (self.fetch.name().to_string(), self.fetch.stats()),
            (self.process.name().to_string(), self.process.stats()),
            (self.results.name().to_string(), self.results.stats()),
        ]
    }

    /// Stops every stage and waits for it to finish
    ///
    /// In-flight tasks that never reported stay ACTIVE in the store and are
    /// picked up again by the next scheduler's recovery.
    ///
    /// # Errors
    ///
    /// * `DispatchError::Pipeline` - a stage panicked or did not stop in time
    pub async fn shutdown(self) -> Result<PipelineReport, DispatchError> {
        tracing::info!("Shutting down pipeline");

        // Stages may already be gone
        let _ = self.shutdown_tx.send(());
        self.control.close();
        self.fetch.close();
        self.process.close();

        let mut report = PipelineReport {
            queues: self.queue_stats(),
            ..PipelineReport::default()
        };

        report.scheduler = join_stage("scheduler", self.scheduler).await?;
        for handle in self.fetchers {
            report.fetched += join_stage("fetch worker", handle).await?;
        }
        for handle in self.processors {
            report.processed += join_stage("process worker", handle).await?;
        }

        self.results.close();
        report.results_saved = join_stage("result sink", self.sink).await?;

        tracing::info!(
            "Pipeline stopped: {} dispatched, {} fetched, {} processed, {} results saved",
            report.scheduler.dispatched,
            report.fetched,
            report.processed,
            report.results_saved
        );
        Ok(report)
    }
}

async fn join_stage<T>(name: &str, handle: JoinHandle<T>) -> Result<T, DispatchError> {
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(DispatchError::Pipeline(format!("{} panicked: {}", name, e))),
        Err(_) => Err(DispatchError::Pipeline(format!(
            "{} did not stop within {:?}",
            name, SHUTDOWN_TIMEOUT
        ))),
    }
}

/// The seed submissions of configured projects
pub fn seed_tasks(projects: &[ProjectEntry]) -> Vec<NewTask> {
    projects
        .iter()
        .flat_map(|entry| {
            entry
                .seeds
                .iter()
                .map(move |seed| NewTask::new(&entry.name, seed).with_priority(entry.priority))
        })
        .collect()
}
