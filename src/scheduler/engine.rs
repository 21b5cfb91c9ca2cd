//! The scheduling state machine
//!
//! The scheduler is the only component deciding when a task is dispatched and
//! the only writer of task status. Per task:
//!
//! ```text
//! NEW ──submit──▶ PENDING ──dispatch──▶ IN-FLIGHT ──success──▶ SUCCESS
//!                    ▲                      │   (or PENDING at now + age)
//!                    └──── retry backoff ◀──┴──failure──▶ FAILED (no retries left)
//! ```
//!
//! Every operation takes the current time explicitly; only [`Scheduler::run`]
//! reads the clock.

use crate::config::SchedulerConfig;
use crate::project::{Project, ProjectRegistry};
use crate::queue::{Queue, QueueError};
use crate::scheduler::frontier::Frontier;
use crate::scheduler::rate::RateController;
use crate::scheduler::retry::{ReadRetries, RetryPolicy, StoreWriter};
use crate::storage::{StorageResult, TaskStore};
use crate::task::{
    ControlMessage, FetchRequest, NewTask, Outcome, StatusReport, Task, TaskError, TaskKey,
    TaskStatus, MAX_AGE_SECS,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::broadcast;

fn secs(value: u64) -> Duration {
    Duration::seconds(i64::try_from(value).unwrap_or(MAX_AGE_SECS).min(MAX_AGE_SECS))
}

/// What the scheduler did with a submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// First sighting; the task is now pending
    Queued,

    /// A finished task was put back into the pending set
    Restarted,

    /// A pending task was replaced by a forced resubmission
    Updated,

    /// Forced resubmission of an in-flight task, applied after its report
    Postponed,

    /// The stored record could not be read; applied once the store answers
    Deferred,

    /// Already known and unchanged; nothing to do
    Duplicate,

    /// The task was marked BAD and removed from scheduling
    Cancelled,

    /// The project's pending set is full
    Dropped,

    /// Malformed submission
    Rejected(TaskError),
}

/// What the scheduler did with a status report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    /// The task succeeded and is done
    Completed,

    /// The task succeeded and will be crawled again at the given time
    Recrawl(DateTime<Utc>),

    /// The task failed and will be retried at the given time
    Retrying(DateTime<Utc>),

    /// The task failed with no retries left
    Failed,

    /// The task was not in flight; the report was ignored
    Stale,
}

/// Counters and gauges of a scheduler
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub submitted: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub cancelled: u64,
    pub overflowed: u64,
    pub dispatched: u64,
    pub completed: u64,
    pub retried: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub stale_reports: u64,
    pub deferred: u64,

    pub pending: usize,
    pub ready: usize,
    pub inflight: usize,
    pub parked: usize,
    pub unscanned_projects: usize,
    pub store_backlog: usize,
    pub store_failures: u64,
    pub abandoned_writes: u64,
}

#[derive(Debug)]
struct InFlight {
    task: Task,
    dispatched_at: DateTime<Utc>,
}

enum DispatchStep {
    Dispatched,
    /// No ready task or no token for this project
    Exhausted,
    /// The fetch queue cannot take more work this cycle
    Backpressure,
}

/// Single-owner scheduling loop state
///
/// Holds the pending sets, the in-flight map, the token buckets and the store
/// write buffer. Nothing here is shared: the scheduler talks to the rest of
/// the pipeline only through its control queue (input) and fetch queue
/// (output).
pub struct Scheduler {
    config: SchedulerConfig,
    registry: Arc<dyn ProjectRegistry>,
    writer: StoreWriter,
    control: Arc<Queue<ControlMessage>>,
    fetch: Arc<Queue<FetchRequest>>,

    frontier: Frontier,
    inflight: HashMap<TaskKey, InFlight>,
    postponed: HashMap<TaskKey, NewTask>,
    parked: HashMap<TaskKey, Vec<NewTask>>,
    lookup_retries: ReadRetries<TaskKey>,
    scan_retries: ReadRetries<String>,
    rates: RateController,
    retry: RetryPolicy,

    projects: BTreeMap<String, Project>,
    registry_version: Option<u64>,
    last_refresh: Option<DateTime<Utc>>,
    recovered: bool,
    rr_cursor: usize,

    stats: SchedulerStats,
}

impl Scheduler {
    /// Creates a scheduler
    ///
    /// # Arguments
    ///
    /// * `config` - Scheduling knobs
    /// * `registry` - Source of project status and rate limits
    /// * `store` - Durable task records
    /// * `control` - Queue of submissions and status reports to consume
    /// * `fetch` - Queue dispatched tasks are pushed onto
    pub fn new(
        config: SchedulerConfig,
        registry: Arc<dyn ProjectRegistry>,
        store: Arc<dyn TaskStore>,
        control: Arc<Queue<ControlMessage>>,
        fetch: Arc<Queue<FetchRequest>>,
    ) -> Self {
        let writer = StoreWriter::new(
            store,
            config.store_retry_attempts,
            config.store_retry_base_ms,
        );
        let retry = RetryPolicy::from_config(&config);
        let read_base_ms = config.store_retry_base_ms;

        Self {
            config,
            registry,
            writer,
            control,
            fetch,
            frontier: Frontier::new(),
            inflight: HashMap::new(),
            postponed: HashMap::new(),
            parked: HashMap::new(),
            lookup_retries: ReadRetries::new(read_base_ms),
            scan_retries: ReadRetries::new(read_base_ms),
            rates: RateController::new(),
            retry,
            projects: BTreeMap::new(),
            registry_version: None,
            last_refresh: None,
            recovered: false,
            rr_cursor: 0,
            stats: SchedulerStats::default(),
        }
    }

    /// Rebuilds the pending set from the task store
    ///
    /// Loads the project registry, then every ACTIVE task of every project.
    /// Tasks already tracked are skipped, so each stored task becomes
    /// pending at most once. A project whose scan fails is scanned again
    /// from [`Scheduler::run_once`] with backoff until it succeeds.
    ///
    /// # Returns
    ///
    /// The number of tasks loaded
    pub fn recover(&mut self, now: DateTime<Utc>) -> usize {
        self.refresh_projects(now);

        let names: Vec<String> = self.projects.keys().cloned().collect();
        let loaded: usize = names
            .iter()
            .map(|name| self.load_or_rescan(name, now))
            .sum();

        self.recovered = true;
        tracing::info!(
            "Recovered {} active tasks across {} projects",
            loaded,
            self.projects.len()
        );
        loaded
    }

    /// Re-reads the project registry if it changed
    ///
    /// Buckets are created or reconfigured for every project; projects that
    /// disappeared have their pending tasks dropped from memory (they stay in
    /// the store). After recovery, newly registered projects get their
    /// stored ACTIVE tasks loaded.
    pub fn refresh_projects(&mut self, now: DateTime<Utc>) {
        self.last_refresh = Some(now);

        let version = self.registry.version();
        if self.registry_version == Some(version) {
            return;
        }
        self.registry_version = Some(version);

        let mut current = BTreeMap::new();
        let mut added = Vec::new();
        for project in self.registry.list_projects() {
            self.rates
                .configure(&project.name, project.rate, project.burst);

            match self.projects.get(&project.name) {
                None => added.push(project.name.clone()),
                Some(previous) if previous.status != project.status => {
                    tracing::info!(
                        "Project {} changed from {} to {}",
                        project.name,
                        previous.status,
                        project.status
                    );
                }
                Some(_) => {}
            }
            current.insert(project.name.clone(), project);
        }

        let removed: Vec<String> = self
            .projects
            .keys()
            .filter(|name| !current.contains_key(*name))
            .cloned()
            .collect();
        for name in removed {
            let dropped = self.frontier.remove_project(&name);
            self.rates.remove(&name);
            self.scan_retries.succeeded(&name);
            tracing::info!(
                "Project {} was removed; dropped {} pending tasks",
                name,
                dropped
            );
        }

        self.projects = current;

        if self.recovered {
            for name in added {
                self.load_or_rescan(&name, now);
            }
        }
    }

    /// Handles one message from the control queue
    pub fn handle(&mut self, message: ControlMessage, now: DateTime<Utc>) {
        match message {
            ControlMessage::NewTask(submission) => {
                self.submit(submission, now);
            }
            ControlMessage::StatusReport(report) => {
                self.report(report, now);
            }
        }
    }

    /// Applies a task submission
    ///
    /// # Returns
    ///
    /// What happened to the submission; see [`SubmitOutcome`]
    pub fn submit(&mut self, submission: NewTask, now: DateTime<Utc>) -> SubmitOutcome {
        self.stats.submitted += 1;
        self.apply(submission, now)
    }

    fn apply(&mut self, submission: NewTask, now: DateTime<Utc>) -> SubmitOutcome {
        if submission.project.trim().is_empty() {
            return self.reject(TaskError::MissingProject {
                url: submission.url.clone(),
            });
        }

        if !self.projects.contains_key(&submission.project) {
            self.refresh_projects(now);
            if !self.projects.contains_key(&submission.project) {
                return self.reject(TaskError::UnknownProject(submission.project.clone()));
            }
        }

        let task = match submission.build(now, self.config.default_retries) {
            Ok(task) => task,
            Err(err) => return self.reject_as_bad(&submission, err, now),
        };
        let key = task.key();

        if submission.cancel {
            return self.cancel(task, now);
        }

        if self.inflight.contains_key(&key) {
            if submission.force_update {
                tracing::debug!("Task {} is in flight; postponing forced update", key);
                self.postponed.insert(key, submission);
                return SubmitOutcome::Postponed;
            }
            return self.duplicate(&key);
        }

        if let Some(pending) = self.frontier.get(&key.project, &key.task_id).cloned() {
            if !submission.force_update {
                return self.duplicate(&key);
            }
            let updated = restart_from(&pending, task);
            self.writer.write(&updated, now);
            self.frontier.insert(updated, now);
            tracing::debug!("Updated pending task {}", key);
            return SubmitOutcome::Updated;
        }

        if self.lookup_retries.contains(&key) {
            return self.defer(key, submission);
        }
        let stored = match self.writer.lookup(&key) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(
                    "Task store read for {} failed: {}; deferring submission",
                    key,
                    e
                );
                self.lookup_retries.failed(key.clone(), now);
                return self.defer(key, submission);
            }
        };

        match stored {
            None => {
                if self.inqueue_full(&key.project) {
                    return self.overflow(&key);
                }
                self.writer.write(&task, now);
                self.frontier.insert(task, now);
                tracing::trace!("Queued new task {}", key);
                SubmitOutcome::Queued
            }
            Some(stored) => {
                if !should_restart(&stored, &task, submission.force_update, now) {
                    return self.duplicate(&key);
                }
                if self.inqueue_full(&key.project) {
                    return self.overflow(&key);
                }
                let restarted = restart_from(&stored, task);
                self.writer.write(&restarted, now);
                self.frontier.insert(restarted, now);
                tracing::debug!("Restarted task {} (was {})", key, stored.status);
                SubmitOutcome::Restarted
            }
        }
    }

    /// Applies the completion report of an in-flight task
    pub fn report(&mut self, report: StatusReport, now: DateTime<Utc>) -> ReportOutcome {
        let key = report.key();
        let Some(entry) = self.inflight.remove(&key) else {
            self.stats.stale_reports += 1;
            tracing::debug!("Ignoring report for {} which is not in flight", key);
            return ReportOutcome::Stale;
        };

        let mut task = entry.task;
        task.updatetime = now;
        if let Some(itag) = report.itag {
            task.schedule.itag = Some(itag);
        }
        if let Some(age) = report.age_override {
            task.schedule.age = age;
        }

        let outcome = match report.outcome {
            Outcome::Success => {
                self.stats.completed += 1;
                task.last_error = None;
                task.schedule.retries += task.schedule.retried;
                task.schedule.retried = 0;

                if let Some(age) = task.schedule.age_duration() {
                    task.schedule.exetime = now + age;
                    tracing::debug!(
                        "Task {} done; next crawl at {}",
                        key,
                        task.schedule.exetime
                    );
                    ReportOutcome::Recrawl(task.schedule.exetime)
                } else {
                    task.status = TaskStatus::Success;
                    tracing::debug!("Task {} done", key);
                    ReportOutcome::Completed
                }
            }
            Outcome::Failure => {
                task.last_error = Some(
                    report
                        .error
                        .unwrap_or_else(|| "fetch or process failed".to_string()),
                );

                if task.schedule.retries > 0 {
                    let attempt = task.schedule.retried;
                    task.schedule.retries -= 1;
                    task.schedule.retried += 1;
                    task.schedule.exetime = now + self.retry.backoff(attempt);
                    self.stats.retried += 1;
                    tracing::debug!(
                        "Task {} failed ({}); retry {} at {}",
                        key,
                        task.last_error.as_deref().unwrap_or_default(),
                        task.schedule.retried,
                        task.schedule.exetime
                    );
                    ReportOutcome::Retrying(task.schedule.exetime)
                } else {
                    task.status = TaskStatus::Failed;
                    self.stats.failed += 1;
                    tracing::info!(
                        "Task {} failed permanently: {}",
                        key,
                        task.last_error.as_deref().unwrap_or_default()
                    );
                    ReportOutcome::Failed
                }
            }
        };

        self.writer.write(&task, now);
        if task.status == TaskStatus::Active && self.projects.contains_key(&task.project) {
            self.frontier.insert(task, now);
        }

        if let Some(resubmission) = self.postponed.remove(&key) {
            self.submit(resubmission, now);
        }

        outcome
    }

    /// Moves ready tasks to the fetch queue
    ///
    /// Projects are visited round-robin, one task per project per round, each
    /// in priority order. A project drops out of the cycle when it has no
    /// ready task or no token left; the whole cycle stops when the fetch
    /// queue is full or `max-dispatch-per-cycle` is reached.
    ///
    /// # Returns
    ///
    /// The number of tasks dispatched
    pub fn dispatch_ready(&mut self, now: DateTime<Utc>) -> usize {
        self.frontier.promote(now);

        let mut candidates: Vec<String> = self
            .frontier
            .ready_projects()
            .into_iter()
            .filter(|name| {
                self.projects
                    .get(name)
                    .map_or(false, |project| project.status.allows_dispatch())
            })
            .collect();
        if candidates.is_empty() {
            return 0;
        }

        let start = self.rr_cursor % candidates.len();
        candidates.rotate_left(start);
        self.rr_cursor = self.rr_cursor.wrapping_add(1);

        let limit = self.config.max_dispatch_per_cycle;
        let mut dispatched = 0;

        while !candidates.is_empty() && dispatched < limit {
            let mut next_round = Vec::with_capacity(candidates.len());
            for project in candidates {
                if dispatched >= limit {
                    break;
                }
                match self.dispatch_one(&project, now) {
                    DispatchStep::Dispatched => {
                        dispatched += 1;
                        next_round.push(project);
                    }
                    DispatchStep::Exhausted => {}
                    DispatchStep::Backpressure => {
                        tracing::debug!(
                            "Fetch queue full after {} dispatches; pausing dispatch",
                            dispatched
                        );
                        return dispatched;
                    }
                }
            }
            candidates = next_round;
        }

        dispatched
    }

    fn dispatch_one(&mut self, project: &str, now: DateTime<Utc>) -> DispatchStep {
        if self.fetch.is_full() {
            return DispatchStep::Backpressure;
        }
        if self.frontier.peek_ready(project).is_none() {
            return DispatchStep::Exhausted;
        }
        if !self.rates.try_acquire(project, 1, now) {
            return DispatchStep::Exhausted;
        }

        let Some(mut task) = self.frontier.pop_ready(project) else {
            self.rates.refund(project, 1);
            return DispatchStep::Exhausted;
        };

        if let Err(rejected) = self.fetch.try_put(task.to_fetch_request(), task.priority) {
            tracing::debug!("Fetch queue rejected {}: {}", task.key(), rejected.reason);
            self.rates.refund(project, 1);
            self.frontier.insert(task, now);
            return DispatchStep::Backpressure;
        }

        task.lastcrawltime = Some(now);
        task.updatetime = now;
        self.writer.write(&task, now);

        tracing::trace!("Dispatched {} ({})", task.key(), task.url);
        self.stats.dispatched += 1;
        self.inflight.insert(
            task.key(),
            InFlight {
                task,
                dispatched_at: now,
            },
        );
        DispatchStep::Dispatched
    }

    /// Fails every in-flight task whose report is overdue
    ///
    /// # Returns
    ///
    /// The number of tasks that timed out
    pub fn sweep_inflight(&mut self, now: DateTime<Utc>) -> usize {
        let timeout = secs(self.config.inflight_timeout_secs);
        let expired: Vec<TaskKey> = self
            .inflight
            .iter()
            .filter(|(_, entry)| entry.dispatched_at + timeout <= now)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.stats.timed_out += 1;
            tracing::warn!(
                "Task {} got no status report within {}s; treating it as failed",
                key,
                self.config.inflight_timeout_secs
            );
            self.report(
                StatusReport::failure(
                    &key.project,
                    &key.task_id,
                    "no status report within the in-flight timeout",
                ),
                now,
            );
        }
        expired.len()
    }

    /// The instant the scheduling loop should wake up at the latest
    ///
    /// The earliest of: the next delayed task, the next token for a running
    /// project with ready work, the next in-flight deadline, the next store
    /// write or read retry, the next registry refresh, and one tick from now.
    pub fn next_wakeup(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let tick = Duration::milliseconds(
            i64::try_from(self.config.tick_interval_ms).unwrap_or(i64::MAX / 1000),
        );
        let mut candidates = vec![now + tick];

        candidates.extend(self.frontier.next_exetime());

        if !self.fetch.is_full() {
            for project in self.frontier.ready_projects() {
                let running = self
                    .projects
                    .get(&project)
                    .map_or(false, |p| p.status.allows_dispatch());
                if running {
                    if let Some(wait) = self.rates.time_until_available(&project, now) {
                        candidates.push(now + wait);
                    }
                }
            }
        }

        let timeout = secs(self.config.inflight_timeout_secs);
        candidates.extend(
            self.inflight
                .values()
                .map(|entry| entry.dispatched_at + timeout)
                .min(),
        );
        candidates.extend(self.writer.next_retry_at());
        candidates.extend(self.lookup_retries.next_attempt_at());
        candidates.extend(self.scan_retries.next_attempt_at());
        candidates.extend(
            self.last_refresh
                .map(|last| last + secs(self.config.project_refresh_secs)),
        );

        candidates
            .into_iter()
            .min()
            .map_or(now, |wake| wake.max(now))
    }

    /// One scheduling cycle
    ///
    /// Drains the control queue, refreshes projects when due, retries store
    /// writes and failed reads, sweeps in-flight tasks and dispatches ready
    /// ones.
    ///
    /// # Returns
    ///
    /// The number of tasks dispatched
    pub fn run_once(&mut self, now: DateTime<Utc>) -> usize {
        self.drain_control(now);

        let refresh_due = self
            .last_refresh
            .map_or(true, |last| last + secs(self.config.project_refresh_secs) <= now);
        if refresh_due {
            self.refresh_projects(now);
        }

        self.writer.retry_due(now);
        self.retry_store_reads(now);
        self.sweep_inflight(now);
        self.dispatch_ready(now)
    }

    /// Runs the scheduling loop until shutdown
    ///
    /// Between cycles the loop waits on the control queue until the next
    /// message or [`Scheduler::next_wakeup`], whichever comes first.
    /// Pending store writes are flushed once more before returning.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> SchedulerStats {
        let control = Arc::clone(&self.control);
        let stats_interval = secs(self.config.stats_interval_secs);
        let mut last_stats = Utc::now();

        tracing::info!(
            "Scheduler started with {} projects, {} pending tasks",
            self.projects.len(),
            self.frontier.len()
        );

        loop {
            let now = Utc::now();
            self.run_once(now);

            if self.config.stats_interval_secs > 0 && now - last_stats >= stats_interval {
                self.log_stats();
                last_stats = now;
            }

            let wait = (self.next_wakeup(now) - now)
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);

            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Scheduler received shutdown signal");
                    break;
                }
                received = control.get(Some(wait)) => match received {
                    Ok(message) => self.handle(message, Utc::now()),
                    Err(QueueError::Closed) => {
                        tracing::info!("Control queue closed; stopping scheduler");
                        break;
                    }
                    Err(_) => {}
                },
            }
        }

        let flushed = self.writer.flush(Utc::now());
        if flushed > 0 {
            tracing::info!("Flushed {} buffered task writes", flushed);
        }
        if self.writer.pending_len() > 0 {
            tracing::warn!(
                "{} task writes could not be flushed before shutdown",
                self.writer.pending_len()
            );
        }

        self.log_stats();
        self.stats()
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            pending: self.frontier.len(),
            ready: self.frontier.ready_len(),
            inflight: self.inflight.len(),
            parked: self.parked.values().map(Vec::len).sum(),
            unscanned_projects: self.scan_retries.len(),
            store_backlog: self.writer.pending_len(),
            store_failures: self.writer.failed_writes(),
            abandoned_writes: self.writer.abandoned_writes(),
            ..self.stats.clone()
        }
    }

    pub fn pending_task(&self, project: &str, task_id: &str) -> Option<&Task> {
        self.frontier.get(project, task_id)
    }

    pub fn is_inflight(&self, project: &str, task_id: &str) -> bool {
        self.inflight.contains_key(&TaskKey::new(project, task_id))
    }

    pub fn inflight_len(&self) -> usize {
        self.inflight.len()
    }

    pub fn pending_len(&self) -> usize {
        self.frontier.len()
    }

    fn drain_control(&mut self, now: DateTime<Utc>) {
        let budget = self.control.capacity();
        for _ in 0..budget {
            match self.control.try_get() {
                Ok(message) => self.handle(message, now),
                Err(_) => break,
            }
        }
    }

    fn load_or_rescan(&mut self, project: &str, now: DateTime<Utc>) -> usize {
        match self.load_active(project, now) {
            Ok(loaded) => {
                self.scan_retries.succeeded(project);
                loaded
            }
            Err(e) => {
                let attempts = self.scan_retries.failed(project.to_string(), now);
                tracing::warn!(
                    "Could not load active tasks of {} (attempt {}): {}",
                    project,
                    attempts,
                    e
                );
                0
            }
        }
    }

    fn load_active(&mut self, project: &str, now: DateTime<Utc>) -> StorageResult<usize> {
        let tasks = self.writer.store().scan_active(project)?;

        let mut loaded = 0;
        for task in tasks {
            let key = task.key();
            if self.inflight.contains_key(&key)
                || self.frontier.contains(&key.project, &key.task_id)
            {
                continue;
            }
            self.frontier.insert(task, now);
            loaded += 1;
        }

        if loaded > 0 {
            tracing::info!("Loaded {} active tasks of project {}", loaded, project);
        }
        Ok(loaded)
    }

    /// Rescans projects and replays submissions whose store read failed
    fn retry_store_reads(&mut self, now: DateTime<Utc>) {
        for project in self.scan_retries.due(now) {
            if self.projects.contains_key(&project) {
                self.load_or_rescan(&project, now);
            } else {
                self.scan_retries.succeeded(&project);
            }
        }

        for key in self.lookup_retries.due(now) {
            if let Err(e) = self.writer.lookup(&key) {
                let attempts = self.lookup_retries.failed(key.clone(), now);
                tracing::debug!(
                    "Task store read for {} failed again ({} attempts): {}",
                    key,
                    attempts,
                    e
                );
                continue;
            }

            self.lookup_retries.succeeded(&key);
            let submissions = self.parked.remove(&key).unwrap_or_default();
            tracing::debug!(
                "Task store readable for {}; applying {} deferred submissions",
                key,
                submissions.len()
            );
            for submission in submissions {
                self.apply(submission, now);
            }
        }
    }

    fn defer(&mut self, key: TaskKey, submission: NewTask) -> SubmitOutcome {
        self.stats.deferred += 1;
        self.parked.entry(key).or_default().push(submission);
        SubmitOutcome::Deferred
    }

    fn cancel(&mut self, submitted: Task, now: DateTime<Utc>) -> SubmitOutcome {
        let key = submitted.key();
        self.postponed.remove(&key);
        self.parked.remove(&key);
        self.lookup_retries.succeeded(&key);

        let mut task = self
            .frontier
            .remove(&key.project, &key.task_id)
            .or_else(|| self.inflight.remove(&key).map(|entry| entry.task))
            .or_else(|| self.writer.lookup(&key).ok().flatten())
            .unwrap_or(submitted);

        task.status = TaskStatus::Bad;
        task.last_error = Some("cancelled".to_string());
        task.updatetime = now;
        self.writer.write(&task, now);

        self.stats.cancelled += 1;
        tracing::info!("Cancelled task {}", key);
        SubmitOutcome::Cancelled
    }

    fn reject(&mut self, err: TaskError) -> SubmitOutcome {
        self.stats.rejected += 1;
        tracing::warn!("Rejected submission: {}", err);
        SubmitOutcome::Rejected(err)
    }

    fn reject_as_bad(
        &mut self,
        submission: &NewTask,
        err: TaskError,
        now: DateTime<Utc>,
    ) -> SubmitOutcome {
        let record = submission.rejected(now, self.config.default_retries, &err);
        let key = record.key();

        // Never clobber a live task that happens to share the id
        if !self.inflight.contains_key(&key) && !self.frontier.contains(&key.project, &key.task_id)
        {
            self.writer.write(&record, now);
        }
        self.reject(err)
    }

    fn duplicate(&mut self, key: &TaskKey) -> SubmitOutcome {
        self.stats.duplicates += 1;
        tracing::trace!("Ignoring duplicate submission of {}", key);
        SubmitOutcome::Duplicate
    }

    fn inqueue_full(&self, project: &str) -> bool {
        let limit = self.config.inqueue_limit;
        limit > 0 && self.frontier.project_len(project) >= limit
    }

    fn overflow(&mut self, key: &TaskKey) -> SubmitOutcome {
        self.stats.overflowed += 1;
        tracing::warn!(
            "Project {} has {} pending tasks; dropping {}",
            key.project,
            self.config.inqueue_limit,
            key
        );
        SubmitOutcome::Dropped
    }

    fn log_stats(&self) {
        let stats = self.stats();
        tracing::info!(
            "Scheduler: {} pending ({} ready), {} in flight, {} dispatched, {} done, {} retried, {} failed, {} timed out, {} deferred, store backlog {}, {} writes abandoned",
            stats.pending,
            stats.ready,
            stats.inflight,
            stats.dispatched,
            stats.completed,
            stats.retried,
            stats.failed,
            stats.timed_out,
            stats.parked,
            stats.store_backlog,
            stats.abandoned_writes
        );
    }
}

/// Decides whether a resubmission puts a known task back into the pending set
fn should_restart(stored: &Task, submitted: &Task, force: bool, now: DateTime<Utc>) -> bool {
    if force || stored.status == TaskStatus::Active {
        return true;
    }

    if let Some(itag) = &submitted.schedule.itag {
        if stored.schedule.itag.as_ref() != Some(itag) {
            return true;
        }
    }

    submitted
        .schedule
        .age_duration()
        .or_else(|| stored.schedule.age_duration())
        .map_or(false, |age| {
            stored.lastcrawltime.map_or(true, |last| last + age <= now)
        })
}

/// The submitted task, carrying over what the previous version knew
fn restart_from(previous: &Task, mut submitted: Task) -> Task {
    submitted.lastcrawltime = previous.lastcrawltime;
    if submitted.schedule.itag.is_none() {
        submitted.schedule.itag = previous.schedule.itag.clone();
    }
    submitted
}
