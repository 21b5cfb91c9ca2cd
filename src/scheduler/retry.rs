//! Exponential backoff and buffered task store writes

use crate::config::SchedulerConfig;
use crate::storage::{StorageResult, TaskStore};
use crate::task::{Task, TaskKey};
use chrono::{DateTime, Duration, Utc};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

/// Ceiling of the delay between two store write attempts
const MAX_STORE_RETRY_DELAY_MS: u64 = 60 * 60 * 1000;

/// Ceiling of the delay between two store read attempts
const MAX_STORE_READ_DELAY_MS: u64 = 60 * 1000;

/// `base * 2^n`, saturating, capped at `max`
fn exponential(base_ms: u64, max_ms: u64, n: u32) -> u64 {
    let factor = 1u64.checked_shl(n).unwrap_or(u64::MAX);
    base_ms.saturating_mul(factor).min(max_ms)
}

/// Backoff between failed fetch attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base_secs: u64,
    max_secs: u64,
}

impl RetryPolicy {
    pub fn new(base_secs: u64, max_secs: u64) -> Self {
        Self {
            base_secs,
            max_secs,
        }
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(config.backoff_base_secs, config.max_backoff_secs)
    }

    /// `min(max_backoff, base * 2^n)`
    pub fn backoff(&self, n: u32) -> Duration {
        let secs = exponential(self.base_secs, self.max_secs, n);
        Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX / 1000))
    }
}

#[derive(Debug)]
struct PendingWrite {
    task: Task,
    attempts: u32,
    next_attempt: DateTime<Utc>,
}

/// Outcome of a store write request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// Queued for a later attempt
    Deferred,
}

/// Applies task writes to the store without ever blocking the caller
///
/// A failed write is kept per task and retried with exponential backoff.
/// Only the latest version of a task is kept: a newer write supersedes the
/// buffered one, so writes for one task land in the order they were issued.
pub struct StoreWriter {
    store: Arc<dyn TaskStore>,
    pending: HashMap<TaskKey, PendingWrite>,
    max_attempts: u32,
    base_ms: u64,
    failed_writes: u64,
    abandoned_writes: u64,
}

impl StoreWriter {
    pub fn new(store: Arc<dyn TaskStore>, max_attempts: u32, base_ms: u64) -> Self {
        Self {
            store,
            pending: HashMap::new(),
            max_attempts: max_attempts.max(1),
            base_ms,
            failed_writes: 0,
            abandoned_writes: 0,
        }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Writes a task, buffering it on failure
    pub fn write(&mut self, task: &Task, now: DateTime<Utc>) -> WriteOutcome {
        let key = task.key();
        match self.store.put_task(task) {
            Ok(()) => {
                self.pending.remove(&key);
                WriteOutcome::Written
            }
            Err(e) => {
                self.failed_writes += 1;
                tracing::warn!("Task store write for {} failed: {}", key, e);
                if self.max_attempts <= 1 {
                    self.abandon(&key, 1, &e.to_string());
                    return WriteOutcome::Deferred;
                }
                self.pending.insert(
                    key,
                    PendingWrite {
                        task: task.clone(),
                        attempts: 1,
                        next_attempt: now + self.delay(0),
                    },
                );
                WriteOutcome::Deferred
            }
        }
    }

    /// Retries every buffered write that is due
    ///
    /// Returns the number of writes that succeeded.
    pub fn retry_due(&mut self, now: DateTime<Utc>) -> usize {
        let due: Vec<TaskKey> = self
            .pending
            .iter()
            .filter(|(_, write)| write.next_attempt <= now)
            .map(|(key, _)| key.clone())
            .collect();

        let mut flushed = 0;
        for key in due {
            let Some(mut write) = self.pending.remove(&key) else {
                continue;
            };

            match self.store.put_task(&write.task) {
                Ok(()) => {
                    tracing::debug!(
                        "Task store write for {} succeeded after {} attempts",
                        key,
                        write.attempts + 1
                    );
                    flushed += 1;
                }
                Err(e) => {
                    self.failed_writes += 1;
                    write.attempts += 1;
                    if write.attempts >= self.max_attempts {
                        self.abandon(&key, write.attempts, &e.to_string());
                        continue;
                    }
                    write.next_attempt = now + self.delay(write.attempts - 1);
                    self.pending.insert(key, write);
                }
            }
        }
        flushed
    }

    /// Attempts every buffered write once, regardless of its schedule
    pub fn flush(&mut self, now: DateTime<Utc>) -> usize {
        for write in self.pending.values_mut() {
            write.next_attempt = now;
        }
        self.retry_due(now)
    }

    /// Latest version of a task: the buffered write if any, else the store's
    ///
    /// # Errors
    ///
    /// The store error when the task is not buffered and the read fails. The
    /// caller cannot tell a missing task from an unreadable one in that case.
    pub fn lookup(&self, key: &TaskKey) -> StorageResult<Option<Task>> {
        if let Some(write) = self.pending.get(key) {
            return Ok(Some(write.task.clone()));
        }
        self.store.get_task(&key.project, &key.task_id)
    }

    pub fn next_retry_at(&self) -> Option<DateTime<Utc>> {
        self.pending.values().map(|write| write.next_attempt).min()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn failed_writes(&self) -> u64 {
        self.failed_writes
    }

    pub fn abandoned_writes(&self) -> u64 {
        self.abandoned_writes
    }

    fn delay(&self, attempt: u32) -> Duration {
        let ms = exponential(self.base_ms, MAX_STORE_RETRY_DELAY_MS, attempt);
        Duration::milliseconds(ms as i64)
    }

    fn abandon(&mut self, key: &TaskKey, attempts: u32, error: &str) {
        self.abandoned_writes += 1;
        tracing::error!(
            "Task store write for {} abandoned after {} attempt(s): {}",
            key,
            attempts,
            error
        );
    }
}

/// Schedule of store reads to retry after a failure
///
/// Reads are never abandoned: the delay doubles from `base_ms` up to one
/// minute and the key stays scheduled until [`ReadRetries::succeeded`].
#[derive(Debug)]
pub struct ReadRetries<K> {
    entries: HashMap<K, (u32, DateTime<Utc>)>,
    base_ms: u64,
}

impl<K: Eq + Hash + Clone> ReadRetries<K> {
    pub fn new(base_ms: u64) -> Self {
        Self {
            entries: HashMap::new(),
            base_ms: base_ms.max(1),
        }
    }

    /// Records a failed read and schedules the next attempt
    ///
    /// # Returns
    ///
    /// The number of consecutive failures for this key
    pub fn failed(&mut self, key: K, now: DateTime<Utc>) -> u32 {
        let entry = self.entries.entry(key).or_insert((0, now));
        let delay = exponential(self.base_ms, MAX_STORE_READ_DELAY_MS, entry.0);
        entry.0 += 1;
        entry.1 = now + Duration::milliseconds(delay as i64);
        entry.0
    }

    pub fn succeeded<Q>(&mut self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.remove(key);
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains_key(key)
    }

    /// Keys whose next attempt is due
    pub fn due(&self, now: DateTime<Utc>) -> Vec<K> {
        self.entries
            .iter()
            .filter(|(_, (_, next))| *next <= now)
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn next_attempt_at(&self) -> Option<DateTime<Utc>> {
        self.entries.values().map(|(_, next)| *next).min()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
