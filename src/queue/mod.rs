//! Bounded priority queues connecting the pipeline stages
//!
//! One [`Queue`] instance sits on every pipeline edge. Items pop in strict
//! priority order (higher first) and, within one priority, in insertion order.
//! A full queue is the pipeline's backpressure signal: producers either wait
//! (`put`) or give up (`try_put`, `put_or_drop`) depending on the edge.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Errors raised by queue operations
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is full")]
    Full,

    #[error("queue is empty")]
    Empty,

    #[error("queue is closed")]
    Closed,
}

/// A rejected put, handing the item back to the producer
pub struct PutError<T> {
    pub reason: QueueError,
    pub item: T,
}

impl<T> fmt::Debug for PutError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PutError")
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

impl<T> fmt::Display for PutError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "put rejected: {}", self.reason)
    }
}

impl<T> std::error::Error for PutError<T> {}

impl<T> From<PutError<T>> for QueueError {
    fn from(err: PutError<T>) -> Self {
        err.reason
    }
}

/// Counters describing a queue's lifetime traffic
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub len: usize,
    pub capacity: usize,
    pub puts: u64,
    pub gets: u64,
    /// Items discarded by `put_or_drop` on a full queue
    pub dropped: u64,
    /// Items that expired before anyone popped them
    pub expired: u64,
}

struct Envelope<T> {
    priority: i32,
    seq: u64,
    expires_at: Option<Instant>,
    payload: T,
}

impl<T> Envelope<T> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |deadline| deadline <= now)
    }
}

// Max-heap order: higher priority first, then lower sequence number first
impl<T> Ord for Envelope<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<T> PartialOrd for Envelope<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> PartialEq for Envelope<T> {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl<T> Eq for Envelope<T> {}

struct QueueState<T> {
    heap: BinaryHeap<Envelope<T>>,
    next_seq: u64,
    closed: bool,
    stats: QueueStats,
}

/// Bounded multi-producer/multi-consumer priority queue
///
/// Shared between tasks behind an `Arc`. Blocking operations suspend the
/// calling task (no busy-waiting) until space or data is available, the
/// optional timeout fires, or the queue is closed.
pub struct Queue<T> {
    name: String,
    capacity: usize,
    state: Mutex<QueueState<T>>,
    not_empty: Notify,
    not_full: Notify,
}

impl<T> Queue<T> {
    /// Creates a queue holding at most `capacity` items (minimum 1)
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            name: name.into(),
            capacity,
            state: Mutex::new(QueueState {
                heap: BinaryHeap::with_capacity(capacity),
                next_seq: 0,
                closed: false,
                stats: QueueStats {
                    capacity,
                    ..QueueStats::default()
                },
            }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().heap.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.lock().heap.len() >= self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.lock();
        QueueStats {
            len: state.heap.len(),
            ..state.stats.clone()
        }
    }

    /// Inserts an item, waiting while the queue is full
    ///
    /// # Errors
    ///
    /// * `QueueError::Full` - still full when `timeout` elapsed
    /// * `QueueError::Closed` - the queue was closed
    pub async fn put(
        &self,
        item: T,
        priority: i32,
        timeout: Option<Duration>,
    ) -> Result<(), PutError<T>> {
        self.put_envelope(item, priority, None, timeout).await
    }

    /// Inserts an item that is discarded if nobody pops it within `ttl`
    pub async fn put_with_ttl(
        &self,
        item: T,
        priority: i32,
        ttl: Duration,
        timeout: Option<Duration>,
    ) -> Result<(), PutError<T>> {
        let expires_at = Instant::now() + ttl;
        self.put_envelope(item, priority, Some(expires_at), timeout)
            .await
    }

    /// Inserts an item without waiting
    pub fn try_put(&self, item: T, priority: i32) -> Result<(), PutError<T>> {
        self.push(item, priority, None)
    }

    /// Inserts an item, dropping it if the queue is full
    ///
    /// Returns false if the item was dropped. Drops are counted in
    /// [`QueueStats::dropped`].
    pub fn put_or_drop(&self, item: T, priority: i32) -> bool {
        match self.push(item, priority, None) {
            Ok(()) => true,
            Err(err) => {
                let dropped = {
                    let mut state = self.lock();
                    state.stats.dropped += 1;
                    state.stats.dropped
                };
                tracing::warn!(
                    "Queue {} rejected item ({}), dropped so far: {}",
                    self.name,
                    err.reason,
                    dropped
                );
                false
            }
        }
    }

    /// Removes the highest-priority, oldest item, waiting while empty
    ///
    /// # Errors
    ///
    /// * `QueueError::Empty` - still empty when `timeout` elapsed
    /// * `QueueError::Closed` - the queue is closed and drained
    pub async fn get(&self, timeout: Option<Duration>) -> Result<T, QueueError> {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_get() {
                Err(QueueError::Empty) => {}
                other => return other,
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return self.try_get();
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Removes the highest-priority, oldest item without waiting
    pub fn try_get(&self) -> Result<T, QueueError> {
        let now = Instant::now();
        let (result, freed) = {
            let mut state = self.lock();
            let mut freed = 0usize;
            let mut result = None;

            while let Some(envelope) = state.heap.pop() {
                freed += 1;
                if envelope.is_expired(now) {
                    state.stats.expired += 1;
                    continue;
                }
                state.stats.gets += 1;
                result = Some(envelope.payload);
                break;
            }

            let result = match result {
                Some(payload) => Ok(payload),
                None if state.closed => Err(QueueError::Closed),
                None => Err(QueueError::Empty),
            };
            (result, freed)
        };

        for _ in 0..freed {
            self.not_full.notify_one();
        }
        result
    }

    /// Closes the queue
    ///
    /// Waiting producers fail with `Closed`; consumers drain what is left
    /// and then fail with `Closed`.
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
        tracing::debug!("Queue {} closed", self.name);
    }

    async fn put_envelope(
        &self,
        item: T,
        priority: i32,
        expires_at: Option<Instant>,
        timeout: Option<Duration>,
    ) -> Result<(), PutError<T>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut item = item;

        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.push(item, priority, expires_at) {
                Ok(()) => return Ok(()),
                Err(PutError {
                    reason: QueueError::Full,
                    item: returned,
                }) => item = returned,
                Err(err) => return Err(err),
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return self.push(item, priority, expires_at);
                    }
                }
                None => notified.await,
            }
        }
    }

    fn push(&self, item: T, priority: i32, expires_at: Option<Instant>) -> Result<(), PutError<T>> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(PutError {
                    reason: QueueError::Closed,
                    item,
                });
            }

            if state.heap.len() >= self.capacity {
                let now = Instant::now();
                let before = state.heap.len();
                state.heap.retain(|envelope| !envelope.is_expired(now));
                let purged = (before - state.heap.len()) as u64;
                state.stats.expired += purged;

                if state.heap.len() >= self.capacity {
                    return Err(PutError {
                        reason: QueueError::Full,
                        item,
                    });
                }
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            state.stats.puts += 1;
            state.heap.push(Envelope {
                priority,
                seq,
                expires_at,
                payload: item,
            });
        }

        self.not_empty.notify_one();
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        // Every critical section leaves the heap consistent, so a panic
        // elsewhere does not invalidate the state
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
