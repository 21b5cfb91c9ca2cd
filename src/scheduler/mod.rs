//! Scheduler module: deciding what to fetch and when
//!
//! # Components
//!
//! - `engine`: the scheduling state machine and its loop
//! - `frontier`: per-project pending sets ordered for dispatch
//! - `rate`: per-project token buckets
//! - `retry`: retry backoff and buffered task store writes

mod engine;
mod frontier;
mod rate;
mod retry;

pub use engine::{ReportOutcome, Scheduler, SchedulerStats, SubmitOutcome};
pub use frontier::Frontier;
pub use rate::{RateController, TokenBucket};
pub use retry::{ReadRetries, RetryPolicy, StoreWriter, WriteOutcome};
