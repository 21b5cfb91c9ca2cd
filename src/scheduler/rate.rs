//! Per-project token buckets
//!
//! Every project owns one bucket holding at most `burst` tokens and refilled
//! continuously at `rate` tokens per second. A dispatch consumes one token.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Slack for float error accumulated by repeated refills
const TOKEN_EPSILON: f64 = 1e-9;

/// Token bucket state for one project
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBucket {
    /// Dispatches per second
    pub rate: f64,

    /// Bucket capacity
    pub burst: f64,

    /// Current token count, always within `0..=burst`
    pub tokens: f64,

    /// Instant of the last refill; None until the bucket is first used
    pub last_refill: Option<DateTime<Utc>>,
}

impl TokenBucket {
    /// Creates a full bucket
    pub fn new(rate: f64, burst: f64) -> Self {
        Self {
            rate,
            burst,
            tokens: burst,
            last_refill: None,
        }
    }

    /// Adds `elapsed * rate` tokens, capped at `burst`
    ///
    /// Fractional tokens are kept so low rates still make progress.
    pub fn refill(&mut self, now: DateTime<Utc>) {
        if let Some(last) = self.last_refill {
            let elapsed = seconds_between(last, now);
            if elapsed > 0.0 {
                self.tokens = (self.tokens + elapsed * self.rate).min(self.burst);
            }
        }
        if self.last_refill.map_or(true, |last| now > last) {
            self.last_refill = Some(now);
        }
    }

    /// Refills, then takes `n` tokens if available
    ///
    /// # Returns
    ///
    /// * `true` - `n` tokens were taken
    /// * `false` - not enough tokens; the count is left unchanged
    pub fn try_acquire(&mut self, n: f64, now: DateTime<Utc>) -> bool {
        self.refill(now);
        if self.tokens + TOKEN_EPSILON >= n {
            self.tokens = (self.tokens - n).max(0.0);
            true
        } else {
            false
        }
    }

    /// Returns tokens taken by a dispatch that did not go through
    pub fn refund(&mut self, n: f64) {
        self.tokens = (self.tokens + n).min(self.burst);
    }

    /// Applies new limits, keeping the accumulated tokens within the new burst
    pub fn reconfigure(&mut self, rate: f64, burst: f64) {
        self.rate = rate;
        self.burst = burst;
        self.tokens = self.tokens.min(burst);
    }

    /// Time until one token is available
    ///
    /// Returns None if the bucket never refills (rate 0 and empty).
    pub fn time_until_available(&self, now: DateTime<Utc>) -> Option<Duration> {
        let mut tokens = self.tokens;
        if let Some(last) = self.last_refill {
            tokens = (tokens + seconds_between(last, now).max(0.0) * self.rate).min(self.burst);
        }

        if tokens + TOKEN_EPSILON >= 1.0 {
            return Some(Duration::zero());
        }
        if self.rate <= 0.0 || self.burst < 1.0 {
            return None;
        }

        let missing = 1.0 - tokens;
        let millis = (missing / self.rate * 1000.0).ceil() as i64;
        Some(Duration::milliseconds(millis.max(1)))
    }
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let delta = to - from;
    match delta.num_microseconds() {
        Some(micros) => micros as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1000.0,
    }
}

/// Token buckets for every known project
#[derive(Debug, Default)]
pub struct RateController {
    buckets: HashMap<String, TokenBucket>,
}

impl RateController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or updates the bucket of a project
    pub fn configure(&mut self, project: &str, rate: f64, burst: f64) {
        match self.buckets.get_mut(project) {
            Some(bucket) => bucket.reconfigure(rate, burst),
            None => {
                self.buckets
                    .insert(project.to_string(), TokenBucket::new(rate, burst));
            }
        }
    }

    /// Forgets a project's bucket
    pub fn remove(&mut self, project: &str) {
        self.buckets.remove(project);
    }

    /// Takes `n` tokens from a project's bucket
    ///
    /// Projects without a bucket never get tokens.
    pub fn try_acquire(&mut self, project: &str, n: u32, now: DateTime<Utc>) -> bool {
        self.buckets
            .get_mut(project)
            .map_or(false, |bucket| bucket.try_acquire(f64::from(n), now))
    }

    /// Gives back tokens for a dispatch that was rejected downstream
    pub fn refund(&mut self, project: &str, n: u32) {
        if let Some(bucket) = self.buckets.get_mut(project) {
            bucket.refund(f64::from(n));
        }
    }

    pub fn time_until_available(&self, project: &str, now: DateTime<Utc>) -> Option<Duration> {
        self.buckets
            .get(project)
            .and_then(|bucket| bucket.time_until_available(now))
    }

    pub fn bucket(&self, project: &str) -> Option<&TokenBucket> {
        self.buckets.get(project)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap() + Duration::milliseconds(millis)
    }

    #[test]
    fn test_new_bucket_starts_full() {
        let mut bucket = TokenBucket::new(2.0, 2.0);
        assert!(bucket.try_acquire(1.0, at(0)));
        assert!(bucket.try_acquire(1.0, at(0)));
        assert!(!bucket.try_acquire(1.0, at(0)));
    }

    #[test]
    fn test_refill_is_proportional_and_capped() {
        let mut bucket = TokenBucket::new(2.0, 2.0);
        assert!(bucket.try_acquire(2.0, at(0)));

        bucket.refill(at(250));
        assert!((bucket.tokens - 0.5).abs() < 1e-9);

        bucket.refill(at(10_000));
        assert_eq!(bucket.tokens, 2.0);
    }

    #[test]
    fn test_failed_acquire_leaves_tokens() {
        let mut bucket = TokenBucket::new(1.0, 1.0);
        assert!(bucket.try_acquire(1.0, at(0)));
        assert!(!bucket.try_acquire(1.0, at(400)));
        assert!((bucket.tokens - 0.4).abs() < 1e-9);
        assert!(bucket.try_acquire(1.0, at(1000)));
    }

    #[test]
    fn test_fractional_tokens_accumulate_at_low_rates() {
        let mut bucket = TokenBucket::new(0.1, 1.0);
        assert!(bucket.try_acquire(1.0, at(0)));

        for step in 1..10 {
            assert!(!bucket.try_acquire(1.0, at(step * 1000)));
        }
        assert!(bucket.try_acquire(1.0, at(10_000)));
    }

    #[test]
    fn test_tenth_steps_grant_token_on_time() {
        let mut bucket = TokenBucket::new(0.1, 1.0);
        assert!(bucket.try_acquire(1.0, at(0)));

        for step in 1..100 {
            assert!(!bucket.try_acquire(1.0, at(step * 100)));
        }
        assert_eq!(
            bucket.time_until_available(at(10_000)),
            Some(Duration::zero())
        );
        assert!(bucket.try_acquire(1.0, at(10_000)));
        assert!(bucket.tokens >= 0.0);
    }

    #[test]
    fn test_zero_rate_parks_forever() {
        let mut bucket = TokenBucket::new(0.0, 1.0);
        assert!(bucket.try_acquire(1.0, at(0)));
        assert!(!bucket.try_acquire(1.0, at(1_000_000)));
        assert_eq!(bucket.time_until_available(at(1_000_000)), None);
    }

    #[test]
    fn test_time_until_available() {
        let mut bucket = TokenBucket::new(2.0, 2.0);
        assert_eq!(bucket.time_until_available(at(0)), Some(Duration::zero()));

        assert!(bucket.try_acquire(2.0, at(0)));
        assert_eq!(
            bucket.time_until_available(at(0)),
            Some(Duration::milliseconds(500))
        );
        assert_eq!(
            bucket.time_until_available(at(300)),
            Some(Duration::milliseconds(200))
        );
    }

    #[test]
    fn test_controller_unknown_project_gets_nothing() {
        let mut rates = RateController::new();
        assert!(!rates.try_acquire("nope", 1, at(0)));
        assert_eq!(rates.time_until_available("nope", at(0)), None);
    }

    #[test]
    fn test_controller_refund_and_reconfigure() {
        let mut rates = RateController::new();
        rates.configure("p", 1.0, 3.0);

        assert!(rates.try_acquire("p", 3, at(0)));
        rates.refund("p", 1);
        assert!(rates.try_acquire("p", 1, at(0)));

        rates.configure("p", 10.0, 1.0);
        let bucket = rates.bucket("p").unwrap();
        assert_eq!(bucket.rate, 10.0);
        assert!(bucket.tokens <= 1.0);
    }
}
