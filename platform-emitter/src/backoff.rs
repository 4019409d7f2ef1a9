//! Exponential backoff for delivery retries.
//!
//! Each retry waits `interval * (1 ± randomization_factor)`, after which the
//! interval grows by `multiplier` up to `max_interval`. Retrying stops when
//! the next wait would carry the total elapsed time past `max_elapsed_time`,
//! or when `max_attempts` attempts have been made.
//!
//! # Example
//!
//! ```rust,no_run
//! use platform_emitter::backoff::BackoffPolicy;
//! use std::time::Duration;
//!
//! let policy = BackoffPolicy {
//!     initial_interval: Duration::from_millis(100),
//!     max_elapsed_time: Duration::from_secs(5),
//!     ..BackoffPolicy::default()
//! };
//! let mut backoff = policy.start();
//! while let Some(delay) = backoff.next_backoff() {
//!     println!("retrying in {:?}", delay);
//! }
//! ```

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Wait before the first retry
    pub initial_interval: Duration,

    /// Growth factor applied after every retry
    pub multiplier: f64,

    /// Upper bound for a single wait
    pub max_interval: Duration,

    /// Total time budget measured from the first attempt
    pub max_elapsed_time: Duration,

    /// Jitter as a fraction of the current interval (0 disables jitter)
    pub randomization_factor: f64,

    /// Optional cap on the number of attempts
    pub max_attempts: Option<u32>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            multiplier: 1.5,
            max_interval: Duration::from_secs(60),
            max_elapsed_time: Duration::from_secs(15 * 60),
            randomization_factor: 0.5,
            max_attempts: None,
        }
    }
}

impl BackoffPolicy {
    /// Short waits and budget, for latency sensitive emitters.
    pub fn fast() -> Self {
        Self {
            initial_interval: Duration::from_millis(50),
            multiplier: 2.0,
            max_interval: Duration::from_secs(1),
            max_elapsed_time: Duration::from_secs(10),
            randomization_factor: 0.5,
            max_attempts: None,
        }
    }

    /// A single attempt, straight to the dead-letter sink on failure.
    pub fn no_retry() -> Self {
        Self {
            initial_interval: Duration::ZERO,
            multiplier: 1.0,
            max_interval: Duration::ZERO,
            max_elapsed_time: Duration::ZERO,
            randomization_factor: 0.0,
            max_attempts: Some(1),
        }
    }

    /// Disable jitter, giving deterministic waits.
    pub fn without_jitter(mut self) -> Self {
        self.randomization_factor = 0.0;
        self
    }

    /// Start a backoff sequence now.
    pub fn start(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            policy: self.clone(),
            current_interval: self.initial_interval,
            started: Instant::now(),
            attempts: 0,
        }
    }
}

/// Running backoff state for one emission.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    policy: BackoffPolicy,
    current_interval: Duration,
    started: Instant,
    attempts: u32,
}

impl ExponentialBackoff {
    /// Wait before the next attempt, or `None` when the budget is spent.
    ///
    /// Call once after every failed attempt.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        self.attempts = self.attempts.saturating_add(1);

        if let Some(max) = self.policy.max_attempts {
            if self.attempts >= max {
                return None;
            }
        }

        let delay = randomize(self.current_interval, self.policy.randomization_factor);
        if self.started.elapsed() + delay > self.policy.max_elapsed_time {
            return None;
        }

        let next = (self.current_interval.as_nanos() as f64 * growth(self.policy.multiplier)).round();
        self.current_interval = if next >= self.policy.max_interval.as_nanos() as f64 {
            self.policy.max_interval
        } else {
            Duration::from_nanos(next as u64)
        };

        Some(delay)
    }

    /// Failed attempts seen so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Time since the sequence started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Multipliers below 1.0 (or NaN) would shrink the interval toward zero.
fn growth(multiplier: f64) -> f64 {
    if multiplier.is_finite() && multiplier >= 1.0 {
        multiplier
    } else {
        1.0
    }
}

fn randomize(interval: Duration, factor: f64) -> Duration {
    if !factor.is_finite() || factor <= 0.0 || interval.is_zero() {
        return interval;
    }
    let factor = factor.min(1.0);
    let secs = interval.as_secs_f64();
    let delta = factor * secs;
    let low = (secs - delta).max(0.0);
    let high = secs + delta;
    Duration::from_secs_f64(rand::thread_rng().gen_range(low..=high))
}
