//! Emitter configuration.
//!
//! Loaded from environment variables with defaults suitable for local
//! development. Unparseable values fall back to the default; `validate`
//! rejects values that parse but make no sense.

use crate::backoff::BackoffPolicy;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Worker pool sizing for [`crate::ConcurrentEmitter`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmitterConfig {
    /// Number of worker tasks.
    pub workers: usize,

    /// Capacity of the bounded submission queue.
    pub queue_capacity: usize,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            queue_capacity: 1024,
        }
    }
}

impl EmitterConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `EVENT_EMITTER_WORKERS`: worker count (default: 8)
    /// - `EVENT_EMITTER_QUEUE_SIZE`: queue capacity (default: 1024)
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            workers: env_or("EVENT_EMITTER_WORKERS", default.workers),
            queue_capacity: env_or("EVENT_EMITTER_QUEUE_SIZE", default.queue_capacity),
        }
    }

    /// Reject an empty pool or queue.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(invalid("EVENT_EMITTER_WORKERS", "must be greater than zero"));
        }
        if self.queue_capacity == 0 {
            return Err(invalid("EVENT_EMITTER_QUEUE_SIZE", "must be greater than zero"));
        }
        Ok(())
    }
}

/// Retry and dead-letter settings for [`crate::RetryingPipeline`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmissionConfig {
    /// Backoff applied between delivery attempts.
    pub retry: BackoffPolicy,

    /// Key prefix for dead-letter queues.
    pub dlq_prefix: String,
}

impl Default for EmissionConfig {
    fn default() -> Self {
        Self {
            retry: BackoffPolicy::default(),
            dlq_prefix: "events".to_string(),
        }
    }
}

impl EmissionConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `EVENT_RETRY_INITIAL_MS`: first retry wait (default: 500)
    /// - `EVENT_RETRY_MULTIPLIER`: interval growth (default: 1.5)
    /// - `EVENT_RETRY_MAX_INTERVAL_MS`: cap for one wait (default: 60000)
    /// - `EVENT_RETRY_MAX_ELAPSED_SECS`: total retry budget (default: 900)
    /// - `EVENT_RETRY_JITTER`: randomization factor (default: 0.5)
    /// - `EVENT_RETRY_MAX_ATTEMPTS`: attempt cap (default: unlimited)
    /// - `EVENT_DLQ_PREFIX`: dead-letter key prefix (default: events)
    pub fn from_env() -> Self {
        let default = Self::default();
        let retry = default.retry;

        Self {
            retry: BackoffPolicy {
                initial_interval: Duration::from_millis(env_or(
                    "EVENT_RETRY_INITIAL_MS",
                    retry.initial_interval.as_millis() as u64,
                )),
                multiplier: env_or("EVENT_RETRY_MULTIPLIER", retry.multiplier),
                max_interval: Duration::from_millis(env_or(
                    "EVENT_RETRY_MAX_INTERVAL_MS",
                    retry.max_interval.as_millis() as u64,
                )),
                max_elapsed_time: Duration::from_secs(env_or(
                    "EVENT_RETRY_MAX_ELAPSED_SECS",
                    retry.max_elapsed_time.as_secs(),
                )),
                randomization_factor: env_or("EVENT_RETRY_JITTER", retry.randomization_factor),
                max_attempts: std::env::var("EVENT_RETRY_MAX_ATTEMPTS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .or(retry.max_attempts),
            },
            dlq_prefix: std::env::var("EVENT_DLQ_PREFIX")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(default.dlq_prefix),
        }
    }

    /// Dead-letter list key for an event type, `{dlq_prefix}:dlq:{event_type}`.
    pub fn dlq_key(&self, event_type: &str) -> String {
        format!("{}:dlq:{}", self.dlq_prefix, event_type)
    }

    /// Reject nonsensical retry settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let retry = &self.retry;
        if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
            return Err(invalid("EVENT_RETRY_MULTIPLIER", "must be a finite number >= 1.0"));
        }
        if !(0.0..=1.0).contains(&retry.randomization_factor) {
            return Err(invalid("EVENT_RETRY_JITTER", "must be between 0.0 and 1.0"));
        }
        if retry.max_interval < retry.initial_interval {
            return Err(invalid(
                "EVENT_RETRY_MAX_INTERVAL_MS",
                "must not be smaller than EVENT_RETRY_INITIAL_MS",
            ));
        }
        if retry.max_attempts == Some(0) {
            return Err(invalid("EVENT_RETRY_MAX_ATTEMPTS", "must be greater than zero"));
        }
        if self.dlq_prefix.contains(char::is_whitespace) {
            return Err(invalid("EVENT_DLQ_PREFIX", "must not contain whitespace"));
        }
        Ok(())
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
