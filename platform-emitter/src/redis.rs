//! Redis-backed dead-letter sink.
//!
//! Records are pushed as JSON onto one list per event type, keyed
//! `{prefix}:dlq:{event_type}`, newest first.

use crate::config::EmissionConfig;
use crate::dead_letter::{DeadLetterRecord, DeadLetterSink};
use crate::error::{DeadLetterError, DeadLetterResult};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};

/// Dead-letter sink storing records in Redis lists.
///
/// # Example
///
/// ```rust,no_run
/// use platform_emitter::{EmissionConfig, RedisDeadLetterSink};
///
/// async fn example() -> Result<(), Box<dyn std::error::Error>> {
///     let config = EmissionConfig::from_env();
///     let sink = RedisDeadLetterSink::from_config("redis://localhost:6379", &config).await?;
///     let failed = sink.read("search:search:v1:requested", 10).await?;
///     println!("{} dead letters", failed.len());
///     Ok(())
/// }
/// ```
pub struct RedisDeadLetterSink {
    client: Client,
    config: EmissionConfig,
}

impl std::fmt::Debug for RedisDeadLetterSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisDeadLetterSink")
            .field("prefix", &self.config.dlq_prefix)
            .finish()
    }
}

impl RedisDeadLetterSink {
    /// Connect to Redis and verify the connection.
    pub async fn new(redis_url: &str, prefix: &str) -> DeadLetterResult<Self> {
        let config = EmissionConfig {
            dlq_prefix: prefix.to_string(),
            ..EmissionConfig::default()
        };
        Self::from_config(redis_url, &config).await
    }

    /// Connect using the key prefix from `EVENT_DLQ_PREFIX` settings.
    pub async fn from_config(redis_url: &str, config: &EmissionConfig) -> DeadLetterResult<Self> {
        let client = Client::open(redis_url).map_err(storage)?;

        // Test connection
        let _ = client
            .get_multiplexed_async_connection()
            .await
            .map_err(storage)?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// List key for an event type.
    pub fn key(&self, event_type: &str) -> String {
        self.config.dlq_key(event_type)
    }

    /// Most recent `count` records for an event type, newest first.
    pub async fn read(&self, event_type: &str, count: usize) -> DeadLetterResult<Vec<DeadLetterRecord>> {
        let Some(stop) = lrange_stop(count) else {
            return Ok(Vec::new());
        };

        let mut conn = self.get_connection().await?;
        let raw: Vec<String> = conn
            .lrange(self.key(event_type), 0, stop)
            .await
            .map_err(storage)?;

        let mut records = Vec::with_capacity(raw.len());
        for entry in raw {
            match serde_json::from_str(&entry) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(error = %e, event_type = %event_type, "Skipping undecodable dead letter"),
            }
        }
        Ok(records)
    }

    async fn get_connection(&self) -> DeadLetterResult<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(storage)
    }
}

#[async_trait]
impl DeadLetterSink for RedisDeadLetterSink {
    async fn dead_letter(&self, record: DeadLetterRecord) -> DeadLetterResult<()> {
        let key = self.key(&record.event_type);
        let payload = serde_json::to_string(&record)?;

        let mut conn = self.get_connection().await?;
        conn.lpush::<_, _, ()>(&key, &payload)
            .await
            .map_err(storage)?;

        tracing::debug!(key = %key, "Dead letter stored in Redis");
        Ok(())
    }
}

/// Inclusive LRANGE stop index for the first `count` entries; `None` for 0,
/// since a stop of -1 would return the whole list.
fn lrange_stop(count: usize) -> Option<isize> {
    let last = count.checked_sub(1)?;
    Some(isize::try_from(last).unwrap_or(isize::MAX))
}

fn storage(err: redis::RedisError) -> DeadLetterError {
    DeadLetterError::Storage(err.to_string())
}
