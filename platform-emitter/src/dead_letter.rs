//! Dead-letter storage for emissions that exhausted their retry budget.

use crate::error::DeadLetterResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use platform_events::Metadata;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A terminally failed emission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    /// Event type of the failed envelope
    pub event_type: String,
    /// Metadata snapshot including the full emission log
    pub metadata: Metadata,
    /// Last delivery error
    pub error: String,
    /// When the emission was given up
    pub timestamp: DateTime<Utc>,
    /// Attempts made
    pub attempts: u32,
}

impl DeadLetterRecord {
    /// Idempotency key of the failed envelope.
    pub fn idempotency_key(&self) -> Option<&str> {
        self.metadata.idempotency_key()
    }
}

/// Receives dead-lettered emissions.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Store a record. Called at most once per emission.
    async fn dead_letter(&self, record: DeadLetterRecord) -> DeadLetterResult<()>;
}

/// In-memory sink grouped by event type.
#[derive(Debug, Clone, Default)]
pub struct MemoryDeadLetterSink {
    records: Arc<RwLock<HashMap<String, Vec<DeadLetterRecord>>>>,
}

impl MemoryDeadLetterSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records stored for an event type, oldest first.
    pub async fn records(&self, event_type: &str) -> Vec<DeadLetterRecord> {
        self.records
            .read()
            .await
            .get(event_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Total number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.values().map(Vec::len).sum()
    }

    /// Whether nothing has been dead-lettered.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetterSink {
    async fn dead_letter(&self, record: DeadLetterRecord) -> DeadLetterResult<()> {
        self.records
            .write()
            .await
            .entry(record.event_type.clone())
            .or_default()
            .push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(event_type: &str) -> DeadLetterRecord {
        let mut metadata = Metadata::default();
        metadata.ensure_idempotency_key();
        DeadLetterRecord {
            event_type: event_type.to_string(),
            metadata,
            error: "transport unavailable".to_string(),
            timestamp: Utc::now(),
            attempts: 3,
        }
    }

    #[tokio::test]
    async fn test_memory_sink_groups_by_type() {
        let sink = MemoryDeadLetterSink::new();
        assert!(sink.is_empty().await);

        sink.dead_letter(record("auth:login:v1:requested")).await.unwrap();
        sink.dead_letter(record("auth:login:v1:requested")).await.unwrap();
        sink.dead_letter(record("quotes:quote:v1:requested")).await.unwrap();

        assert_eq!(sink.len().await, 3);
        assert_eq!(sink.records("auth:login:v1:requested").await.len(), 2);
        assert!(sink.records("unknown").await.is_empty());
    }

    #[test]
    fn test_record_serializes() {
        let rec = record("auth:login:v1:requested");
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["event_type"], "auth:login:v1:requested");
        assert!(json["metadata"]["service_specific"]["idempotency_key"].is_string());
        assert!(rec.idempotency_key().is_some());
    }
}
