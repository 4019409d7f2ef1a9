//! Seams to the outside world: delivery and metadata enrichment.

use crate::error::DeliveryError;
use async_trait::async_trait;
use platform_events::{EventBus, EventEnvelope, MemoryEventBus, Metadata};

/// Physically delivers an envelope. Called once per attempt.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    /// Deliver the envelope, returning a transport-assigned id.
    async fn deliver(&self, envelope: &EventEnvelope) -> Result<String, DeliveryError>;
}

#[async_trait]
impl DeliveryTransport for MemoryEventBus {
    async fn deliver(&self, envelope: &EventEnvelope) -> Result<String, DeliveryError> {
        self.publish(envelope.clone())
            .await
            .map_err(|e| DeliveryError::Transient(e.to_string()))
    }
}

/// Observes the final metadata of every finished emission.
///
/// Used to persist the audit trail next to the business entity. Purely
/// observational: it cannot change the emission outcome.
pub trait MetadataHook: Send + Sync {
    /// Called once per emission, after success or dead-lettering.
    fn on_emission(&self, entity_type: &str, entity_id: &str, metadata: &Metadata);
}

impl<F> MetadataHook for F
where
    F: Fn(&str, &str, &Metadata) + Send + Sync,
{
    fn on_emission(&self, entity_type: &str, entity_id: &str, metadata: &Metadata) {
        self(entity_type, entity_id, metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[tokio::test]
    async fn test_memory_bus_as_transport() {
        let bus = MemoryEventBus::new();
        let mut sub = bus.subscribe("search:#").await.unwrap();

        let envelope = EventEnvelope::new(
            "search:search:v1:requested",
            "user_1",
            "campaign_1",
            "abcdef12",
            None,
            Map::new(),
        );
        let id = bus.deliver(&envelope).await.unwrap();
        assert!(!id.is_empty());
        assert_eq!(sub.recv().await.unwrap().event_type, envelope.event_type);
    }
}
