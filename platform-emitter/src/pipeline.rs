//! Retrying delivery with idempotency keys and dead-letter fallback.
//!
//! One emission moves through
//! `pending -> attempting -> {emitted | retrying -> attempting | dead-lettered}`.
//! Every attempt appends one entry to the envelope's `event_emission` log;
//! dead-lettering appends a final `failed` entry with attempt `0`.

use crate::backoff::BackoffPolicy;
use crate::config::EmissionConfig;
use crate::dead_letter::{DeadLetterRecord, DeadLetterSink};
use crate::emitter::{EmitReceipt, Emitter};
use crate::error::{ConfigError, DeliveryError, EmitResult};
use crate::transport::{DeliveryTransport, MetadataHook};
use async_trait::async_trait;
use chrono::Utc;
use platform_events::{EmissionRecord, EventEnvelope, Metadata};
use std::sync::Arc;

/// Validating, retrying emitter over a [`DeliveryTransport`].
pub struct RetryingPipeline {
    transport: Arc<dyn DeliveryTransport>,
    dead_letters: Option<Arc<dyn DeadLetterSink>>,
    hook: Option<Arc<dyn MetadataHook>>,
    policy: BackoffPolicy,
}

impl std::fmt::Debug for RetryingPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingPipeline")
            .field("policy", &self.policy)
            .field("dead_letters", &self.dead_letters.is_some())
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

impl RetryingPipeline {
    /// Pipeline with the default backoff and no sink or hook.
    pub fn new(transport: Arc<dyn DeliveryTransport>) -> Self {
        Self {
            transport,
            dead_letters: None,
            hook: None,
            policy: BackoffPolicy::default(),
        }
    }

    /// Pipeline using the retry settings of `config`, which must validate.
    pub fn from_config(
        transport: Arc<dyn DeliveryTransport>,
        config: &EmissionConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(transport).with_policy(config.retry.clone()))
    }

    /// Set the backoff policy.
    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the dead-letter sink.
    pub fn with_dead_letter_sink(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letters = Some(sink);
        self
    }

    /// Set the metadata hook.
    pub fn with_metadata_hook(mut self, hook: Arc<dyn MetadataHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Backoff policy in use.
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    async fn give_up(
        &self,
        mut envelope: EventEnvelope,
        idempotency_key: &str,
        attempts: u32,
        error: DeliveryError,
    ) -> EmitReceipt {
        let summary = format!("retry budget exhausted after {} attempts: {}", attempts, error);
        let entry = EmissionRecord::failed(&envelope.event_type, idempotency_key, 0, summary);
        record(&mut envelope, entry);

        tracing::error!(
            event_type = %envelope.event_type,
            idempotency_key = %idempotency_key,
            attempts,
            error = %error,
            "Event emission failed, dead-lettering"
        );

        let mut dead_lettered = false;
        if let Some(sink) = &self.dead_letters {
            let dead_letter = DeadLetterRecord {
                event_type: envelope.event_type.clone(),
                metadata: envelope.metadata.clone().unwrap_or_default(),
                error: error.to_string(),
                timestamp: Utc::now(),
                attempts,
            };
            match sink.dead_letter(dead_letter).await {
                Ok(()) => dead_lettered = true,
                Err(e) => tracing::error!(
                    event_type = %envelope.event_type,
                    idempotency_key = %idempotency_key,
                    error = %e,
                    "Failed to write dead letter"
                ),
            }
        }

        self.notify(&envelope, idempotency_key);

        EmitReceipt {
            envelope,
            delivered_id: None,
            attempts,
            dead_lettered,
        }
    }

    fn notify(&self, envelope: &EventEnvelope, idempotency_key: &str) {
        if let (Some(hook), Some(metadata)) = (&self.hook, &envelope.metadata) {
            hook.on_emission(&envelope.event_type, idempotency_key, metadata);
        }
    }
}

fn record(envelope: &mut EventEnvelope, entry: EmissionRecord) {
    envelope
        .metadata
        .get_or_insert_with(Metadata::default)
        .record_emission(&entry);
}

#[async_trait]
impl Emitter for RetryingPipeline {
    async fn emit(&self, mut envelope: EventEnvelope) -> EmitResult<EmitReceipt> {
        envelope.validate()?;

        let idempotency_key = envelope
            .metadata
            .get_or_insert_with(Metadata::default)
            .ensure_idempotency_key();
        let mut backoff = self.policy.start();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            match self.transport.deliver(&envelope).await {
                Ok(delivered_id) => {
                    let entry = EmissionRecord::emitted(&envelope.event_type, &idempotency_key, attempt);
                    record(&mut envelope, entry);
                    if attempt > 1 {
                        tracing::info!(
                            event_type = %envelope.event_type,
                            attempts = attempt,
                            "Event emitted after retry"
                        );
                    }
                    self.notify(&envelope, &idempotency_key);

                    return Ok(EmitReceipt {
                        envelope,
                        delivered_id: Some(delivered_id),
                        attempts: attempt,
                        dead_lettered: false,
                    });
                }
                Err(e) => {
                    let entry = EmissionRecord::failed(&envelope.event_type, &idempotency_key, attempt, e.to_string());
                    record(&mut envelope, entry);

                    let delay = if e.is_retryable() {
                        backoff.next_backoff()
                    } else {
                        None
                    };

                    let Some(delay) = delay else {
                        return Ok(self.give_up(envelope, &idempotency_key, attempt, e).await);
                    };

                    tracing::warn!(
                        event_type = %envelope.event_type,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Event emission failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
