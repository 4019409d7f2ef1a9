//! # Platform Emitter
//!
//! Emission side of the platform event core: validates envelopes, tags them
//! with an idempotency key, delivers them with exponential backoff and
//! dead-letters what cannot be delivered, behind a bounded worker pool.
//!
//! ## Overview
//!
//! - [`RetryingPipeline`]: validation, idempotency key, retries, audit log, dead-letter
//! - [`ConcurrentEmitter`]: fixed worker pool over a bounded queue, fail-fast on overload
//! - [`DeliveryTransport`]: pluggable delivery, implemented for [`platform_events::MemoryEventBus`]
//! - [`DeadLetterSink`]: [`MemoryDeadLetterSink`], and `RedisDeadLetterSink` with the `redis` feature
//!
//! ## Features
//!
//! - `redis`: Redis-backed dead-letter sink
//!
//! ## Usage
//!
//! ```rust,no_run
//! use platform_emitter::{
//!     ConcurrentEmitter, EmissionConfig, EmitterConfig, MemoryDeadLetterSink, RetryingPipeline,
//! };
//! use platform_events::{EventEnvelope, MemoryEventBus};
//! use serde_json::Map;
//! use std::sync::Arc;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let bus = Arc::new(MemoryEventBus::new());
//!     let pipeline = RetryingPipeline::from_config(bus, &EmissionConfig::from_env())?
//!         .with_dead_letter_sink(Arc::new(MemoryDeadLetterSink::new()));
//!     let emitter = ConcurrentEmitter::new(EmitterConfig::from_env(), Arc::new(pipeline))?;
//!
//!     let envelope = EventEnvelope::new(
//!         "search:search:v1:requested",
//!         "user_123",
//!         "campaign_1",
//!         platform_events::ids::correlation_id(),
//!         None,
//!         Map::new(),
//!     );
//!     let receipt = emitter.submit(envelope).await?;
//!     println!("delivered: {}", receipt.is_ok());
//!
//!     emitter.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod config;
pub mod dead_letter;
pub mod emitter;
pub mod error;
pub mod pipeline;
pub mod transport;

#[cfg(feature = "redis")]
pub mod redis;

// Re-export main types
pub use backoff::{BackoffPolicy, ExponentialBackoff};
pub use config::{EmissionConfig, EmitterConfig};
pub use dead_letter::{DeadLetterRecord, DeadLetterSink, MemoryDeadLetterSink};
pub use emitter::{ConcurrentEmitter, EmitReceipt, Emitter, EmitterStats};
pub use error::{
    ConfigError, DeadLetterError, DeadLetterResult, DeliveryError, EmitError, EmitResult,
    SubmitError, SubmitResult,
};
pub use pipeline::RetryingPipeline;
pub use transport::{DeliveryTransport, MetadataHook};

#[cfg(feature = "redis")]
pub use redis::RedisDeadLetterSink;
