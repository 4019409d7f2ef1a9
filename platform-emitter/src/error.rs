//! Error types for the emission pipeline.

use platform_events::ValidationError;
use thiserror::Error;

/// A single delivery attempt failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// Worth retrying (timeouts, unavailable transport)
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// Retrying cannot help (rejected by the transport)
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

impl DeliveryError {
    /// Whether the pipeline should try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::Transient(_))
    }
}

/// Errors surfaced by [`crate::Emitter::emit`].
///
/// Delivery failures are not errors here: they end in an unsuccessful
/// [`crate::EmitReceipt`] after dead-lettering.
#[derive(Debug, Error)]
pub enum EmitError {
    /// The envelope failed validation and was never attempted
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Result type for emission.
pub type EmitResult<T> = Result<T, EmitError>;

/// Errors returned to callers of [`crate::ConcurrentEmitter::submit`].
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The bounded queue is full
    #[error("emission queue full, dropping {event_type}")]
    QueueFull { event_type: String },

    /// The emitter no longer accepts submissions
    #[error("emitter is shutting down")]
    ShuttingDown,

    /// Queued but never processed before shutdown
    #[error("submission dropped before processing")]
    Dropped,

    /// The pipeline rejected the envelope
    #[error(transparent)]
    Emit(#[from] EmitError),
}

/// Result type for submissions.
pub type SubmitResult<T> = Result<T, SubmitError>;

/// A dead-letter sink could not store a record.
#[derive(Debug, Error)]
pub enum DeadLetterError {
    /// Record serialization failed
    #[error("failed to serialize dead-letter record: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend storage failed
    #[error("dead-letter storage error: {0}")]
    Storage(String),
}

/// Result type for dead-letter sinks.
pub type DeadLetterResult<T> = Result<T, DeadLetterError>;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid configuration value.
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Error message.
        message: String,
    },
}
