//! Envelope validation
//!
//! Validation is pure: it never mutates the envelope and always evaluates
//! fields in the same order, so the first reported error is stable:
//!
//! 1. `type`
//! 2. `correlation_id`
//! 3. `timestamp`
//! 4. `version`
//! 5. `source`
//! 6. `metadata`
//! 7. `metadata.global_context`
//! 8. `metadata.global_context.*` (user, campaign, correlation, session, device, source)
//! 9. `metadata.envelope_version`
//! 10. `environment`, then `metadata.environment`
//! 11. `payload.data` (only when a payload is present)

use crate::envelope::{EventEnvelope, Source};
use crate::event_type::{EventType, CAMPAIGN_PREFIX, ECHO_EVENT_TYPE};
use chrono::DateTime;
use thiserror::Error;

/// Minimum length of a correlation id.
pub const MIN_CORRELATION_ID_LEN: usize = 8;

/// A field-scoped validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("validation error in field '{field}': {message} (value: {value})")]
pub struct ValidationError {
    /// Dotted path of the offending field
    pub field: &'static str,
    /// Human readable reason
    pub message: String,
    /// Offending value as received
    pub value: String,
}

impl ValidationError {
    /// Create a validation error.
    pub fn new(field: &'static str, message: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
            value: value.into(),
        }
    }

    fn missing(field: &'static str, message: &str) -> Self {
        Self::new(field, message, "null")
    }
}

/// Result type for validation.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// A near-canonical type that could not be normalized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to normalize event type '{input}': {source}")]
pub struct NormalizeError {
    /// Type as supplied by the producer
    pub input: String,
    /// Why the sanitized form was still rejected
    #[source]
    pub source: ValidationError,
}

/// Validate an event type string.
///
/// `echo` and any `campaign:` prefixed type pass unconditionally.
pub fn validate_event_type(event_type: &str) -> ValidationResult<()> {
    if is_exempt_event_type(event_type) {
        return Ok(());
    }
    EventType::parse(event_type).map(|_| ())
}

/// Whether the type bypasses the canonical grammar.
pub fn is_exempt_event_type(event_type: &str) -> bool {
    event_type == ECHO_EVENT_TYPE || event_type.starts_with(CAMPAIGN_PREFIX)
}

/// Validate a correlation id (`[A-Za-z0-9_-]+`, at least 8 characters).
pub fn validate_correlation_id(field: &'static str, correlation_id: &str) -> ValidationResult<()> {
    validate_identifier(field, "correlation ID", correlation_id)?;
    if correlation_id.len() < MIN_CORRELATION_ID_LEN {
        return Err(ValidationError::new(
            field,
            format!(
                "correlation ID must be at least {} characters long",
                MIN_CORRELATION_ID_LEN
            ),
            correlation_id,
        ));
    }
    Ok(())
}

/// Validate a non-empty `[A-Za-z0-9_-]+` identifier.
pub fn validate_identifier(field: &'static str, label: &str, value: &str) -> ValidationResult<()> {
    if value.is_empty() {
        return Err(ValidationError::new(field, format!("{label} is required"), value));
    }
    if !value
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(ValidationError::new(
            field,
            format!("{label} must contain only alphanumeric characters, hyphens, and underscores"),
            value,
        ));
    }
    Ok(())
}

/// Validate an RFC3339 timestamp.
pub fn validate_timestamp(timestamp: &str) -> ValidationResult<()> {
    if timestamp.is_empty() {
        return Err(ValidationError::new("timestamp", "timestamp is required", timestamp));
    }
    DateTime::parse_from_rfc3339(timestamp)
        .map(|_| ())
        .map_err(|_| {
            ValidationError::new(
                "timestamp",
                "timestamp must be in ISO 8601 format (RFC3339)",
                timestamp,
            )
        })
}

/// Validate a `N.N.N` version string.
pub fn validate_version(field: &'static str, version: &str) -> ValidationResult<()> {
    if version.is_empty() {
        return Err(ValidationError::new(field, "version is required", version));
    }
    let parts: Vec<&str> = version.split('.').collect();
    let well_formed = parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()));
    if !well_formed {
        return Err(ValidationError::new(
            field,
            "version must follow semantic versioning format (e.g., 1.0.0)",
            version,
        ));
    }
    Ok(())
}

/// Validate an event source (`frontend`, `backend` or `wasm`).
pub fn validate_source(field: &'static str, source: &str) -> ValidationResult<()> {
    source.parse::<Source>().map(|_| ()).map_err(|_| {
        ValidationError::new(
            field,
            format!("source must be one of: {}", Source::list()),
            source,
        )
    })
}

/// Validate an envelope, returning the first error in evaluation order.
pub fn validate_envelope(envelope: &EventEnvelope) -> ValidationResult<()> {
    match collect_errors(envelope, true).into_iter().next() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Validate an envelope, returning every error in evaluation order.
pub fn validate_envelope_all(envelope: &EventEnvelope) -> Vec<ValidationError> {
    collect_errors(envelope, false)
}

fn collect_errors(envelope: &EventEnvelope, first_only: bool) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    macro_rules! check {
        ($result:expr) => {{
            let result: ValidationResult<()> = $result;
            if let Err(err) = result {
                errors.push(err);
                if first_only {
                    return errors;
                }
            }
        }};
    }

    check!(validate_event_type(&envelope.event_type));
    check!(validate_correlation_id("correlation_id", &envelope.correlation_id));
    check!(validate_timestamp(&envelope.timestamp));
    check!(validate_version("version", &envelope.version));
    check!(validate_source("source", &envelope.source));

    let metadata = envelope.metadata.as_ref();
    if metadata.is_none() {
        check!(Err(ValidationError::missing("metadata", "metadata is required")));
    }

    if let Some(metadata) = metadata {
        match &metadata.global_context {
            None => {
                check!(Err(ValidationError::missing(
                    "metadata.global_context",
                    "global context is required"
                )));
            }
            Some(gc) => {
                check!(validate_identifier(
                    "metadata.global_context.user_id",
                    "user ID",
                    &gc.user_id
                ));
                check!(validate_identifier(
                    "metadata.global_context.campaign_id",
                    "campaign ID",
                    &gc.campaign_id
                ));
                check!(validate_correlation_id(
                    "metadata.global_context.correlation_id",
                    &gc.correlation_id
                ));
                check!(validate_identifier(
                    "metadata.global_context.session_id",
                    "session ID",
                    &gc.session_id
                ));
                check!(validate_identifier(
                    "metadata.global_context.device_id",
                    "device ID",
                    &gc.device_id
                ));
                check!(validate_source("metadata.global_context.source", &gc.source));
            }
        }

        check!(validate_version(
            "metadata.envelope_version",
            &metadata.envelope_version
        ));
    }

    if envelope.environment.is_empty() {
        check!(Err(ValidationError::new(
            "environment",
            "environment is required",
            ""
        )));
    }
    if let Some(metadata) = metadata {
        if metadata.environment.is_empty() {
            check!(Err(ValidationError::new(
                "metadata.environment",
                "environment is required",
                ""
            )));
        }
    }

    if let Some(payload) = &envelope.payload {
        if payload.data.is_none() {
            check!(Err(ValidationError::missing(
                "payload.data",
                "payload data is required when payload is present"
            )));
        }
    }

    errors
}

/// Best-effort coercion of a near-canonical type string.
///
/// Lower-cases, replaces everything outside `[a-z0-9:_]` with `_`, collapses
/// runs of `_` and trims leading/trailing `_`.
pub fn sanitize_event_type(event_type: &str) -> String {
    let lowered = event_type.to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    for c in lowered.chars() {
        let c = if c.is_ascii_lowercase() || c.is_ascii_digit() || c == ':' {
            c
        } else {
            '_'
        };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }
    out.trim_matches('_').to_string()
}

/// Sanitize then validate a type string.
pub fn normalize_event_type(event_type: &str) -> Result<String, NormalizeError> {
    let normalized = sanitize_event_type(event_type);
    validate_event_type(&normalized).map_err(|source| NormalizeError {
        input: event_type.to_string(),
        source,
    })?;
    Ok(normalized)
}

/// Whether the event type ends with any of the given suffixes (e.g. `:requested`).
pub fn should_process_event(event_type: &str, allowed_suffixes: &[&str]) -> bool {
    allowed_suffixes
        .iter()
        .any(|suffix| event_type.ends_with(suffix))
}
