//! Canonical event envelope
//!
//! Every cross-service event is wrapped in an [`EventEnvelope`]. Its JSON
//! shape is the interchange format between producers and consumers, so
//! fields may be added but never renamed or removed.

use crate::config::EnvelopeConfig;
use crate::event_type::EventType;
use crate::ids;
use crate::validation::{self, ValidationError, ValidationResult};
use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Default envelope and metadata version.
pub const DEFAULT_VERSION: &str = "1.0.0";

/// Default deployment environment.
pub const DEFAULT_ENVIRONMENT: &str = "development";

/// `service_specific` key holding the idempotency key.
pub const IDEMPOTENCY_KEY: &str = "idempotency_key";

/// `service_specific` key holding the emission audit log.
pub const EVENT_EMISSION_KEY: &str = "event_emission";

/// Producer side of an envelope.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Browser or mobile client
    Frontend,
    /// Server-side service
    Backend,
    /// WebAssembly module
    Wasm,
}

impl Source {
    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Frontend => "frontend",
            Source::Backend => "backend",
            Source::Wasm => "wasm",
        }
    }

    pub(crate) fn list() -> &'static str {
        "frontend, backend, wasm"
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "frontend" => Ok(Source::Frontend),
            "backend" => Ok(Source::Backend),
            "wasm" => Ok(Source::Wasm),
            _ => Err(()),
        }
    }
}

/// Identity and tracing context shared by every envelope in a flow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalContext {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub campaign_id: String,
    #[serde(default)]
    pub correlation_id: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub source: String,
}

/// Outcome of one emission attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EmissionStatus {
    /// The transport accepted the envelope
    Emitted,
    /// The attempt (or the whole emission) failed
    Failed,
}

/// One entry of the `event_emission` audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmissionRecord {
    /// Event type that was emitted
    pub event_type: String,
    /// Entity or event id the emission belongs to
    pub event_id: String,
    /// 1-based attempt number (0 for the terminal summary entry)
    #[serde(default)]
    pub attempt: u32,
    /// Attempt outcome
    pub status: EmissionStatus,
    /// RFC3339 time of the outcome
    pub timestamp: String,
    /// Failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EmissionRecord {
    /// Record a successful attempt.
    pub fn emitted(event_type: impl Into<String>, event_id: impl Into<String>, attempt: u32) -> Self {
        Self {
            event_type: event_type.into(),
            event_id: event_id.into(),
            attempt,
            status: EmissionStatus::Emitted,
            timestamp: now_rfc3339(),
            error: None,
        }
    }

    /// Record a failed attempt.
    pub fn failed(
        event_type: impl Into<String>,
        event_id: impl Into<String>,
        attempt: u32,
        error: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            event_id: event_id.into(),
            attempt,
            status: EmissionStatus::Failed,
            timestamp: now_rfc3339(),
            error: Some(error.into()),
        }
    }

    fn to_value(&self) -> Value {
        let mut value = json!({
            "event_type": self.event_type,
            "event_id": self.event_id,
            "attempt": self.attempt,
            "status": match self.status {
                EmissionStatus::Emitted => "emitted",
                EmissionStatus::Failed => "failed",
            },
            "timestamp": self.timestamp,
        });
        if let (Some(error), Value::Object(map)) = (&self.error, &mut value) {
            map.insert("error".to_string(), Value::String(error.clone()));
        }
        value
    }
}

/// Envelope metadata.
///
/// `service_specific` is the open extension point; the core only owns the
/// `idempotency_key` and `event_emission` keys inside it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_context: Option<GlobalContext>,
    #[serde(default)]
    pub envelope_version: String,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub service_specific: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub audit: Map<String, Value>,
}

impl Metadata {
    /// The idempotency key, if one was assigned.
    pub fn idempotency_key(&self) -> Option<&str> {
        self.service_specific
            .get(IDEMPOTENCY_KEY)
            .and_then(Value::as_str)
    }

    /// Return the idempotency key, generating one if absent.
    ///
    /// Calling this repeatedly on the same metadata always yields the same key.
    pub fn ensure_idempotency_key(&mut self) -> String {
        if let Some(key) = self.idempotency_key() {
            return key.to_string();
        }
        let key = Uuid::now_v7().to_string();
        self.service_specific
            .insert(IDEMPOTENCY_KEY.to_string(), Value::String(key.clone()));
        key
    }

    /// Append an entry to the emission audit log.
    ///
    /// A scalar or object left under the key by an older producer is kept
    /// as the first element of the new array.
    pub fn record_emission(&mut self, record: &EmissionRecord) {
        let entry = record.to_value();
        match self.service_specific.get_mut(EVENT_EMISSION_KEY) {
            Some(Value::Array(entries)) => entries.push(entry),
            Some(existing) => {
                let previous = existing.take();
                *existing = Value::Array(vec![previous, entry]);
            }
            None => {
                self.service_specific
                    .insert(EVENT_EMISSION_KEY.to_string(), Value::Array(vec![entry]));
            }
        }
    }

    /// Decoded emission audit log. Entries that do not decode are skipped.
    pub fn emission_log(&self) -> Vec<EmissionRecord> {
        match self.service_specific.get(EVENT_EMISSION_KEY) {
            Some(Value::Array(entries)) => entries
                .iter()
                .filter_map(|v| serde_json::from_value(v.clone()).ok())
                .collect(),
            Some(single) => serde_json::from_value(single.clone())
                .ok()
                .into_iter()
                .collect(),
            None => Vec::new(),
        }
    }
}

/// Optional structured payload, opaque to the core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl Payload {
    /// Wrap a JSON object.
    pub fn new(data: Map<String, Value>) -> Self {
        Self { data: Some(data) }
    }

    /// Serialize a typed value into a payload. The value must serialize to a JSON object.
    pub fn from_serializable<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        match serde_json::to_value(value)? {
            Value::Object(map) => Ok(Self::new(map)),
            _ => Err(<serde_json::Error as serde::ser::Error>::custom(
                "payload must serialize to a JSON object",
            )),
        }
    }

    /// Parse the payload data into a specific type.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        let data = self.data.clone().unwrap_or_default();
        serde_json::from_value(Value::Object(data))
    }
}

/// Canonical event envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Canonical event type (`{service}:{action}:v{N}:{state}`)
    #[serde(rename = "type", default)]
    pub event_type: String,

    /// Correlation id of the causal chain
    #[serde(default)]
    pub correlation_id: String,

    /// RFC3339 creation time
    #[serde(default = "now_rfc3339")]
    pub timestamp: String,

    /// Envelope version (`N.N.N`)
    #[serde(default = "default_version")]
    pub version: String,

    /// Deployment environment
    #[serde(default)]
    pub environment: String,

    /// Producer side (`frontend`, `backend`, `wasm`)
    #[serde(default)]
    pub source: String,

    /// Envelope metadata
    #[serde(default)]
    pub metadata: Option<Metadata>,

    /// Optional payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
}

impl EventEnvelope {
    /// Create a backend envelope using defaults from the environment.
    ///
    /// See [`EnvelopeConfig::envelope`] for the derived fields.
    pub fn new(
        event_type: impl Into<String>,
        user_id: impl Into<String>,
        campaign_id: impl Into<String>,
        correlation_id: impl Into<String>,
        payload: Option<Payload>,
        service_specific: Map<String, Value>,
    ) -> Self {
        EnvelopeConfig::from_env().envelope(
            event_type,
            user_id,
            campaign_id,
            correlation_id,
            payload,
            service_specific,
        )
    }

    /// Decode an envelope from JSON.
    ///
    /// Empty `version` and `timestamp` fields are filled with defaults.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let mut envelope: Self = serde_json::from_str(raw)?;
        if envelope.version.is_empty() {
            envelope.version = DEFAULT_VERSION.to_string();
        }
        if envelope.timestamp.is_empty() {
            envelope.timestamp = now_rfc3339();
        }
        Ok(envelope)
    }

    /// Encode the envelope as JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// First validation error in evaluation order.
    pub fn validate(&self) -> ValidationResult<()> {
        validation::validate_envelope(self)
    }

    /// Every validation error in evaluation order.
    pub fn validate_all(&self) -> Vec<ValidationError> {
        validation::validate_envelope_all(self)
    }

    /// Parse the canonical type.
    pub fn parsed_type(&self) -> ValidationResult<EventType> {
        EventType::parse(&self.event_type)
    }

    /// The idempotency key, if one was assigned.
    pub fn idempotency_key(&self) -> Option<&str> {
        self.metadata.as_ref().and_then(Metadata::idempotency_key)
    }

    /// Decoded emission audit log.
    pub fn emission_log(&self) -> Vec<EmissionRecord> {
        self.metadata
            .as_ref()
            .map(Metadata::emission_log)
            .unwrap_or_default()
    }

    /// Set the producer side on the envelope and its global context.
    pub fn with_source(mut self, source: Source) -> Self {
        self.source = source.to_string();
        if let Some(gc) = self
            .metadata
            .as_mut()
            .and_then(|m| m.global_context.as_mut())
        {
            gc.source = source.to_string();
        }
        self
    }

    /// Add a `service_specific` metadata entry.
    pub fn with_service_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata
            .get_or_insert_with(Metadata::default)
            .service_specific
            .insert(key.into(), value);
        self
    }

    /// Add a metadata tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.metadata
            .get_or_insert_with(Metadata::default)
            .tags
            .push(tag.into());
        self
    }
}

impl EnvelopeConfig {
    /// Build a fully-formed, not yet validated backend envelope.
    ///
    /// Derived fields: timestamp is now, version and environment come from
    /// this config, source is `backend`, session and device ids are
    /// generated, and an audit block records creation time and creator.
    pub fn envelope(
        &self,
        event_type: impl Into<String>,
        user_id: impl Into<String>,
        campaign_id: impl Into<String>,
        correlation_id: impl Into<String>,
        payload: Option<Payload>,
        service_specific: Map<String, Value>,
    ) -> EventEnvelope {
        let user_id = user_id.into();
        let correlation_id = correlation_id.into();
        let timestamp = now_rfc3339();

        let global_context = GlobalContext {
            user_id: user_id.clone(),
            campaign_id: campaign_id.into(),
            correlation_id: correlation_id.clone(),
            session_id: ids::session_id(),
            device_id: ids::device_id(),
            source: Source::Backend.to_string(),
        };

        let mut audit = Map::new();
        audit.insert("created_at".to_string(), Value::String(timestamp.clone()));
        audit.insert("created_by".to_string(), Value::String(user_id));

        let metadata = Metadata {
            global_context: Some(global_context),
            envelope_version: self.version.clone(),
            environment: self.environment.clone(),
            service_specific,
            features: Vec::new(),
            tags: Vec::new(),
            audit,
        };

        EventEnvelope {
            event_type: event_type.into(),
            correlation_id,
            timestamp,
            version: self.version.clone(),
            environment: self.environment.clone(),
            source: Source::Backend.to_string(),
            metadata: Some(metadata),
            payload,
        }
    }
}

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn default_version() -> String {
    DEFAULT_VERSION.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct SearchQuery {
        query: String,
        limit: u32,
    }

    fn envelope() -> EventEnvelope {
        EnvelopeConfig::default().envelope(
            "search:search:v1:requested",
            "user_123",
            "campaign_1",
            "abcdef12",
            None,
            Map::new(),
        )
    }

    #[test]
    fn test_envelope_creation() {
        let env = envelope();
        assert_eq!(env.event_type, "search:search:v1:requested");
        assert_eq!(env.version, "1.0.0");
        assert_eq!(env.environment, "development");
        assert_eq!(env.source, "backend");

        let meta = env.metadata.as_ref().unwrap();
        let gc = meta.global_context.as_ref().unwrap();
        assert_eq!(gc.user_id, "user_123");
        assert_eq!(gc.correlation_id, "abcdef12");
        assert!(gc.session_id.starts_with("session_"));
        assert!(gc.device_id.starts_with("device_"));
        assert_eq!(meta.audit.get("created_by"), Some(&json!("user_123")));
        assert!(env.validate().is_ok());
    }

    #[test]
    fn test_json_field_names_are_stable() {
        let env = envelope();
        let value = serde_json::to_value(&env).unwrap();
        let obj = value.as_object().unwrap();
        for key in ["type", "correlation_id", "timestamp", "version", "environment", "source", "metadata"] {
            assert!(obj.contains_key(key), "missing {key}");
        }
        assert!(!obj.contains_key("payload"));
        assert!(value["metadata"]["global_context"]["session_id"].is_string());
    }

    #[test]
    fn test_from_json_defaults() {
        let raw = r#"{
            "type": "search:search:v1:requested",
            "correlation_id": "abcdef12",
            "version": "",
            "source": "frontend",
            "environment": "test"
        }"#;
        let env = EventEnvelope::from_json(raw).unwrap();
        assert_eq!(env.version, "1.0.0");
        assert!(validation::validate_timestamp(&env.timestamp).is_ok());
        assert!(env.metadata.is_none());
        assert_eq!(env.validate().unwrap_err().field, "metadata");
    }

    #[test]
    fn test_json_round_trip_preserves_envelope() {
        let env = envelope().with_service_field("campaign_slug", json!("spring"));
        let decoded = EventEnvelope::from_json(&env.to_json().unwrap()).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn test_idempotency_key_is_stable() {
        let mut meta = Metadata::default();
        assert!(meta.idempotency_key().is_none());
        let first = meta.ensure_idempotency_key();
        let second = meta.ensure_idempotency_key();
        assert_eq!(first, second);
        assert!(Uuid::parse_str(&first).is_ok());
    }

    #[test]
    fn test_existing_idempotency_key_is_kept() {
        let env = envelope().with_service_field(IDEMPOTENCY_KEY, json!("caller-key"));
        let mut meta = env.metadata.unwrap();
        assert_eq!(meta.ensure_idempotency_key(), "caller-key");
    }

    #[test]
    fn test_emission_log_appends() {
        let mut meta = Metadata::default();
        meta.record_emission(&EmissionRecord::failed("a:b:v1:requested", "id", 1, "boom"));
        meta.record_emission(&EmissionRecord::emitted("a:b:v1:requested", "id", 2));

        let log = meta.emission_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].status, EmissionStatus::Failed);
        assert_eq!(log[0].error.as_deref(), Some("boom"));
        assert_eq!(log[1].status, EmissionStatus::Emitted);
        assert_eq!(log[1].attempt, 2);
    }

    #[test]
    fn test_emission_log_wraps_legacy_scalar() {
        let mut meta = Metadata::default();
        meta.service_specific
            .insert(EVENT_EMISSION_KEY.to_string(), json!("legacy"));
        meta.record_emission(&EmissionRecord::emitted("a:b:v1:requested", "id", 1));

        let raw = meta.service_specific.get(EVENT_EMISSION_KEY).unwrap();
        assert_eq!(raw.as_array().unwrap().len(), 2);
        assert_eq!(meta.emission_log().len(), 1);
    }

    #[test]
    fn test_payload_round_trip() {
        let query = SearchQuery {
            query: "rust".to_string(),
            limit: 10,
        };
        let payload = Payload::from_serializable(&query).unwrap();
        assert_eq!(payload.parse::<SearchQuery>().unwrap(), query);
        assert!(Payload::from_serializable(&42).is_err());
    }

    #[test]
    fn test_with_source() {
        let env = envelope().with_source(Source::Wasm);
        assert_eq!(env.source, "wasm");
        let gc = env.metadata.unwrap().global_context.unwrap();
        assert_eq!(gc.source, "wasm");
    }
}
