//! Canonical event type grammar.
//!
//! Every routable event type has the shape `{service}:{action}:v{N}:{state}`,
//! e.g. `search:search:v1:requested`. Segments are lower-case identifiers
//! (`[a-z][a-z0-9_]*`), the version is `v` followed by digits and the state is
//! drawn from a fixed lifecycle vocabulary.
//!
//! Service health events (`{service}:health:v{N}:heartbeat`) use their own
//! grammar and are recognised by [`is_health_event_type`], never by
//! [`EventType::parse`].

use crate::validation::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Event type accepted unconditionally (hello-world / connectivity checks).
pub const ECHO_EVENT_TYPE: &str = "echo";

/// Prefix of event types accepted unconditionally.
pub const CAMPAIGN_PREFIX: &str = "campaign:";

/// Action name reserved for service health events.
pub const HEALTH_ACTION: &str = "health";

/// State carried by service health events.
pub const HEARTBEAT_STATE: &str = "heartbeat";

/// Lifecycle stage of an event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventState {
    /// Work was asked for
    Requested,
    /// Work began
    Started,
    /// Work succeeded
    Success,
    /// Work failed
    Failed,
    /// Work finished (regardless of outcome)
    Completed,
    /// Work was cancelled
    Cancelled,
    /// Work timed out
    Timeout,
}

impl EventState {
    /// The closed lifecycle vocabulary.
    pub const STANDARD: [EventState; 7] = [
        EventState::Requested,
        EventState::Started,
        EventState::Success,
        EventState::Failed,
        EventState::Completed,
        EventState::Cancelled,
        EventState::Timeout,
    ];

    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventState::Requested => "requested",
            EventState::Started => "started",
            EventState::Success => "success",
            EventState::Failed => "failed",
            EventState::Completed => "completed",
            EventState::Cancelled => "cancelled",
            EventState::Timeout => "timeout",
        }
    }

    /// Comma separated list of the standard states, for error messages.
    pub fn standard_list() -> String {
        Self::STANDARD
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for EventState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requested" => Ok(EventState::Requested),
            "started" => Ok(EventState::Started),
            "success" => Ok(EventState::Success),
            "failed" => Ok(EventState::Failed),
            "completed" => Ok(EventState::Completed),
            "cancelled" => Ok(EventState::Cancelled),
            "timeout" => Ok(EventState::Timeout),
            _ => Err(()),
        }
    }
}

/// A parsed `{service}:{action}:v{N}:{state}` event type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventType {
    /// Owning service (e.g. `search`)
    pub service: String,
    /// Action within the service (e.g. `search`, `send_message`)
    pub action: String,
    /// Schema version (`v1` -> 1)
    pub version: u64,
    /// Lifecycle state
    pub state: EventState,
}

impl EventType {
    /// Build an event type from its parts.
    pub fn new(
        service: impl Into<String>,
        action: impl Into<String>,
        version: u64,
        state: EventState,
    ) -> Self {
        Self {
            service: service.into(),
            action: action.into(),
            version,
            state,
        }
    }

    /// Parse a canonical event type string.
    ///
    /// Fails with a `type` field error if the string is empty, is not four
    /// well-formed colon separated segments, or names an unknown state.
    /// The `echo` and `campaign:` escape hatches are not parseable here;
    /// see [`crate::validation::validate_event_type`].
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        if raw.is_empty() {
            return Err(ValidationError::new("type", "event type is required", raw));
        }

        let format_error = || {
            ValidationError::new(
                "type",
                "event type must follow format: {service}:{action}:v{version}:{state}",
                raw,
            )
        };

        let parts: Vec<&str> = raw.split(':').collect();
        if parts.len() != 4 {
            return Err(format_error());
        }

        let (service, action, version, state) = (parts[0], parts[1], parts[2], parts[3]);
        if !is_segment(service) || !is_segment(action) || !is_segment(state) {
            return Err(format_error());
        }

        let version = parse_version(version).ok_or_else(format_error)?;

        let state = state.parse::<EventState>().map_err(|_| {
            ValidationError::new(
                "type",
                format!(
                    "invalid state '{}', must be one of: {}",
                    state,
                    EventState::standard_list()
                ),
                raw,
            )
        })?;

        Ok(Self::new(service, action, version, state))
    }

    /// The `{service}:{action}:` prefix every type of this action starts with.
    pub fn action_prefix(&self) -> String {
        format!("{}:{}:", self.service, self.action)
    }

    /// Same service and action with a different state.
    pub fn with_state(&self, state: EventState) -> Self {
        Self {
            state,
            ..self.clone()
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:v{}:{}",
            self.service, self.action, self.version, self.state
        )
    }
}

impl FromStr for EventType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Whether `raw` is a service health event, `{service}:health:v{N}:heartbeat`.
///
/// Health events are liveness signals between services and are not part of
/// the envelope type grammar; [`crate::validation::validate_event_type`]
/// rejects them.
pub fn is_health_event_type(raw: &str) -> bool {
    let parts: Vec<&str> = raw.split(':').collect();
    match parts.as_slice() {
        [service, action, version, state] => {
            is_segment(service)
                && *action == HEALTH_ACTION
                && parse_version(version).is_some()
                && *state == HEARTBEAT_STATE
        }
        _ => false,
    }
}

/// `v{digits}` -> digits
fn parse_version(segment: &str) -> Option<u64> {
    segment
        .strip_prefix('v')
        .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|digits| digits.parse::<u64>().ok())
}

/// `[a-z][a-z0-9_]*`
fn is_segment(segment: &str) -> bool {
    let mut bytes = segment.bytes();
    match bytes.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }
    bytes.all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}
