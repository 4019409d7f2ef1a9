//! Canonical event type registry
//!
//! Maps `action:state` to the full canonical type string of a service, built
//! from the ordered list supplied by a [`CanonicalTypeSource`].
//!
//! The version segment is not part of the key: only one version of a given
//! action/state pair can be canonical at a time. When the source lists
//! several versions, the last one wins.

use crate::event_type::EventState;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Supplies the valid canonical type strings of a service.
///
/// The core does not care where the list lives (file, database, remote call).
pub trait CanonicalTypeSource: Send + Sync {
    /// Ordered list of `{service}:{action}:v{N}:{state}` strings for `service`.
    fn event_types(&self, service: &str) -> Vec<String>;
}

impl<F> CanonicalTypeSource for F
where
    F: Fn(&str) -> Vec<String> + Send + Sync,
{
    fn event_types(&self, service: &str) -> Vec<String> {
        self(service)
    }
}

/// In-memory source keyed by service name.
#[derive(Debug, Clone, Default)]
pub struct StaticTypeSource {
    services: HashMap<String, Vec<String>>,
}

impl StaticTypeSource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the type list of a service.
    pub fn with_service<I, S>(mut self, service: impl Into<String>, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.services
            .insert(service.into(), types.into_iter().map(Into::into).collect());
        self
    }
}

impl CanonicalTypeSource for StaticTypeSource {
    fn event_types(&self, service: &str) -> Vec<String> {
        self.services.get(service).cloned().unwrap_or_default()
    }
}

/// `action:state` -> canonical type lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanonicalTypeRegistry {
    entries: HashMap<String, String>,
    types: Vec<String>,
}

impl CanonicalTypeRegistry {
    /// Build a registry from raw type strings.
    ///
    /// Only strings with exactly four colon separated segments qualify; the
    /// key is `segment[1]:segment[3]`.
    pub fn build<I, S>(raw_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut registry = Self::default();
        for raw in raw_types {
            let raw = raw.as_ref();
            let parts: Vec<&str> = raw.split(':').collect();
            if parts.len() != 4 {
                tracing::debug!(event_type = %raw, "Skipping non-canonical event type");
                continue;
            }
            registry
                .entries
                .insert(registry_key(parts[1], parts[3]), raw.to_string());
            registry.types.push(raw.to_string());
        }
        registry
    }

    /// Full canonical type for an action and state.
    pub fn lookup(&self, action: &str, state: &str) -> Option<&str> {
        self.entries
            .get(&registry_key(action, state))
            .map(String::as_str)
    }

    /// Lookup with a typed state.
    pub fn lookup_state(&self, action: &str, state: EventState) -> Option<&str> {
        self.lookup(action, state.as_str())
    }

    /// Every qualifying type string, in source order.
    pub fn event_types(&self) -> &[String] {
        &self.types
    }

    /// Number of distinct `action:state` keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no type qualified.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn registry_key(action: &str, state: &str) -> String {
    format!("{}:{}", action, state)
}

/// Registry of one service, built from its source on first use.
///
/// Concurrent first callers block on the same initialization; afterwards
/// reads are lock-free.
pub struct LazyRegistry {
    service: String,
    source: Arc<dyn CanonicalTypeSource>,
    cell: OnceLock<CanonicalTypeRegistry>,
}

impl fmt::Debug for LazyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyRegistry")
            .field("service", &self.service)
            .field("initialized", &self.cell.get().is_some())
            .finish()
    }
}

impl LazyRegistry {
    /// Create a registry for `service` backed by `source`.
    pub fn new(service: impl Into<String>, source: Arc<dyn CanonicalTypeSource>) -> Self {
        Self {
            service: service.into(),
            source,
            cell: OnceLock::new(),
        }
    }

    /// Service this registry belongs to.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// The built registry, building it if needed.
    pub fn get(&self) -> &CanonicalTypeRegistry {
        self.cell.get_or_init(|| {
            let registry =
                CanonicalTypeRegistry::build(self.source.event_types(&self.service));
            tracing::debug!(
                service = %self.service,
                entries = registry.len(),
                "Canonical event type registry built"
            );
            registry
        })
    }

    /// Full canonical type for an action and state.
    pub fn lookup(&self, action: &str, state: &str) -> Option<&str> {
        self.get().lookup(action, state)
    }

    /// Every canonical type of the service, in source order.
    pub fn event_types(&self) -> &[String] {
        self.get().event_types()
    }

    /// Discard the current registry and rebuild it from the source.
    pub fn rebuild(&mut self) -> &CanonicalTypeRegistry {
        self.cell = OnceLock::new();
        self.get()
    }
}
