//! Inbound event routing
//!
//! Two routers share the same [`EventHandler`] trait:
//!
//! - [`EventRouter`] dispatches on the exact event type string.
//! - [`ActionRouter`] dispatches on the action segment of a service's
//!   canonical types and refuses to invoke a handler unless the inbound type
//!   starts with `{service}:{action}:`, so a handler registered for one
//!   service is never run for a colliding action name of another.
//!
//! Both routers validate the dispatch key against the canonical type grammar
//! before any handler lookup. An [`ActionRouter`] can additionally be bound
//! to a [`CanonicalTypeRegistry`], in which case only types the registry
//! knows are dispatched.
//!
//! Handlers are registered explicitly while the router is owned mutably at
//! startup; the router is then shared behind an `Arc` and only read.

use crate::envelope::EventEnvelope;
use crate::event_type::{EventState, EventType};
use crate::registry::CanonicalTypeRegistry;
use crate::validation::{should_process_event, validate_event_type, ValidationError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;

/// Errors returned by handlers.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The payload could not be decoded
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Business logic failed
    #[error("Handler failed: {0}")]
    Failed(String),
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::InvalidPayload(err.to_string())
    }
}

/// Router error types.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The dispatch key is not a valid event type
    #[error("invalid event type: {0}")]
    InvalidType(#[source] ValidationError),

    /// No handler is registered for the event type
    #[error("no handler registered for event type: {0}")]
    NoHandler(String),

    /// The handler ran and failed
    #[error("handler for {event_type} failed: {source}")]
    Handler {
        event_type: String,
        #[source]
        source: HandlerError,
    },
}

/// Result type for router operations.
pub type RouterResult<T> = Result<T, RouterError>;

/// Request-scoped context handed to a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchContext {
    /// Fresh id generated for this dispatch
    pub request_id: Uuid,
    /// Event type being dispatched
    pub event_type: String,
}

impl DispatchContext {
    /// New context with a fresh request id.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::now_v7(),
            event_type: event_type.into(),
        }
    }

    fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "dispatch_event",
            request_id = %self.request_id,
            event_type = %self.event_type
        )
    }
}

/// Handler for inbound envelopes.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an envelope.
    async fn handle(&self, ctx: &DispatchContext, envelope: EventEnvelope) -> Result<(), HandlerError>;
}

/// Adapter turning an async closure into an [`EventHandler`].
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(DispatchContext, EventEnvelope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, ctx: &DispatchContext, envelope: EventEnvelope) -> Result<(), HandlerError> {
        (self.f)(ctx.clone(), envelope).await
    }
}

/// Wrap an async closure as a shareable handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(DispatchContext, EventEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

/// Exact-match router keyed by event type.
#[derive(Default)]
pub struct EventRouter {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRouter")
            .field("event_types", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl EventRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an exact event type, replacing any previous one.
    pub fn register_handler(
        &mut self,
        event_type: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> &mut Self {
        self.handlers.insert(event_type.into(), handler);
        self
    }

    /// Whether a handler exists for the event type.
    pub fn has_handler(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    /// Number of registered event types.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Dispatch an envelope to the handler registered for `event_type`.
    ///
    /// The key must pass [`validate_event_type`]; `echo` and `campaign:`
    /// types are accepted.
    pub async fn route(&self, event_type: &str, envelope: EventEnvelope) -> RouterResult<()> {
        let ctx = DispatchContext::new(event_type);

        if let Err(err) = validate_event_type(event_type) {
            tracing::warn!(
                request_id = %ctx.request_id,
                event_type = %event_type,
                error = %err,
                "Refusing to route invalid event type"
            );
            return Err(RouterError::InvalidType(err));
        }

        let Some(handler) = self.handlers.get(event_type) else {
            tracing::warn!(
                request_id = %ctx.request_id,
                event_type = %event_type,
                "No handler registered for event type"
            );
            return Err(RouterError::NoHandler(event_type.to_string()));
        };

        let span = ctx.span();
        handler
            .handle(&ctx, envelope)
            .instrument(span)
            .await
            .map_err(|source| RouterError::Handler {
                event_type: event_type.to_string(),
                source,
            })
    }

    /// Dispatch using the envelope's own type.
    pub async fn route_envelope(&self, envelope: EventEnvelope) -> RouterResult<()> {
        let event_type = envelope.event_type.clone();
        self.route(&event_type, envelope).await
    }
}

/// Why an [`ActionRouter`] skipped an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The type does not follow the canonical grammar
    InvalidType,
    /// A registry is attached and does not list the type
    NotCanonical,
    /// No handler for the action
    NoHandler,
    /// The type does not start with `{service}:{action}:`
    PrefixMismatch,
    /// The state is not one the router accepts
    StateFiltered,
}

/// Result of an [`ActionRouter`] dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The handler ran successfully
    Handled,
    /// The envelope was logged and skipped
    Skipped(SkipReason),
}

/// Per-service router keyed by action name.
pub struct ActionRouter {
    service: String,
    handlers: HashMap<String, Arc<dyn EventHandler>>,
    state_suffixes: Option<Vec<String>>,
    registry: Option<Arc<CanonicalTypeRegistry>>,
}

impl fmt::Debug for ActionRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRouter")
            .field("service", &self.service)
            .field("actions", &self.handlers.keys().collect::<Vec<_>>())
            .field("state_suffixes", &self.state_suffixes)
            .field("registry_types", &self.registry.as_ref().map(|r| r.len()))
            .finish()
    }
}

impl ActionRouter {
    /// Create a router for a service.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            handlers: HashMap::new(),
            state_suffixes: None,
            registry: None,
        }
    }

    /// Only dispatch types listed in the service's canonical registry.
    pub fn with_registry(mut self, registry: Arc<CanonicalTypeRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Only dispatch envelopes in the given states (e.g. `requested`).
    pub fn only_states(mut self, states: &[EventState]) -> Self {
        self.state_suffixes = Some(states.iter().map(|s| format!(":{}", s)).collect());
        self
    }

    /// Service this router dispatches for.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Register the handler for an action, replacing any previous one.
    pub fn register(&mut self, action: impl Into<String>, handler: Arc<dyn EventHandler>) -> &mut Self {
        self.handlers.insert(action.into(), handler);
        self
    }

    /// Whether a handler exists for the action.
    pub fn has_action(&self, action: &str) -> bool {
        self.handlers.contains_key(action)
    }

    /// Canonical types of this service whose action has a handler.
    ///
    /// These are the types the service should subscribe to.
    pub fn subscriptions(&self, registry: &CanonicalTypeRegistry) -> Vec<String> {
        registry
            .event_types()
            .iter()
            .filter(|t| {
                let mut parts = t.split(':');
                parts.next() == Some(self.service.as_str())
                    && parts.next().is_some_and(|action| self.has_action(action))
            })
            .cloned()
            .collect()
    }

    /// Dispatch an inbound envelope to its action handler.
    ///
    /// Invalid or non-canonical types, unknown actions, prefix mismatches and
    /// filtered states are logged and reported as [`DispatchOutcome::Skipped`];
    /// only a failing handler is an error.
    pub async fn dispatch(&self, envelope: EventEnvelope) -> RouterResult<DispatchOutcome> {
        let event_type = envelope.event_type.clone();

        let parsed = match EventType::parse(&event_type) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!(
                    service = %self.service,
                    event_type = %event_type,
                    error = %err,
                    "Invalid event type, skipping"
                );
                return Ok(DispatchOutcome::Skipped(SkipReason::InvalidType));
            }
        };
        let action = parsed.action.as_str();

        let Some(handler) = self.handlers.get(action) else {
            tracing::warn!(
                service = %self.service,
                action = %action,
                event_type = %event_type,
                "No handler registered for action, skipping"
            );
            return Ok(DispatchOutcome::Skipped(SkipReason::NoHandler));
        };

        let expected_prefix = format!("{}:{}:", self.service, action);
        if !event_type.starts_with(&expected_prefix) {
            tracing::warn!(
                service = %self.service,
                expected_prefix = %expected_prefix,
                event_type = %event_type,
                "Event type does not match handler action, skipping"
            );
            return Ok(DispatchOutcome::Skipped(SkipReason::PrefixMismatch));
        }

        if let Some(registry) = &self.registry {
            if registry.lookup_state(action, parsed.state) != Some(event_type.as_str()) {
                tracing::warn!(
                    service = %self.service,
                    event_type = %event_type,
                    "Event type is not canonical for this service, skipping"
                );
                return Ok(DispatchOutcome::Skipped(SkipReason::NotCanonical));
            }
        }

        if let Some(suffixes) = &self.state_suffixes {
            let suffixes: Vec<&str> = suffixes.iter().map(String::as_str).collect();
            if !should_process_event(&event_type, &suffixes) {
                tracing::debug!(service = %self.service, event_type = %event_type, "Ignoring event state");
                return Ok(DispatchOutcome::Skipped(SkipReason::StateFiltered));
            }
        }

        let ctx = DispatchContext::new(event_type.as_str());
        let span = ctx.span();
        handler
            .handle(&ctx, envelope)
            .instrument(span)
            .await
            .map_err(|source| {
                tracing::error!(service = %self.service, event_type = %event_type, error = %source, "Event handler failed");
                RouterError::Handler {
                    event_type: event_type.clone(),
                    source,
                }
            })?;

        Ok(DispatchOutcome::Handled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn envelope(event_type: &str) -> EventEnvelope {
        EventEnvelope::new(event_type, "user_1", "campaign_1", "abcdef12", None, Map::new())
    }

    fn counting_handler(counter: Arc<AtomicUsize>) -> Arc<dyn EventHandler> {
        handler_fn(move |_ctx, _env| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), HandlerError>(())
            }
        })
    }

    #[tokio::test]
    async fn test_route_exact_match() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut router = EventRouter::new();
        router.register_handler(
            "search:search:v1:requested",
            handler_fn(move |ctx, env| {
                let sink = sink.clone();
                async move {
                    sink.lock().unwrap().push((ctx, env.correlation_id));
                    Ok::<(), HandlerError>(())
                }
            }),
        );

        router
            .route("search:search:v1:requested", envelope("search:search:v1:requested"))
            .await
            .unwrap();
        router
            .route("search:search:v1:requested", envelope("search:search:v1:requested"))
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0.event_type, "search:search:v1:requested");
        assert_eq!(seen[0].1, "abcdef12");
        assert_ne!(seen[0].0.request_id, seen[1].0.request_id);
    }

    #[tokio::test]
    async fn test_route_without_handler_is_error() {
        let router = EventRouter::new();
        let err = router
            .route_envelope(envelope("auth:login:v1:requested"))
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::NoHandler(ref t) if t == "auth:login:v1:requested"));
        assert_eq!(
            err.to_string(),
            "no handler registered for event type: auth:login:v1:requested"
        );
    }

    #[tokio::test]
    async fn test_route_rejects_invalid_key() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut router = EventRouter::new();
        router.register_handler("analytics:track:garbage:bogus", counting_handler(calls.clone()));

        let err = router
            .route_envelope(envelope("analytics:track:garbage:bogus"))
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::InvalidType(ref e) if e.field == "type"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_route_handler_error_propagates() {
        let mut router = EventRouter::new();
        router.register_handler(
            "echo",
            handler_fn(|_, _| async { Err::<(), _>(HandlerError::Failed("boom".into())) }),
        );
        let err = router.route_envelope(envelope("echo")).await.unwrap_err();
        assert!(matches!(err, RouterError::Handler { .. }));
    }

    #[tokio::test]
    async fn test_action_router_dispatches_by_action() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut router = ActionRouter::new("messaging");
        router.register("send_message", counting_handler(calls.clone()));

        let outcome = router
            .dispatch(envelope("messaging:send_message:v1:requested"))
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Handled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_action_router_prefix_guard() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut router = ActionRouter::new("analytics");
        router.register("send_message", counting_handler(calls.clone()));

        let outcome = router
            .dispatch(envelope("messaging:send_message:v1:requested"))
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Skipped(SkipReason::PrefixMismatch));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_action_router_skips_unknown_and_invalid() {
        let router = ActionRouter::new("analytics");
        assert_eq!(
            router.dispatch(envelope("analytics:report:v1:requested")).await.unwrap(),
            DispatchOutcome::Skipped(SkipReason::NoHandler)
        );
        assert_eq!(
            router.dispatch(envelope("echo")).await.unwrap(),
            DispatchOutcome::Skipped(SkipReason::InvalidType)
        );
    }

    #[tokio::test]
    async fn test_action_router_rejects_malformed_type_before_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut router = ActionRouter::new("analytics");
        router.register("track", counting_handler(calls.clone()));
        router.register("health", counting_handler(calls.clone()));

        for raw in [
            "analytics:track:garbage:bogus",
            "analytics:track:v1:bogus",
            "analytics:track:v1:requested:extra",
            "analytics:health:v1:heartbeat",
        ] {
            assert_eq!(
                router.dispatch(envelope(raw)).await.unwrap(),
                DispatchOutcome::Skipped(SkipReason::InvalidType),
                "{raw}"
            );
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_action_router_with_registry_skips_unknown_types() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = CanonicalTypeRegistry::build([
            "analytics:track:v2:requested",
            "analytics:track:v2:success",
        ]);
        let mut router = ActionRouter::new("analytics").with_registry(Arc::new(registry));
        router.register("track", counting_handler(calls.clone()));

        assert_eq!(
            router.dispatch(envelope("analytics:track:v2:requested")).await.unwrap(),
            DispatchOutcome::Handled
        );
        assert_eq!(
            router.dispatch(envelope("analytics:track:v1:requested")).await.unwrap(),
            DispatchOutcome::Skipped(SkipReason::NotCanonical)
        );
        assert_eq!(
            router.dispatch(envelope("analytics:track:v2:failed")).await.unwrap(),
            DispatchOutcome::Skipped(SkipReason::NotCanonical)
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_action_router_state_filter() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut router = ActionRouter::new("waitlist").only_states(&[EventState::Requested]);
        router.register("join", counting_handler(calls.clone()));

        assert_eq!(
            router.dispatch(envelope("waitlist:join:v1:success")).await.unwrap(),
            DispatchOutcome::Skipped(SkipReason::StateFiltered)
        );
        assert_eq!(
            router.dispatch(envelope("waitlist:join:v1:requested")).await.unwrap(),
            DispatchOutcome::Handled
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscriptions_follow_registered_actions() {
        let registry = CanonicalTypeRegistry::build([
            "analytics:event:v1:requested",
            "analytics:event:v1:success",
            "analytics:report:v1:requested",
            "messaging:event:v1:requested",
        ]);
        let mut router = ActionRouter::new("analytics");
        router.register("event", handler_fn(|_, _| async { Ok::<(), HandlerError>(()) }));

        assert_eq!(
            router.subscriptions(&registry),
            vec![
                "analytics:event:v1:requested".to_string(),
                "analytics:event:v1:success".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_handler_can_parse_payload() {
        use crate::envelope::Payload;
        use serde_json::json;

        let mut router = EventRouter::new();
        router.register_handler(
            "search:search:v1:requested",
            handler_fn(|_, env| async move {
                let payload = env.payload.ok_or_else(|| HandlerError::InvalidPayload("missing".into()))?;
                let query: serde_json::Value = payload.parse()?;
                if query["query"] != "rust" {
                    return Err(HandlerError::Failed("unexpected query".into()));
                }
                Ok::<(), HandlerError>(())
            }),
        );

        let mut data = Map::new();
        data.insert("query".into(), json!("rust"));
        let mut env = envelope("search:search:v1:requested");
        env.payload = Some(Payload::new(data));
        router.route_envelope(env).await.unwrap();
    }
}
