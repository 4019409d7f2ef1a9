//! # Platform Events
//!
//! Canonical event envelope shared by every platform service (analytics,
//! auth, messaging, search, waitlist, quotes) together with its validator,
//! the canonical event type registry and inbound routing.
//!
//! ## Overview
//!
//! - **Envelope**: [`EventEnvelope`] with a stable JSON wire shape
//! - **Validation**: field-scoped [`ValidationError`]s in a fixed order
//! - **Event Types**: `{service}:{action}:v{N}:{state}` parsed into [`EventType`]
//! - **Registry**: `action:state` to canonical type lookup per service
//! - **Router**: exact-type and per-service action dispatch
//! - **Event Bus**: in-process publish/subscribe transport
//!
//! ## Usage
//!
//! ### Building an envelope
//!
//! ```rust,no_run
//! use platform_events::{EventEnvelope, Payload};
//! use serde_json::{json, Map};
//!
//! let mut data = Map::new();
//! data.insert("query".into(), json!("rust"));
//!
//! let envelope = EventEnvelope::new(
//!     "search:search:v1:requested",
//!     "user_123",
//!     "campaign_1",
//!     platform_events::ids::correlation_id(),
//!     Some(Payload::new(data)),
//!     Map::new(),
//! );
//! envelope.validate().unwrap();
//! ```
//!
//! ### Routing inbound envelopes
//!
//! ```rust,no_run
//! use platform_events::{handler_fn, ActionRouter, EventEnvelope, EventState, HandlerError};
//!
//! async fn route(envelope: EventEnvelope) {
//!     let mut router = ActionRouter::new("search").only_states(&[EventState::Requested]);
//!     router.register("search", handler_fn(|ctx, env| async move {
//!         tracing::info!(request_id = %ctx.request_id, event_type = %env.event_type, "searching");
//!         Ok::<(), HandlerError>(())
//!     }));
//!
//!     let outcome = router.dispatch(envelope).await.unwrap();
//!     println!("{:?}", outcome);
//! }
//! ```
//!
//! ## Topic Patterns
//!
//! Bus topics are the colon separated segments of the event type:
//! - `search:search:v1:requested` - Specific event
//! - `search:#` - Every search event
//! - `*:*:v1:failed` - Every failed version 1 event
//!
//! `*` matches exactly one segment, `#` matches zero or more.

pub mod bus;
pub mod config;
pub mod envelope;
pub mod event_type;
pub mod ids;
pub mod registry;
pub mod router;
pub mod validation;

// Re-export main types
pub use bus::{spawn_dispatch, EventBus, EventBusError, EventBusResult, EventBusStats, MemoryEventBus, Subscription};
pub use config::EnvelopeConfig;
pub use envelope::{
    EmissionRecord, EmissionStatus, EventEnvelope, GlobalContext, Metadata, Payload, Source,
    DEFAULT_ENVIRONMENT, DEFAULT_VERSION, EVENT_EMISSION_KEY, IDEMPOTENCY_KEY,
};
pub use event_type::{
    is_health_event_type, EventState, EventType, CAMPAIGN_PREFIX, ECHO_EVENT_TYPE, HEALTH_ACTION,
    HEARTBEAT_STATE,
};
pub use ids::IdKind;
pub use registry::{CanonicalTypeRegistry, CanonicalTypeSource, LazyRegistry, StaticTypeSource};
pub use router::{
    handler_fn, ActionRouter, DispatchContext, DispatchOutcome, EventHandler, EventRouter,
    HandlerError, RouterError, RouterResult, SkipReason,
};
pub use validation::{
    normalize_event_type, sanitize_event_type, should_process_event, NormalizeError,
    ValidationError, ValidationResult,
};
