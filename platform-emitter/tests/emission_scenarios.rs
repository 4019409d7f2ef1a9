//! End-to-end emission scenarios.
//!
//! These tests drive the retrying pipeline and the concurrent emitter with
//! scripted transports, on a paused clock where backoff is involved:
//! 1. Transient failures recovered by retry
//! 2. Retry budget exhaustion and dead-lettering
//! 3. Idempotency key stability across attempts
//! 4. Queue overload and shutdown
//! 5. Emission through the in-memory bus into an action router

use async_trait::async_trait;
use platform_emitter::{
    BackoffPolicy, ConcurrentEmitter, DeliveryError, DeliveryTransport, EmitReceipt, EmitResult,
    Emitter, EmitterConfig, MemoryDeadLetterSink, RetryingPipeline, SubmitError,
};
use platform_events::{
    handler_fn, spawn_dispatch, ActionRouter, EmissionStatus, EnvelopeConfig, EventBus, EventEnvelope,
    EventState, HandlerError, MemoryEventBus,
};
use serde_json::Map;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

/// Transport failing a fixed number of times before succeeding, recording
/// the idempotency key seen on every attempt.
struct ScriptedTransport {
    failures: u32,
    calls: AtomicU32,
    seen_keys: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    fn failing(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicU32::new(0),
            seen_keys: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeliveryTransport for ScriptedTransport {
    async fn deliver(&self, envelope: &EventEnvelope) -> Result<String, DeliveryError> {
        let key = envelope.idempotency_key().unwrap_or_default().to_string();
        self.seen_keys.lock().unwrap().push(key);

        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            Err(DeliveryError::Transient("upstream unavailable".into()))
        } else {
            Ok(format!("msg-{}", n))
        }
    }
}

/// Emitter that blocks until the test opens the gate.
struct GatedEmitter {
    gate: Arc<Semaphore>,
    started: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl Emitter for GatedEmitter {
    async fn emit(&self, envelope: EventEnvelope) -> EmitResult<EmitReceipt> {
        let _ = self.started.send(envelope.event_type.clone());
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
        Ok(EmitReceipt {
            envelope,
            delivered_id: Some("gated".into()),
            attempts: 1,
            dead_lettered: false,
        })
    }
}

fn envelope(event_type: &str) -> EventEnvelope {
    EnvelopeConfig::default().envelope(
        event_type,
        "user_42",
        "campaign_7",
        "corr_0123456789",
        None,
        Map::new(),
    )
}

fn dlq_policy() -> BackoffPolicy {
    BackoffPolicy {
        initial_interval: Duration::from_millis(10),
        multiplier: 2.0,
        max_interval: Duration::from_secs(1),
        max_elapsed_time: Duration::from_millis(100),
        randomization_factor: 0.0,
        max_attempts: None,
    }
}

#[tokio::test(start_paused = true)]
async fn test_search_request_recovers_after_two_failures() {
    let transport = ScriptedTransport::failing(2);
    let sink = Arc::new(MemoryDeadLetterSink::new());
    let pipeline = RetryingPipeline::new(transport.clone())
        .with_policy(BackoffPolicy::default().without_jitter())
        .with_dead_letter_sink(sink.clone());

    let receipt = pipeline
        .emit(envelope("search:search:v1:requested"))
        .await
        .unwrap();

    assert!(receipt.is_ok());
    assert_eq!(receipt.attempts, 3);
    assert_eq!(transport.calls(), 3);

    let statuses: Vec<_> = receipt
        .envelope
        .emission_log()
        .iter()
        .map(|r| r.status)
        .collect();
    assert_eq!(
        statuses,
        vec![EmissionStatus::Failed, EmissionStatus::Failed, EmissionStatus::Emitted]
    );
    assert!(sink.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_budget_dead_letters_exactly_once() {
    let transport = ScriptedTransport::failing(u32::MAX);
    let sink = Arc::new(MemoryDeadLetterSink::new());
    let pipeline = RetryingPipeline::new(transport.clone())
        .with_policy(dlq_policy())
        .with_dead_letter_sink(sink.clone());

    let receipt = pipeline
        .emit(envelope("auth:login:v1:requested"))
        .await
        .unwrap();

    // Waits of 10, 20 and 40ms fit the 100ms budget; the next 80ms does not.
    assert!(!receipt.is_ok());
    assert!(receipt.dead_lettered);
    assert_eq!(receipt.attempts, 4);
    assert_eq!(transport.calls(), 4);

    let log = receipt.envelope.emission_log();
    assert_eq!(log.len(), 5);
    assert!(log.iter().all(|r| r.status == EmissionStatus::Failed));
    assert_eq!(log.last().unwrap().attempt, 0);

    let records = sink.records("auth:login:v1:requested").await;
    assert_eq!(records.len(), 1);
    assert_eq!(sink.len().await, 1);
    assert_eq!(records[0].event_type, "auth:login:v1:requested");
    assert_eq!(records[0].error, "transient delivery failure: upstream unavailable");
    assert_eq!(records[0].metadata.emission_log().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_idempotency_key_stable_across_attempts() {
    let transport = ScriptedTransport::failing(u32::MAX);
    let sink = Arc::new(MemoryDeadLetterSink::new());
    let pipeline = RetryingPipeline::new(transport.clone())
        .with_policy(dlq_policy())
        .with_dead_letter_sink(sink.clone());

    let receipt = pipeline
        .emit(envelope("messaging:send_message:v1:requested"))
        .await
        .unwrap();

    let key = receipt.envelope.idempotency_key().unwrap().to_string();
    let seen = transport.seen_keys.lock().unwrap().clone();
    assert_eq!(seen.len(), 4);
    assert!(seen.iter().all(|k| *k == key));

    let records = sink.records("messaging:send_message:v1:requested").await;
    assert_eq!(records[0].idempotency_key(), Some(key.as_str()));
    assert!(receipt
        .envelope
        .emission_log()
        .iter()
        .all(|r| r.event_id == key));
}

#[tokio::test]
async fn test_full_queue_fails_fast() {
    let gate = Arc::new(Semaphore::new(0));
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();
    let emitter = Arc::new(
        ConcurrentEmitter::new(
            EmitterConfig {
                workers: 1,
                queue_capacity: 1,
            },
            Arc::new(GatedEmitter {
                gate: gate.clone(),
                started: started_tx,
            }),
        )
        .unwrap(),
    );

    // First submission occupies the only worker.
    let first = {
        let emitter = emitter.clone();
        tokio::spawn(async move { emitter.submit(envelope("quotes:quote:v1:requested")).await })
    };
    assert_eq!(started_rx.recv().await.as_deref(), Some("quotes:quote:v1:requested"));

    // Second fills the queue.
    let second = {
        let emitter = emitter.clone();
        tokio::spawn(async move { emitter.submit(envelope("quotes:quote:v1:success")).await })
    };
    while emitter.pending() < 1 {
        tokio::task::yield_now().await;
    }

    // Third is rejected without waiting.
    let third = tokio::time::timeout(
        Duration::from_millis(100),
        emitter.submit(envelope("quotes:quote:v1:failed")),
    )
    .await
    .expect("submit must not block on a full queue");
    assert!(matches!(
        third,
        Err(SubmitError::QueueFull { ref event_type }) if event_type == "quotes:quote:v1:failed"
    ));

    gate.add_permits(2);
    assert!(first.await.unwrap().unwrap().is_ok());
    assert!(second.await.unwrap().unwrap().is_ok());

    let stats = emitter.stats();
    assert_eq!(stats.submitted, 3);
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.delivered, 2);
    emitter.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_drops_queued_submissions() {
    let gate = Arc::new(Semaphore::new(0));
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();
    let emitter = Arc::new(
        ConcurrentEmitter::new(
            EmitterConfig {
                workers: 1,
                queue_capacity: 4,
            },
            Arc::new(GatedEmitter {
                gate: gate.clone(),
                started: started_tx,
            }),
        )
        .unwrap(),
    );

    let in_flight = {
        let emitter = emitter.clone();
        tokio::spawn(async move { emitter.submit(envelope("waitlist:join:v1:requested")).await })
    };
    started_rx.recv().await.unwrap();

    let queued: Vec<_> = (0..2)
        .map(|_| {
            let emitter = emitter.clone();
            tokio::spawn(async move { emitter.submit(envelope("waitlist:join:v1:success")).await })
        })
        .collect();
    while emitter.pending() < 2 {
        tokio::task::yield_now().await;
    }

    // Shutdown is signalled before the in-flight emission is released.
    tokio::join!(emitter.shutdown(), async {
        gate.add_permits(1);
    });

    assert!(in_flight.await.unwrap().unwrap().is_ok());
    for task in queued {
        assert!(matches!(task.await.unwrap(), Err(SubmitError::Dropped)));
    }
    assert!(matches!(
        emitter.submit(envelope("waitlist:join:v1:requested")).await,
        Err(SubmitError::ShuttingDown)
    ));
}

#[tokio::test]
async fn test_emit_through_bus_into_router() {
    let bus = Arc::new(MemoryEventBus::new());
    let received = Arc::new(Mutex::new(Vec::new()));

    let mut analytics = ActionRouter::new("analytics").only_states(&[EventState::Requested]);
    let sink = received.clone();
    analytics.register(
        "track",
        handler_fn(move |ctx, env| {
            let sink = sink.clone();
            async move {
                sink.lock()
                    .unwrap()
                    .push((ctx.event_type, env.idempotency_key().map(str::to_owned)));
                Ok::<(), HandlerError>(())
            }
        }),
    );
    // Same action name under another service must never reach this handler.
    let misrouted = Arc::new(AtomicU32::new(0));
    let counter = misrouted.clone();
    analytics.register(
        "send_message",
        handler_fn(move |_, _| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), HandlerError>(())
            }
        }),
    );

    let subscription = bus.subscribe("#").await.unwrap();
    let dispatcher = spawn_dispatch(subscription, Arc::new(analytics));

    let pipeline = RetryingPipeline::new(bus.clone()).with_policy(BackoffPolicy::no_retry());
    let emitter = ConcurrentEmitter::new(
        EmitterConfig {
            workers: 2,
            queue_capacity: 8,
        },
        Arc::new(pipeline),
    )
    .unwrap();

    emitter
        .submit(envelope("messaging:send_message:v1:requested"))
        .await
        .unwrap();
    emitter
        .submit(envelope("analytics:track:v1:success"))
        .await
        .unwrap();
    let receipt = emitter
        .submit(envelope("analytics:track:v1:requested"))
        .await
        .unwrap();
    assert!(receipt.is_ok());

    for _ in 0..100 {
        if !received.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    {
        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0, "analytics:track:v1:requested");
        assert_eq!(received[0].1.as_deref(), receipt.envelope.idempotency_key());
    }
    assert_eq!(misrouted.load(Ordering::SeqCst), 0);
    assert_eq!(bus.stats().await.events_published, 3);

    emitter.shutdown().await;
    drop(emitter);
    drop(bus);
    tokio::time::timeout(Duration::from_secs(1), dispatcher)
        .await
        .unwrap()
        .unwrap();
}
