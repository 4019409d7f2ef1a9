//! Concurrent, backpressure-aware emitter
//!
//! A fixed pool of workers drains one bounded queue. Each submission carries
//! a private result channel, so a submitter only ever waits for its own
//! envelope. A full queue is reported immediately instead of blocking.
//!
//! Shutdown stops workers between queue reads; in-flight emissions finish,
//! anything still queued resolves as [`SubmitError::Dropped`].

use crate::config::EmitterConfig;
use crate::error::{ConfigError, EmitResult, SubmitError, SubmitResult};
use async_trait::async_trait;
use platform_events::EventEnvelope;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Outcome of one emission.
#[derive(Debug, Clone, PartialEq)]
pub struct EmitReceipt {
    /// Envelope as emitted, including its emission log
    pub envelope: EventEnvelope,
    /// Transport id of the successful delivery
    pub delivered_id: Option<String>,
    /// Delivery attempts made
    pub attempts: u32,
    /// Whether a dead-letter record was written
    pub dead_lettered: bool,
}

impl EmitReceipt {
    /// Whether the envelope was delivered.
    pub fn is_ok(&self) -> bool {
        self.delivered_id.is_some()
    }
}

/// Something that turns an envelope into a delivery outcome.
#[async_trait]
pub trait Emitter: Send + Sync {
    /// Emit one envelope.
    async fn emit(&self, envelope: EventEnvelope) -> EmitResult<EmitReceipt>;
}

/// Emitter statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitterStats {
    /// Envelopes offered to `submit` while it was accepting work
    pub submitted: u64,
    /// Refused by a full or closed queue
    pub rejected: u64,
    /// Delivered successfully
    pub delivered: u64,
    /// Invalid or dead-lettered
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    rejected: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

struct Job {
    envelope: EventEnvelope,
    reply: oneshot::Sender<EmitResult<EmitReceipt>>,
}

/// Worker pool in front of an [`Emitter`].
pub struct ConcurrentEmitter {
    sender: mpsc::Sender<Job>,
    shutdown: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
    config: EmitterConfig,
}

impl std::fmt::Debug for ConcurrentEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentEmitter")
            .field("config", &self.config)
            .field("pending", &self.pending())
            .finish()
    }
}

impl ConcurrentEmitter {
    /// Start the worker pool. Must be called inside a Tokio runtime.
    pub fn new(config: EmitterConfig, emitter: Arc<dyn Emitter>) -> Result<Self, ConfigError> {
        config.validate()?;

        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let (shutdown, _) = watch::channel(false);
        let counters = Arc::new(Counters::default());

        let workers: Vec<JoinHandle<()>> = (0..config.workers)
            .map(|id| {
                let span = tracing::info_span!("emitter_worker", worker = id);
                tokio::spawn(
                    worker_loop(
                        receiver.clone(),
                        shutdown.subscribe(),
                        emitter.clone(),
                        counters.clone(),
                    )
                    .instrument(span),
                )
            })
            .collect();

        tracing::debug!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            "Concurrent emitter started"
        );

        Ok(Self {
            sender,
            shutdown,
            workers: Mutex::new(workers),
            counters,
            config,
        })
    }

    /// Start with sizing from the environment.
    pub fn from_env(emitter: Arc<dyn Emitter>) -> Result<Self, ConfigError> {
        Self::new(EmitterConfig::from_env(), emitter)
    }

    /// Queue an envelope and wait for its outcome.
    ///
    /// Fails fast with [`SubmitError::QueueFull`] when the queue is at capacity.
    pub async fn submit(&self, envelope: EventEnvelope) -> SubmitResult<EmitReceipt> {
        if *self.shutdown.borrow() {
            return Err(SubmitError::ShuttingDown);
        }
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);

        let (reply, result) = oneshot::channel();
        match self.sender.try_send(Job { envelope, reply }) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    event_type = %job.envelope.event_type,
                    queue_capacity = self.config.queue_capacity,
                    "Emission queue full, dropping event"
                );
                return Err(SubmitError::QueueFull {
                    event_type: job.envelope.event_type,
                });
            }
            Err(TrySendError::Closed(job)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    event_type = %job.envelope.event_type,
                    "Emission queue closed, dropping event"
                );
                return Err(SubmitError::ShuttingDown);
            }
        }

        match result.await {
            Ok(outcome) => Ok(outcome?),
            Err(_) => Err(SubmitError::Dropped),
        }
    }

    /// Envelopes waiting in the queue.
    pub fn pending(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> EmitterStats {
        EmitterStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Pool sizing in use.
    pub fn config(&self) -> &EmitterConfig {
        &self.config
    }

    /// Stop accepting work and wait for every worker to exit.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);

        let workers: Vec<_> = self.workers.lock().await.drain(..).collect();
        for handle in workers {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Emitter worker panicked");
            }
        }

        tracing::debug!("Concurrent emitter stopped");
    }
}

async fn worker_loop(
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    mut shutdown: watch::Receiver<bool>,
    emitter: Arc<dyn Emitter>,
    counters: Arc<Counters>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let job = {
            let mut rx = receiver.lock().await;
            tokio::select! {
                biased;
                _ = shutdown.changed() => None,
                job = rx.recv() => job,
            }
        };
        let Some(job) = job else {
            break;
        };

        let event_type = job.envelope.event_type.clone();
        let outcome = emitter.emit(job.envelope).await;
        match &outcome {
            Ok(receipt) if receipt.is_ok() => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Ok(_) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(event_type = %event_type, error = %e, "Rejected invalid envelope");
            }
        }

        if job.reply.send(outcome).is_err() {
            tracing::debug!(event_type = %event_type, "Submitter went away before the result");
        }
    }
}
