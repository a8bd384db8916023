//! In-process event hub with transactional phasing.
//!
//! Domain code emits events into an [`EventCollector`] carried through the
//! call chain; nothing here relies on thread-local state. The collector is
//! drained at exactly two points:
//!
//! - **Before commit**: [`stage_outbox`] runs inside the producing
//!   transaction and writes one outbox row per routed event. It is the single
//!   bridge between domain events and the outbox; an error aborts the whole
//!   transaction.
//! - **After commit**: [`EventHub::dispatch`] hands the events to a bounded
//!   worker pool. Each (event, handler) pair runs isolated: a failing handler
//!   is logged and never affects its siblings, and handlers must not assume a
//!   sibling ran at all.
//!
//! ```text
//! saga body ──record──► EventCollector
//!                            │
//!              ┌─────────────┴──────────────┐
//!              ▼ before commit              ▼ after commit
//!        stage_outbox(tx)            EventHub::dispatch
//!        (same transaction)          (worker pool, isolated)
//! ```

use crate::error::{CommerceError, StoreError};
use crate::event::{DomainEvent, EventEnvelope};
use crate::ids::EventId;
use crate::store::{NewOutboxEvent, PurchaseTx};
use chrono::Utc;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};

/// Transaction-scoped buffer of emitted events.
///
/// Created at saga start, passed `&mut` through the call chain, drained once
/// at the commit boundary.
#[derive(Debug, Default)]
pub struct EventCollector {
    events: Vec<DomainEvent>,
}

impl EventCollector {
    /// Create an empty collector.
    #[must_use]
    pub const fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Record an event for both phases.
    pub fn record(&mut self, event: DomainEvent) {
        self.events.push(event);
    }

    /// Events recorded so far.
    #[must_use]
    pub fn events(&self) -> &[DomainEvent] {
        &self.events
    }

    /// Take all recorded events, leaving the collector empty.
    #[must_use]
    pub fn drain(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.events)
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Stage collected events into the outbox within the producing transaction.
///
/// For every event with an outbox route this allocates the next per-aggregate
/// version, wraps the payload in its wire envelope, and appends the row.
/// Events without a route (payment outcomes) are skipped. Returns the event
/// ids that were staged.
///
/// # Errors
///
/// Any store failure is returned unchanged so the caller aborts the
/// transaction; outbox rows and domain state always commit together.
pub async fn stage_outbox<T: PurchaseTx>(
    tx: &mut T,
    events: &[DomainEvent],
) -> Result<Vec<EventId>, StoreError> {
    let mut staged = Vec::new();
    for event in events {
        let Some(route) = event.route() else {
            continue;
        };
        let version = tx
            .next_event_version(route.aggregate_type, &route.aggregate_id)
            .await?;
        let event_id = EventId::new();
        let envelope = EventEnvelope {
            event_id,
            event_type: event.event_type().to_owned(),
            aggregate_id: route.aggregate_id.clone(),
            aggregate_type: route.aggregate_type.to_owned(),
            version,
            occurred_at: event.occurred_at(),
            payload: event
                .payload_json()
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
        };
        let row = NewOutboxEvent {
            event_id,
            event_type: envelope.event_type.clone(),
            aggregate_id: envelope.aggregate_id.clone(),
            aggregate_type: envelope.aggregate_type.clone(),
            version,
            topic: route.topic.to_owned(),
            partition_key: route.partition_key.clone(),
            payload: serde_json::to_value(&envelope)
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
            created_at: Utc::now(),
        };
        tx.append_outbox(&row).await?;
        staged.push(event_id);
    }
    Ok(staged)
}

/// An after-commit subscriber.
///
/// Uses explicit boxed futures so handlers can live together in one registry
/// as `Arc<dyn AfterCommitHandler>`.
pub trait AfterCommitHandler: Send + Sync {
    /// Stable name for logs.
    fn name(&self) -> &'static str;

    /// React to one committed event.
    fn handle(
        &self,
        event: &DomainEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), CommerceError>> + Send + '_>>;
}

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Receipt for one dispatch; awaiting it observes handler completion.
///
/// Dropping the receipt is fine: the handlers still run on the pool, the
/// caller just stops watching. Tests await it for determinism.
#[derive(Debug)]
pub struct DispatchReceipt {
    completions: Vec<oneshot::Receiver<()>>,
}

impl DispatchReceipt {
    /// Wait until every handler invocation of this dispatch has finished.
    pub async fn settled(self) {
        for completion in self.completions {
            // A dropped sender means the worker pool is shutting down; there
            // is nothing left to wait for.
            let _ = completion.await;
        }
    }
}

/// Registry and bounded worker pool for after-commit handlers.
///
/// Handlers are registered at wiring time, then the hub is shared as
/// `Arc<EventHub>`. The pool defaults to 2 × available parallelism, kept
/// separate from request-serving tasks so slow gateway calls never starve
/// them.
pub struct EventHub {
    handlers: Vec<Arc<dyn AfterCommitHandler>>,
    jobs: mpsc::Sender<Job>,
}

/// Queue depth between dispatchers and the worker pool. Dispatchers block
/// (rather than drop) when the queue is full.
const JOB_QUEUE_DEPTH: usize = 1024;

impl EventHub {
    /// Create a hub with a worker pool of `workers` tasks.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime, since the workers are
    /// spawned immediately.
    #[must_use]
    pub fn new(workers: usize) -> Self {
        let (jobs, rx) = mpsc::channel::<Job>(JOB_QUEUE_DEPTH);
        let rx = Arc::new(Mutex::new(rx));
        for worker in 0..workers.max(1) {
            let rx = Arc::clone(&rx);
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    match job {
                        Some(job) => job.await,
                        None => {
                            tracing::debug!(worker, "event hub worker exiting");
                            break;
                        }
                    }
                }
            });
        }
        Self { handlers: Vec::new(), jobs }
    }

    /// Create a hub sized to 2 × available parallelism.
    #[must_use]
    pub fn with_default_workers() -> Self {
        let parallelism = std::thread::available_parallelism().map_or(2, std::num::NonZero::get);
        Self::new(parallelism * 2)
    }

    /// Register a handler. Must happen before the hub is shared.
    pub fn subscribe(&mut self, handler: Arc<dyn AfterCommitHandler>) {
        self.handlers.push(handler);
    }

    /// Registered handler count.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Dispatch committed events to every handler on the worker pool.
    ///
    /// Each (event, handler) pair becomes one isolated job; handler errors are
    /// logged at ERROR and swallowed. The returned receipt resolves when all
    /// jobs of this dispatch have finished.
    pub async fn dispatch(&self, events: Vec<DomainEvent>) -> DispatchReceipt {
        let mut completions = Vec::with_capacity(events.len() * self.handlers.len());
        for event in events {
            for handler in &self.handlers {
                let handler = Arc::clone(handler);
                let event = event.clone();
                let (done, completion) = oneshot::channel();
                let job: Job = Box::pin(async move {
                    if let Err(error) = handler.handle(&event).await {
                        tracing::error!(
                            handler = handler.name(),
                            event_type = event.event_type(),
                            %error,
                            "after-commit handler failed"
                        );
                    }
                    let _ = done.send(());
                });
                if self.jobs.send(job).await.is_err() {
                    tracing::warn!("event hub worker pool is gone, dropping dispatch");
                    return DispatchReceipt { completions };
                }
                completions.push(completion);
            }
        }
        DispatchReceipt { completions }
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("handlers", &self.handlers.len())
            .finish_non_exhaustive()
    }
}
