//! The event delivery pipeline.
//!
//! Every dispatch produces one [`EventBatch`], which is handed as a unit to a
//! [`BatchSink`]. The standard sink, [`LogAndPublish`], first writes the whole
//! batch to an [`EventLog`] and only then hands each event, in batch order,
//! to every [`EventPublisher`]. If the log write fails no publisher sees any
//! event of the batch.
//!
//! All three capabilities compose through filters: a filter takes a sink and
//! returns a sink of the same capability, so `base.filter(f1).filter(f2)`
//! runs `f2` outermost. Cross-cutting behaviour (logging, retry, limiting) is
//! added this way rather than by changing a sink.
//!
//! ```rust
//! # use std::sync::Arc;
//! use keelson::{
//!     AggregateCatalogue,
//!     bus::{
//!         BatchSinkExt, EventBus, EventLogExt, LogAndPublish, LoggingBatchSink, LoggingEventLog,
//!         StoreEventLog,
//!     },
//!     store::in_memory::InMemoryEventStore,
//! };
//!
//! let store = Arc::new(InMemoryEventStore::default());
//! let catalogue = Arc::new(AggregateCatalogue::new());
//! let bus = EventBus::new(
//!     LogAndPublish::new(StoreEventLog::new(store, catalogue).filter(LoggingEventLog::new))
//!         .filter(LoggingBatchSink::new),
//! );
//! # let _ = bus;
//! ```
use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;
use uuid::Uuid;

use crate::{Event, Result};

mod filter;
mod log;
mod pipeline;
mod publish;

pub use filter::{BatchSinkExt, ConcurrencyLimit, EventLogExt, EventPublisherExt, LoggingBatchSink};
pub use log::{EventLog, LoggingEventLog, StoreEventLog};
pub use pipeline::{LogAndPublish, PublishFailurePolicy};
pub use publish::{EventPublisher, LoggingEventPublisher, RetryingPublisher};

/// An ordered group of events delivered as one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct EventBatch {
    id: Uuid,
    events: Vec<Event>,
}

impl EventBatch {
    /// Creates an empty batch with a fresh id.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            events: Vec::new(),
        }
    }

    /// Adds an event to the end of the batch.
    pub fn accept(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Returns the batch id, used to correlate log records.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the events in insertion order.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Returns the number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns whether the batch holds no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Default for EventBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<Event> for EventBatch {
    fn from_iter<I: IntoIterator<Item = Event>>(iter: I) -> Self {
        Self {
            id: Uuid::new_v4(),
            events: iter.into_iter().collect(),
        }
    }
}

/// Accepts whole batches.
#[async_trait]
pub trait BatchSink: Send + Sync {
    /// Delivers a batch. Completion means the batch is durable (or failed as
    /// a whole).
    async fn deliver(&self, batch: &EventBatch) -> Result<()>;
}

#[async_trait]
impl<S> BatchSink for Arc<S>
where
    S: BatchSink + ?Sized,
{
    async fn deliver(&self, batch: &EventBatch) -> Result<()> {
        (**self).deliver(batch).await
    }
}

/// The entry point for dispatching events.
///
/// Cheap to clone; clones share the same sink.
#[derive(Clone)]
pub struct EventBus {
    sink: Arc<dyn BatchSink>,
}

impl EventBus {
    /// Creates a bus delivering to `sink`.
    pub fn new<S: BatchSink + 'static>(sink: S) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    /// Builds a batch with `build` and delivers it.
    ///
    /// Returns once the batch is durable, or with the error that failed it.
    pub async fn dispatch<F>(&self, build: F) -> Result<()>
    where
        F: FnOnce(&mut EventBatch),
    {
        let mut batch = EventBatch::new();
        build(&mut batch);
        self.deliver(batch).await
    }

    /// Delivers a single event as a one-event batch.
    pub async fn accept(&self, event: Event) -> Result<()> {
        self.dispatch(|batch| batch.accept(event)).await
    }

    /// Delivers a prepared batch. Empty batches are not delivered.
    #[instrument(skip(self, batch), fields(batch.id = %batch.id(), batch.len = batch.len()))]
    pub async fn deliver(&self, batch: EventBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.sink.deliver(&batch).await
    }
}
