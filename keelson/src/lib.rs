//! # Event-Sourcing Kernel
//!
//! `keelson` turns commands addressed to versioned aggregate instances into
//! events, and delivers each batch of events atomically to a durable log and
//! then to subscribers. An aggregate catalogue tracks the current version of
//! every known aggregate so that concurrent writers detect conflicts before
//! they reach the store.
//!
//! ## Core Concepts
//!
//! - **[`VersionedName`]**: a stable `(name, version)` identifier for a
//!   payload shape.
//! - **[`Tuple`] / [`TupleSchema`]**: the serialization-independent container
//!   for command parameters, results and event payloads.
//! - **[`Command`] / [`Event`]**: immutable value objects addressed to an
//!   [`AggregateId`]; [`CommandType`] and [`EventType`] are their dispatch
//!   keys.
//! - **[`AggregateCatalogue`]**: per-aggregate version tracking with a
//!   reserve/commit protocol for optimistic concurrency.
//! - **[`EventBus`](bus::EventBus)**: the log-then-publish delivery pipeline,
//!   composed from filters.
//! - **[`CommandDispatcher`](dispatch::CommandDispatcher)**: routes commands
//!   to their [`CommandProcessor`](dispatch::CommandProcessor) and drives the
//!   whole cycle.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use keelson::{
//!     AggregateCatalogue, CommandType, EventType, FieldType, StreamTimestamp,
//!     Tuple, TupleSchema, TypeRegistry, Value, VersionedName, async_trait,
//!     bus::{
//!         BatchSinkExt, EventBus, EventLogExt, LogAndPublish, LoggingBatchSink, LoggingEventLog,
//!         StoreEventLog,
//!     },
//!     dispatch::{AggregateHistory, CommandDispatcher, CommandProcessor, Decision},
//!     store::in_memory::InMemoryEventStore,
//! };
//!
//! struct CreateWidget {
//!     created: EventType,
//! }
//!
//! #[async_trait]
//! impl CommandProcessor for CreateWidget {
//!     async fn process(
//!         &self,
//!         command: &keelson::Command,
//!         history: &AggregateHistory,
//!     ) -> keelson::Result<Decision> {
//!         if history.version() > 0 {
//!             return Err(keelson::Error::Rejected("widget already exists".into()));
//!         }
//!         let event = self.created.make_event(
//!             command.aggregate_id().instance_id(),
//!             command.timestamp().clone(),
//!             command.parameters().clone(),
//!         )?;
//!         Ok(Decision::new(vec![event], Tuple::empty()))
//!     }
//! }
//!
//! async fn widget_example() -> keelson::Result<()> {
//!     let payload = TupleSchema::new([("name", FieldType::Text)])?;
//!     let create = CommandType::new("widget", VersionedName::new("create", "0"));
//!     let created = EventType::new("widget", VersionedName::new("created", "0"));
//!
//!     let mut registry = TypeRegistry::new();
//!     registry.register_event(created.clone(), payload.clone());
//!     registry.register_command(create.clone(), CreateWidget { created });
//!
//!     let store = Arc::new(InMemoryEventStore::default());
//!     let catalogue = Arc::new(AggregateCatalogue::new());
//!     let log = StoreEventLog::new(store.clone(), catalogue.clone());
//!     let bus = EventBus::new(
//!         LogAndPublish::new(log.filter(LoggingEventLog::new)).filter(LoggingBatchSink::new),
//!     );
//!     let dispatcher = CommandDispatcher::new(Arc::new(registry), catalogue, store, bus);
//!
//!     let command = create.make_command(
//!         uuid::Uuid::new_v4(),
//!         StreamTimestamp::now("api"),
//!         payload.make([Value::from("sprocket")])?,
//!         TupleSchema::empty(),
//!     )?;
//!     dispatcher.dispatch(command).await?;
//!     Ok(())
//! }
//! ```
#![deny(missing_docs)]

pub use async_trait::async_trait;

pub mod aggregate;
pub mod binder;
pub mod bus;
pub mod catalogue;
pub mod cloudevent;
pub mod command;
pub mod dispatch;
pub mod event;
pub mod name;
pub mod registry;
pub mod store;
pub mod tuple;
pub mod upcaster;

pub use aggregate::{AggregateId, StreamTimestamp};
pub use binder::{EventBinder, Named};
pub use catalogue::AggregateCatalogue;
pub use cloudevent::CloudEvent;
pub use command::{Command, CommandType};
pub use event::{Event, EventType};
pub use name::VersionedName;
pub use registry::TypeRegistry;
pub use tuple::{FieldType, Tuple, TupleSchema, Value};

/// The error type for this crate.
#[derive(Debug, thiserror::Error, Clone)]
pub enum Error {
    /// A schema definition is malformed, e.g. a field name repeats.
    #[error("schema error: {0}")]
    Schema(String),
    /// A tuple was built with the wrong number of values.
    #[error("arity error: expected {expected} values, got {actual}")]
    Arity {
        /// The schema's arity.
        expected: usize,
        /// The number of values supplied.
        actual: usize,
    },
    /// A value does not satisfy its field's declared type.
    #[error("type error: field `{field}` expects {expected}, got {actual}")]
    Type {
        /// The offending field.
        field: String,
        /// The declared type.
        expected: String,
        /// The runtime shape that was supplied.
        actual: String,
    },
    /// No handler or decoder is registered for a command or event type.
    #[error("no registration for type {0}")]
    UnregisteredType(String),
    /// The catalogue's version for an aggregate differs from the one the
    /// caller expected.
    #[error("concurrency conflict on {aggregate_id}: expected version {expected}, actual {actual}")]
    Conflict {
        /// The contended aggregate.
        aggregate_id: AggregateId,
        /// The version the caller expected.
        expected: i64,
        /// The version the catalogue holds.
        actual: i64,
    },
    /// The event store rejected an append because the stream moved on.
    #[error("store conflict on {aggregate_id}: expected version {expected}, actual {actual}")]
    StoreConflict {
        /// The contended aggregate.
        aggregate_id: AggregateId,
        /// The version the append expected.
        expected: i64,
        /// The stream's actual version.
        actual: i64,
    },
    /// Wraps an I/O failure from the underlying event store.
    #[error("event store error: {0}")]
    Store(String),
    /// A publisher failed to deliver an event.
    #[error("publish error: {0}")]
    Publish(String),
    /// A command processor rejected a command.
    #[error("command rejected: {0}")]
    Rejected(String),
    /// A tuple could not be bound to or from a host type.
    #[error("binding error: {0}")]
    Binding(String),
    /// Commit or rollback was requested without an outstanding reservation.
    #[error("no reservation held for {0}")]
    NotReserved(AggregateId),
    /// A commit would move an aggregate's version backwards.
    #[error("version of {aggregate_id} cannot move from {current} to {proposed}")]
    VersionRegression {
        /// The aggregate.
        aggregate_id: AggregateId,
        /// The visible version.
        current: i64,
        /// The rejected version.
        proposed: i64,
    },
}

impl Error {
    /// Returns whether a caller may retry after reloading aggregate state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::StoreConflict { .. })
    }
}

/// A specialized `Result` type for this crate's operations.
pub type Result<T> = std::result::Result<T, Error>;
