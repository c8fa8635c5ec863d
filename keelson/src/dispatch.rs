//! Command processing.
//!
//! [`CommandDispatcher::dispatch`] drives one command through the whole
//! cycle:
//!
//! 1. resolve the [`CommandProcessor`] registered for the command's type;
//! 2. load the aggregate's history from the store (upcast to current
//!    payload versions) and bring the catalogue up to date with it;
//! 3. let the processor decide on events and a result;
//! 4. reserve the next version in the catalogue, failing with
//!    [`Error::Conflict`] if another writer got there first;
//! 5. deliver the events as one batch and commit the reservation, or roll it
//!    back if the log rejected the batch.
//!
//! Step 5 runs on its own Tokio task, so once the batch has been handed to
//! the log it runs to completion even if the caller stops waiting.
use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    AggregateCatalogue, AggregateId, Command, CommandType, Error, Event, EventType, Result,
    Tuple, TypeRegistry,
    binder,
    bus::{EventBatch, EventBus},
    store::EventStore,
    upcaster::UpcasterChain,
};

/// The domain logic for one command type.
#[async_trait]
pub trait CommandProcessor: Send + Sync {
    /// Decides which events the command produces and what it returns, given
    /// the aggregate's history.
    ///
    /// Return [`Error::Rejected`] to refuse the command.
    async fn process(&self, command: &Command, history: &AggregateHistory) -> Result<Decision>;
}

/// An aggregate's committed events, in order, as loaded for a command.
#[derive(Debug, Clone)]
pub struct AggregateHistory {
    aggregate_id: AggregateId,
    events: Vec<Event>,
}

impl AggregateHistory {
    /// Creates a history.
    pub fn new(aggregate_id: AggregateId, events: Vec<Event>) -> Self {
        Self {
            aggregate_id,
            events,
        }
    }

    /// Returns the aggregate.
    pub fn aggregate_id(&self) -> &AggregateId {
        &self.aggregate_id
    }

    /// Returns the events in stream order.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Returns the aggregate's version: the number of committed events, as
    /// the [`EventStore`] counts it.
    pub fn version(&self) -> i64 {
        self.events.len() as i64
    }

    /// Folds the history into a state value.
    pub fn fold<T, F>(&self, init: T, apply: F) -> T
    where
        F: FnMut(T, &Event) -> T,
    {
        self.events.iter().fold(init, apply)
    }
}

/// What a processor decided: the events to record and the command's result.
#[derive(Debug, Clone)]
pub struct Decision {
    events: Vec<Event>,
    result: Tuple,
}

impl Decision {
    /// Creates a decision.
    pub fn new(events: Vec<Event>, result: Tuple) -> Self {
        Self { events, result }
    }

    /// A decision that records nothing and returns `result`.
    pub fn reply(result: Tuple) -> Self {
        Self::new(Vec::new(), result)
    }

    /// Returns the events to record.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Returns the result.
    pub fn result(&self) -> &Tuple {
        &self.result
    }
}

/// Routes commands to their processors and records the outcome.
pub struct CommandDispatcher<S> {
    registry: Arc<TypeRegistry>,
    catalogue: Arc<AggregateCatalogue>,
    store: Arc<S>,
    bus: EventBus,
    upcasters: UpcasterChain,
}

impl<S: EventStore + 'static> CommandDispatcher<S> {
    /// Creates a dispatcher.
    ///
    /// `bus` should log through the same `store` and `catalogue`, typically
    /// via [`StoreEventLog`](crate::bus::StoreEventLog).
    pub fn new(
        registry: Arc<TypeRegistry>,
        catalogue: Arc<AggregateCatalogue>,
        store: Arc<S>,
        bus: EventBus,
    ) -> Self {
        Self {
            registry,
            catalogue,
            store,
            bus,
            upcasters: UpcasterChain::new(),
        }
    }

    /// Sets the upcasters applied to loaded streams.
    #[must_use]
    pub fn with_upcasters(mut self, upcasters: UpcasterChain) -> Self {
        self.upcasters = upcasters;
        self
    }

    /// Loads an aggregate's history, upcasting every event.
    #[instrument(skip(self), fields(aggregate.id = %aggregate_id))]
    pub async fn load(&self, aggregate_id: &AggregateId) -> Result<AggregateHistory> {
        let raw: Vec<Event> = self.store.load_stream(aggregate_id).try_collect().await?;
        let events = raw
            .into_iter()
            .map(|e| self.upcasters.upcast(e))
            .collect::<Result<Vec<_>>>()?;
        Ok(AggregateHistory::new(aggregate_id.clone(), events))
    }

    /// Processes a command and returns its result.
    ///
    /// Must be called from within a Tokio runtime. Conflicts
    /// ([`Error::is_retryable`]) leave no trace and can be retried after the
    /// caller decides to; every other error is final for this command.
    #[instrument(skip(self, command), fields(command = %CommandType::of(&command), aggregate.id = %command.aggregate_id()))]
    pub async fn dispatch(&self, command: Command) -> Result<Tuple> {
        let processor = self
            .registry
            .resolve_command_handler(&CommandType::of(&command))?;

        let aggregate_id = command.aggregate_id().clone();
        let history = self.load(&aggregate_id).await?;
        let expected = history.version();
        self.catalogue.observe(&aggregate_id, expected);

        let Decision { events, result } = processor.process(&command, &history).await?;
        if result.schema() != command.result_schema() {
            return Err(Error::Type {
                field: "<result>".into(),
                expected: command.result_schema().to_string(),
                actual: result.schema().to_string(),
            });
        }
        if events.is_empty() {
            debug!("command produced no events");
            return Ok(result);
        }
        self.check_events(&events)?;

        let produced = events
            .iter()
            .filter(|e| *e.aggregate_id() == aggregate_id)
            .count() as i64;
        let batch: EventBatch = events.into_iter().collect();

        // No await between reserving and spawning, so a dropped caller can
        // never strand a reservation.
        let reservation =
            Reservation::acquire(self.catalogue.clone(), aggregate_id, expected, batch.id())?;
        let bus = self.bus.clone();
        let delivery = tokio::spawn(async move {
            match bus.deliver(batch).await {
                Ok(()) => reservation.commit(expected + produced),
                // The batch is durable; publishing is layered on top.
                Err(Error::Publish(message)) => {
                    reservation.commit(expected + produced)?;
                    Err(Error::Publish(message))
                }
                Err(e) => {
                    reservation.rollback();
                    Err(e)
                }
            }
        });

        delivery
            .await
            .map_err(|e| Error::Store(format!("event delivery task failed: {e}")))??;
        Ok(result)
    }

    /// Checks every produced event against its registered payload schema.
    fn check_events(&self, events: &[Event]) -> Result<()> {
        for event in events {
            let schema = self.registry.resolve_event_schema(&EventType::of(event))?;
            if *event.payload().schema() != schema {
                return Err(Error::Type {
                    field: format!("<payload of {}>", event.name()),
                    expected: schema.to_string(),
                    actual: event.payload().schema().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Processes a command and binds its result into `T`.
    pub async fn dispatch_as<T: DeserializeOwned>(&self, command: Command) -> Result<T> {
        let result = self.dispatch(command).await?;
        binder::bind(&result)
    }
}

/// A catalogue reservation held on behalf of one batch. Dropping it without
/// settling rolls it back.
///
/// A [`StoreEventLog`](crate::bus::StoreEventLog) commits the reservation
/// itself, with the version the store reports, as soon as the batch is
/// durable; settling then only has to cover logs that leave it open.
struct Reservation {
    catalogue: Arc<AggregateCatalogue>,
    aggregate_id: AggregateId,
    owner: Uuid,
    settled: bool,
}

impl Reservation {
    fn acquire(
        catalogue: Arc<AggregateCatalogue>,
        aggregate_id: AggregateId,
        expected_version: i64,
        owner: Uuid,
    ) -> Result<Self> {
        catalogue.reserve(&aggregate_id, expected_version, owner)?;
        Ok(Self {
            catalogue,
            aggregate_id,
            owner,
            settled: false,
        })
    }

    fn is_held(&self) -> bool {
        self.catalogue
            .reservation(&self.aggregate_id)
            .is_some_and(|(_, owner)| owner == self.owner)
    }

    /// Commits at `new_version` unless the log already did.
    fn commit(mut self, new_version: i64) -> Result<()> {
        self.settled = true;
        if !self.is_held() {
            return Ok(());
        }
        let committed = self
            .catalogue
            .commit_owned(&self.aggregate_id, self.owner, new_version);
        if committed.is_err() {
            self.release();
        }
        committed
    }

    fn rollback(mut self) {
        self.settled = true;
        self.release();
    }

    fn release(&self) {
        // Already settled by the log, or never ours.
        if self
            .catalogue
            .rollback_owned(&self.aggregate_id, self.owner)
            .is_ok()
        {
            debug!(aggregate.id = %self.aggregate_id, "reservation released");
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.settled {
            self.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_reservation_is_rolled_back() {
        let catalogue = Arc::new(AggregateCatalogue::new());
        let id = AggregateId::random("widget").expect("id");
        catalogue.observe(&id, 3);

        let reservation = Reservation::acquire(catalogue.clone(), id.clone(), 3, Uuid::new_v4()).expect("reserve");
        assert_eq!(catalogue.reserved_version(&id), Some(3));
        drop(reservation);

        assert_eq!(catalogue.reserved_version(&id), None);
        assert_eq!(catalogue.current_version(&id), 3);
    }

    #[test]
    fn committed_reservation_is_not_rolled_back() {
        let catalogue = Arc::new(AggregateCatalogue::new());
        let id = AggregateId::random("widget").expect("id");

        Reservation::acquire(catalogue.clone(), id.clone(), 0, Uuid::new_v4())
            .expect("reserve")
            .commit(2)
            .expect("commit");
        assert_eq!(catalogue.current_version(&id), 2);
    }

    #[test]
    fn failed_commit_releases_the_reservation() {
        let catalogue = Arc::new(AggregateCatalogue::new());
        let id = AggregateId::random("widget").expect("id");
        catalogue.observe(&id, 5);

        let err = Reservation::acquire(catalogue.clone(), id.clone(), 5, Uuid::new_v4())
            .expect("reserve")
            .commit(1)
            .expect_err("regression");
        assert!(matches!(err, Error::VersionRegression { .. }));
        assert_eq!(catalogue.reserved_version(&id), None);
    }

    #[test]
    fn settled_elsewhere_reservation_leaves_later_writers_alone() {
        let catalogue = Arc::new(AggregateCatalogue::new());
        let id = AggregateId::random("widget").expect("id");
        let owner = Uuid::new_v4();

        let reservation =
            Reservation::acquire(catalogue.clone(), id.clone(), 0, owner).expect("reserve");
        // The log commits on the batch's behalf and the next writer moves in.
        catalogue.commit_owned(&id, owner, 1).expect("log commit");
        catalogue.check_and_reserve(&id, 1).expect("next writer");

        drop(reservation);
        assert_eq!(catalogue.reserved_version(&id), Some(1));
        assert_eq!(catalogue.current_version(&id), 1);
    }
}
