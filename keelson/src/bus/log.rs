//! The durable log stage of the pipeline.
use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tracing::{debug, instrument, trace, warn};

use super::EventBatch;
use crate::{
    AggregateCatalogue, AggregateId, Error, Result,
    store::{EventStore, ExpectedVersion, StreamAppend},
};

/// Durably records batches of events.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Writes all events of the batch, in order. Either every event is
    /// written or none is.
    async fn write(&self, batch: &EventBatch) -> Result<()>;
}

#[async_trait]
impl<L> EventLog for Arc<L>
where
    L: EventLog + ?Sized,
{
    async fn write(&self, batch: &EventBatch) -> Result<()> {
        (**self).write(batch).await
    }
}

/// An [`EventLog`] backed by an [`EventStore`].
///
/// Events are grouped per aggregate, keeping their relative order, and
/// appended through [`EventStore::append_all`]. How each aggregate is
/// appended depends on its catalogue reservation:
///
/// - held by this batch (see [`AggregateCatalogue::reserve`]): appended at
///   exactly the reserved version, and the reservation is committed with the
///   version the store reports;
/// - held by anyone else: the whole batch fails with [`Error::Conflict`]
///   before anything is appended;
/// - none: appended unconditionally, and the new stream version is recorded
///   with [`AggregateCatalogue::observe`], so events dispatched straight onto
///   the bus keep the catalogue current too.
pub struct StoreEventLog<S> {
    store: Arc<S>,
    catalogue: Arc<AggregateCatalogue>,
}

impl<S: EventStore> StoreEventLog<S> {
    /// Creates a log writing to `store` and tracking versions in `catalogue`.
    pub fn new(store: Arc<S>, catalogue: Arc<AggregateCatalogue>) -> Self {
        Self { store, catalogue }
    }
}

#[async_trait]
impl<S: EventStore> EventLog for StoreEventLog<S> {
    #[instrument(skip(self, batch), fields(batch.id = %batch.id(), count = batch.len()))]
    async fn write(&self, batch: &EventBatch) -> Result<()> {
        let mut positions: HashMap<&AggregateId, usize> = HashMap::new();
        let mut appends: Vec<StreamAppend> = Vec::new();
        let mut owned: Vec<bool> = Vec::new();
        for event in batch.events() {
            let id = event.aggregate_id();
            let position = if let Some(&position) = positions.get(id) {
                position
            } else {
                let (expected, is_owned) = match self.catalogue.reservation(id) {
                    Some((version, owner)) if owner == batch.id() => {
                        (ExpectedVersion::Exact(version), true)
                    }
                    Some((version, _)) => {
                        debug!(aggregate.id = %id, "aggregate reserved by another writer");
                        return Err(Error::Conflict {
                            aggregate_id: id.clone(),
                            expected: version,
                            actual: version + 1,
                        });
                    }
                    None => (ExpectedVersion::Any, false),
                };
                appends.push(StreamAppend {
                    aggregate_id: id.clone(),
                    expected,
                    events: Vec::new(),
                });
                owned.push(is_owned);
                positions.insert(id, appends.len() - 1);
                appends.len() - 1
            };
            appends[position].events.push(event.clone());
        }

        let ids: Vec<AggregateId> = appends.iter().map(|a| a.aggregate_id.clone()).collect();
        let versions = self.store.append_all(appends).await?;

        for ((aggregate_id, owned), version) in ids.iter().zip(owned).zip(versions) {
            if owned {
                self.catalogue.commit_owned(aggregate_id, batch.id(), version)?;
            } else {
                self.catalogue.observe(aggregate_id, version);
            }
            trace!(aggregate.id = %aggregate_id, version, "stream appended");
        }
        Ok(())
    }
}

/// A filter that records log writes without altering them.
pub struct LoggingEventLog<L> {
    inner: L,
}

impl<L: EventLog> LoggingEventLog<L> {
    /// Wraps `inner`.
    pub fn new(inner: L) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<L: EventLog> EventLog for LoggingEventLog<L> {
    async fn write(&self, batch: &EventBatch) -> Result<()> {
        debug!(batch.id = %batch.id(), count = batch.len(), "writing events to log");
        for event in batch.events() {
            trace!(%event, "logging event");
        }
        match self.inner.write(batch).await {
            Ok(()) => {
                debug!(batch.id = %batch.id(), "events written to log");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "log write failed");
                Err(e)
            }
        }
    }
}
