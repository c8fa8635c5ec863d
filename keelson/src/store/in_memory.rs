//! An in-memory event store, useful for testing and development.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;
use tracing::instrument;

use super::{EventStore, ExpectedVersion, StreamAppend};
use crate::{AggregateId, Error, Event, Result};

/// Thread-safe map of streams keyed by aggregate id.
type StreamMap = HashMap<AggregateId, Vec<Event>>;

/// An in-memory, thread-safe event store.
///
/// A stream's version is the number of events in it. Multi-stream appends
/// through [`EventStore::append_all`] are atomic: every expected version is
/// checked under one write lock before anything is written.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    streams: Arc<RwLock<StreamMap>>,
}

impl InMemoryEventStore {
    /// Returns every stored event for an aggregate.
    pub fn events(&self, aggregate_id: &AggregateId) -> Vec<Event> {
        self.streams
            .read()
            .get(aggregate_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the stream's current version.
    pub fn version(&self, aggregate_id: &AggregateId) -> i64 {
        self.streams
            .read()
            .get(aggregate_id)
            .map_or(0, |s| s.len() as i64)
    }
}

fn check(streams: &StreamMap, aggregate_id: &AggregateId, expected: ExpectedVersion) -> Result<()> {
    let current = streams.get(aggregate_id).map_or(0, |s| s.len() as i64);
    match expected {
        ExpectedVersion::Exact(version) if version != current => Err(Error::StoreConflict {
            aggregate_id: aggregate_id.clone(),
            expected: version,
            actual: current,
        }),
        _ => Ok(()),
    }
}

fn write(streams: &mut StreamMap, aggregate_id: &AggregateId, events: Vec<Event>) -> i64 {
    let stream = streams.entry(aggregate_id.clone()).or_default();
    stream.extend(events);
    stream.len() as i64
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    #[instrument(skip(self, events), fields(aggregate.id = %aggregate_id, count = events.len()))]
    async fn append(
        &self,
        aggregate_id: &AggregateId,
        expected: ExpectedVersion,
        events: Vec<Event>,
    ) -> Result<i64> {
        let mut streams = self.streams.write();
        check(&streams, aggregate_id, expected)?;
        Ok(write(&mut streams, aggregate_id, events))
    }

    #[instrument(skip(self, appends), fields(streams = appends.len()))]
    async fn append_all(&self, appends: Vec<StreamAppend>) -> Result<Vec<i64>> {
        let mut streams = self.streams.write();
        for append in &appends {
            check(&streams, &append.aggregate_id, append.expected)?;
        }
        Ok(appends
            .into_iter()
            .map(|a| write(&mut streams, &a.aggregate_id, a.events))
            .collect())
    }

    fn load_stream(&self, aggregate_id: &AggregateId) -> BoxStream<'static, Result<Event>> {
        let events = self.events(aggregate_id);
        stream::iter(events.into_iter().map(Ok)).boxed()
    }
}
