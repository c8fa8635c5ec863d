//! The durable event store interface and its implementations.
//!
//! The store is the source of truth for committed history. The kernel only
//! needs two things from it: an atomic, version-checked append per aggregate
//! stream, and a way to read a stream back in order.
use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::{AggregateId, Event, Result};

// The in-memory implementation is compiled when the `in-memory` feature is
// enabled (this is the default).
#[cfg(feature = "in-memory")]
/// An in-memory event store.
pub mod in_memory;

/// The version a stream must be at for an append to succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Append regardless of the stream's version.
    Any,
    /// Append only if the stream is exactly at this version.
    Exact(i64),
}

/// Events to append to one aggregate's stream.
#[derive(Debug, Clone)]
pub struct StreamAppend {
    /// The stream to append to.
    pub aggregate_id: AggregateId,
    /// The version the stream must be at.
    pub expected: ExpectedVersion,
    /// The events, in order.
    pub events: Vec<Event>,
}

/// The trait for durable event stores.
///
/// A stream's version is the number of events it holds: an unknown stream
/// is at version 0 and appending `n` events moves it from `v` to `v + n`.
/// [`ExpectedVersion::Exact`], the versions returned by the append methods
/// and the catalogue all count this way.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends events to one aggregate's stream and returns the stream's new
    /// version.
    ///
    /// This operation must be atomic. It fails with
    /// [`Error::StoreConflict`](crate::Error::StoreConflict) if `expected`
    /// does not match the stream, and with [`Error::Store`](crate::Error::Store)
    /// on I/O failure.
    async fn append(
        &self,
        aggregate_id: &AggregateId,
        expected: ExpectedVersion,
        events: Vec<Event>,
    ) -> Result<i64>;

    /// Appends to several streams, returning each stream's new version in
    /// input order.
    ///
    /// The default implementation appends one stream after another and is
    /// therefore only atomic per stream. Stores that can do better should
    /// override it so that either every append lands or none does.
    async fn append_all(&self, appends: Vec<StreamAppend>) -> Result<Vec<i64>> {
        let mut versions = Vec::with_capacity(appends.len());
        for append in appends {
            versions.push(
                self.append(&append.aggregate_id, append.expected, append.events)
                    .await?,
            );
        }
        Ok(versions)
    }

    /// Lazily reads an aggregate's stream in order.
    ///
    /// The stream is finite; calling this again restarts from the beginning.
    fn load_stream(&self, aggregate_id: &AggregateId) -> BoxStream<'static, Result<Event>>;
}
