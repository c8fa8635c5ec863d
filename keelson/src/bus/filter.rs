//! Filter composition for the three sink capabilities.
//!
//! A filter is any `FnOnce(S) -> T` where `S` and `T` share a capability,
//! typically a wrapper's constructor such as [`LoggingEventLog::new`].
//!
//! [`LoggingEventLog::new`]: super::LoggingEventLog::new
use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::{BatchSink, EventBatch, EventLog, EventPublisher, LogAndPublish};
use crate::{Error, Result};

/// Filter combinators for [`EventLog`]s.
pub trait EventLogExt: EventLog + Sized + 'static {
    /// Wraps this log in `filter`.
    fn filter<L, F>(self, filter: F) -> L
    where
        L: EventLog,
        F: FnOnce(Self) -> L,
    {
        filter(self)
    }

    /// Turns this log into a [`LogAndPublish`] sink with one publisher.
    fn and_publish<P: EventPublisher + 'static>(self, publisher: P) -> LogAndPublish {
        LogAndPublish::new(self).and_publish(publisher)
    }
}

impl<T: EventLog + 'static> EventLogExt for T {}

/// Filter combinators for [`EventPublisher`]s.
pub trait EventPublisherExt: EventPublisher + Sized {
    /// Wraps this publisher in `filter`.
    fn filter<P, F>(self, filter: F) -> P
    where
        P: EventPublisher,
        F: FnOnce(Self) -> P,
    {
        filter(self)
    }
}

impl<T: EventPublisher> EventPublisherExt for T {}

/// Filter combinators for [`BatchSink`]s.
pub trait BatchSinkExt: BatchSink + Sized {
    /// Wraps this sink in `filter`.
    fn filter<S, F>(self, filter: F) -> S
    where
        S: BatchSink,
        F: FnOnce(Self) -> S,
    {
        filter(self)
    }
}

impl<T: BatchSink> BatchSinkExt for T {}

/// A filter that records batch delivery without altering it.
pub struct LoggingBatchSink<S> {
    inner: S,
}

impl<S: BatchSink> LoggingBatchSink<S> {
    /// Wraps `inner`.
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S: BatchSink> BatchSink for LoggingBatchSink<S> {
    async fn deliver(&self, batch: &EventBatch) -> Result<()> {
        debug!(batch.id = %batch.id(), batch.len = batch.len(), "delivering batch");
        let result = self.inner.deliver(batch).await;
        match &result {
            Ok(()) => debug!(batch.id = %batch.id(), "batch delivered"),
            Err(e) => warn!(batch.id = %batch.id(), error = %e, "batch delivery failed"),
        }
        result
    }
}

/// A filter bounding how many batches are in flight through the inner sink.
///
/// Callers beyond the limit wait for a permit, so pressure from a slow sink
/// reaches them instead of piling up.
pub struct ConcurrencyLimit<S> {
    inner: S,
    permits: Semaphore,
}

impl<S: BatchSink> ConcurrencyLimit<S> {
    /// Wraps `inner`, allowing at most `permits` concurrent deliveries (at
    /// least one).
    pub fn new(inner: S, permits: usize) -> Self {
        Self {
            inner,
            permits: Semaphore::new(permits.max(1)),
        }
    }
}

#[async_trait]
impl<S: BatchSink> BatchSink for ConcurrencyLimit<S> {
    async fn deliver(&self, batch: &EventBatch) -> Result<()> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| Error::Store(format!("delivery limiter closed: {e}")))?;
        self.inner.deliver(batch).await
    }
}
