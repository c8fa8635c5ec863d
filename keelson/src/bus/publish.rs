//! The publishing stage of the pipeline.
use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{Event, Result};

/// Hands events to an interested party once they are durable.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes one event.
    async fn publish(&self, event: &Event) -> Result<()>;
}

#[async_trait]
impl<P> EventPublisher for Arc<P>
where
    P: EventPublisher + ?Sized,
{
    async fn publish(&self, event: &Event) -> Result<()> {
        (**self).publish(event).await
    }
}

/// A filter that records publishes without altering them.
pub struct LoggingEventPublisher<P> {
    inner: P,
}

impl<P: EventPublisher> LoggingEventPublisher<P> {
    /// Wraps `inner`.
    pub fn new(inner: P) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<P: EventPublisher> EventPublisher for LoggingEventPublisher<P> {
    async fn publish(&self, event: &Event) -> Result<()> {
        debug!(%event, "publishing event");
        let result = self.inner.publish(event).await;
        match &result {
            Ok(()) => debug!(aggregate.id = %event.aggregate_id(), name = %event.name(), "event published"),
            Err(e) => warn!(error = %e, aggregate.id = %event.aggregate_id(), "publish failed"),
        }
        result
    }
}

/// A filter that retries a failing publisher a fixed number of times.
///
/// Needs a Tokio runtime when `delay` is non-zero.
pub struct RetryingPublisher<P> {
    inner: P,
    attempts: u32,
    delay: Duration,
}

impl<P: EventPublisher> RetryingPublisher<P> {
    /// Wraps `inner`, trying each publish up to `attempts` times (at least
    /// once) with `delay` between tries.
    pub fn new(inner: P, attempts: u32, delay: Duration) -> Self {
        Self {
            inner,
            attempts: attempts.max(1),
            delay,
        }
    }
}

#[async_trait]
impl<P: EventPublisher> EventPublisher for RetryingPublisher<P> {
    async fn publish(&self, event: &Event) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self.inner.publish(event).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= self.attempts => return Err(e),
                Err(e) => {
                    debug!(error = %e, attempt, "retrying publish");
                    attempt += 1;
                    if !self.delay.is_zero() {
                        tokio::time::sleep(self.delay).await;
                    }
                }
            }
        }
    }
}
