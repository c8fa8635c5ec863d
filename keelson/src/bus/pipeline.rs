//! The log-then-publish batch sink.
use std::{panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{instrument, warn};

use super::{BatchSink, EventBatch, EventLog, EventPublisher};
use crate::{Error, Result};

/// What [`LogAndPublish`] does when a publisher fails after the batch has
/// been written to the log.
///
/// The log write is never undone: the events are already true.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PublishFailurePolicy {
    /// Stop publishing and report [`Error::Publish`].
    #[default]
    Report,
    /// Log the failure and keep delivering to the remaining publishers.
    Continue,
}

/// Writes each batch to a log, then hands every event, in batch order, to
/// every publisher.
pub struct LogAndPublish {
    log: Arc<dyn EventLog>,
    publishers: Vec<Arc<dyn EventPublisher>>,
    policy: PublishFailurePolicy,
}

impl LogAndPublish {
    /// Creates a sink writing to `log`, with no publishers yet.
    pub fn new<L: EventLog + 'static>(log: L) -> Self {
        Self {
            log: Arc::new(log),
            publishers: Vec::new(),
            policy: PublishFailurePolicy::default(),
        }
    }

    /// Adds a publisher. Publishers receive each event in the order they were
    /// added.
    #[must_use]
    pub fn and_publish<P: EventPublisher + 'static>(mut self, publisher: P) -> Self {
        self.publishers.push(Arc::new(publisher));
        self
    }

    /// Sets what happens when a publisher fails.
    #[must_use]
    pub fn with_failure_policy(mut self, policy: PublishFailurePolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl BatchSink for LogAndPublish {
    #[instrument(skip(self, batch), fields(batch.id = %batch.id()))]
    async fn deliver(&self, batch: &EventBatch) -> Result<()> {
        // Nothing reaches a publisher unless the whole batch is durable.
        self.log.write(batch).await?;

        for event in batch.events() {
            for publisher in &self.publishers {
                // A panicking publisher must not unwind past a durable write.
                let outcome = AssertUnwindSafe(publisher.publish(event))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(Error::Publish("publisher panicked".into())));
                let Err(e) = outcome else {
                    continue;
                };
                let e = match e {
                    Error::Publish(message) => Error::Publish(message),
                    other => Error::Publish(other.to_string()),
                };
                match self.policy {
                    PublishFailurePolicy::Report => return Err(e),
                    PublishFailurePolicy::Continue => {
                        warn!(error = %e, aggregate.id = %event.aggregate_id(), "publish failed, continuing");
                    }
                }
            }
        }
        Ok(())
    }
}
