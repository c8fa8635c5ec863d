//! Events and their dispatch keys.
use std::fmt;

use uuid::Uuid;

use crate::{AggregateId, Result, StreamTimestamp, Tuple, VersionedName};

/// The type of an [`Event`]: the aggregate type it belongs to plus the
/// event's versioned name.
///
/// Used to look up the payload schema for decoding, and by upcasters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventType {
    aggregate_type: String,
    name: VersionedName,
}

impl EventType {
    /// Creates an event type.
    pub fn new(aggregate_type: impl Into<String>, name: VersionedName) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            name,
        }
    }

    /// Returns the type of the supplied event.
    pub fn of(event: &Event) -> Self {
        Self::new(event.aggregate_id().aggregate_type(), event.name().clone())
    }

    /// Returns the aggregate type events of this type belong to.
    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    /// Returns the event name.
    pub fn name(&self) -> &VersionedName {
        &self.name
    }

    /// Creates an event of this type for the given instance.
    pub fn make_event(
        &self,
        instance_id: Uuid,
        timestamp: StreamTimestamp,
        payload: Tuple,
    ) -> Result<Event> {
        Ok(Event {
            aggregate_id: AggregateId::new(self.aggregate_type.clone(), instance_id)?,
            timestamp,
            name: self.name.clone(),
            payload,
        })
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.aggregate_type, self.name)
    }
}

/// An immutable fact recorded against an aggregate's stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    aggregate_id: AggregateId,
    timestamp: StreamTimestamp,
    name: VersionedName,
    payload: Tuple,
}

impl Event {
    /// Creates an event.
    pub fn new(
        aggregate_id: AggregateId,
        timestamp: StreamTimestamp,
        name: VersionedName,
        payload: Tuple,
    ) -> Self {
        Self {
            aggregate_id,
            timestamp,
            name,
            payload,
        }
    }

    /// Returns the aggregate this event belongs to.
    pub fn aggregate_id(&self) -> &AggregateId {
        &self.aggregate_id
    }

    /// Returns when the event occurred.
    pub fn timestamp(&self) -> &StreamTimestamp {
        &self.timestamp
    }

    /// Returns the event name.
    pub fn name(&self) -> &VersionedName {
        &self.name
    }

    /// Returns the payload.
    pub fn payload(&self) -> &Tuple {
        &self.payload
    }

    /// Returns this event renamed with a new payload, keeping identity and
    /// timestamp. Used when upcasting.
    #[must_use]
    pub fn with_payload(self, name: VersionedName, payload: Tuple) -> Self {
        Self {
            name,
            payload,
            ..self
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.aggregate_id, self.name, self.timestamp, self.payload
        )
    }
}
