//! Aggregate identity and stream timestamps.
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Identifies one aggregate instance: its type and its instance id.
///
/// This is the routing key for commands, events and the catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawAggregateId")]
pub struct AggregateId {
    aggregate_type: String,
    instance_id: Uuid,
}

/// The unchecked wire form of an [`AggregateId`].
#[derive(Deserialize)]
struct RawAggregateId {
    aggregate_type: String,
    instance_id: Uuid,
}

impl TryFrom<RawAggregateId> for AggregateId {
    type Error = Error;

    fn try_from(raw: RawAggregateId) -> Result<Self> {
        Self::new(raw.aggregate_type, raw.instance_id)
    }
}

impl AggregateId {
    /// Creates an aggregate id. The aggregate type must not be empty.
    pub fn new(aggregate_type: impl Into<String>, instance_id: Uuid) -> Result<Self> {
        let aggregate_type = aggregate_type.into();
        if aggregate_type.is_empty() {
            return Err(Error::Schema("aggregate type must not be empty".into()));
        }
        Ok(Self {
            aggregate_type,
            instance_id,
        })
    }

    /// Creates an id for a fresh instance of the given aggregate type.
    pub fn random(aggregate_type: impl Into<String>) -> Result<Self> {
        Self::new(aggregate_type, Uuid::new_v4())
    }

    /// Returns the aggregate type.
    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    /// Returns the instance id.
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }
}

impl fmt::Display for AggregateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.aggregate_type, self.instance_id)
    }
}

/// The point in a named stream at which a command was issued or an event
/// occurred.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamTimestamp {
    stream_id: String,
    timestamp: DateTime<Utc>,
}

impl StreamTimestamp {
    /// Creates a stream timestamp.
    pub fn new(stream_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            stream_id: stream_id.into(),
            timestamp,
        }
    }

    /// Creates a stream timestamp for the current instant.
    pub fn now(stream_id: impl Into<String>) -> Self {
        Self::new(stream_id, Utc::now())
    }

    /// Returns the stream id.
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Returns the instant.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl fmt::Display for StreamTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.stream_id, self.timestamp.to_rfc3339())
    }
}
