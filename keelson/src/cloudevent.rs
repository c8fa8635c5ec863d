//! CloudEvent conversion utilities.
//!
//! [`CloudEvent`] wraps a [`cloudevents::Event`] built from a kernel
//! [`Event`]:
//!
//! | CloudEvent attribute | source |
//! |---|---|
//! | `id` | fresh UUID |
//! | `type` | `name/version` |
//! | `source` | `urn:keelson:<aggregate type>` |
//! | `subject` | aggregate instance id |
//! | `time` | event timestamp |
//! | `stream` (extension) | timestamp's stream id |
//! | data | payload tuple as JSON |
//!
//! Decoding needs a [`TypeRegistry`] to recover the payload schema.
//!
//! # Example
//!
//! ```rust
//! use keelson::{CloudEvent, EventType, StreamTimestamp, Tuple, VersionedName};
//!
//! let event = EventType::new("widget", VersionedName::new("created", "0"))
//!     .make_event(uuid::Uuid::new_v4(), StreamTimestamp::now("api"), Tuple::empty())
//!     .unwrap();
//! let ce = CloudEvent::encode(&event).unwrap();
//! assert_eq!(cloudevents::AttributesReader::ty(&ce.0), "created/0");
//! ```

use cloudevents::{
    AttributesReader, Data, Event as CeEvent, EventBuilder, EventBuilderV10,
    event::ExtensionValue,
};
use tracing::instrument;
use url::Url;
use uuid::Uuid;

use crate::{AggregateId, Error, Event, EventType, Result, StreamTimestamp, TypeRegistry, VersionedName};

const SOURCE_PREFIX: &str = "urn:keelson:";
const STREAM_EXTENSION: &str = "stream";

/// Newtype wrapper around `cloudevents::Event`.
#[derive(Debug, Clone)]
pub struct CloudEvent(pub CeEvent);

impl CloudEvent {
    /// Returns the inner [`cloudevents::Event`].
    #[must_use]
    pub fn into_inner(self) -> CeEvent {
        self.0
    }

    /// Encodes a kernel event.
    #[instrument(skip(event), fields(aggregate.id = %event.aggregate_id()))]
    pub fn encode(event: &Event) -> Result<Self> {
        let source = Url::parse(&format!(
            "{SOURCE_PREFIX}{}",
            event.aggregate_id().aggregate_type()
        ))
        .map_err(|e| Error::Binding(format!("invalid CloudEvent source: {e}")))?;

        let ce = EventBuilderV10::new()
            .id(Uuid::new_v4().to_string())
            .ty(event.name().to_string())
            .source(source)
            .subject(event.aggregate_id().instance_id().to_string())
            .time(event.timestamp().timestamp())
            .extension(STREAM_EXTENSION, event.timestamp().stream_id())
            .data("application/json", event.payload().to_json())
            .build()
            .map_err(|e| Error::Binding(format!("failed to build CloudEvent: {e}")))?;

        Ok(Self(ce))
    }

    /// Decodes back into a kernel event, resolving the payload schema in
    /// `registry`.
    pub fn decode(&self, registry: &TypeRegistry) -> Result<Event> {
        let ce = &self.0;
        let malformed = |what: &str| Error::Binding(format!("CloudEvent {}: {what}", ce.id()));

        let aggregate_type = ce
            .source()
            .as_str()
            .strip_prefix(SOURCE_PREFIX)
            .ok_or_else(|| malformed("source is not a keelson aggregate"))?;
        let (name, version) = ce
            .ty()
            .rsplit_once('/')
            .ok_or_else(|| malformed("type is not name/version"))?;
        let instance_id = ce
            .subject()
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| malformed("subject is not an instance id"))?;
        let time = *ce.time().ok_or_else(|| malformed("missing time"))?;
        let stream = match ce.extension(STREAM_EXTENSION) {
            Some(ExtensionValue::String(s)) => s.clone(),
            _ => return Err(malformed("missing stream extension")),
        };
        let payload = match ce.data() {
            Some(Data::Json(json)) => json.clone(),
            Some(Data::Binary(bytes)) => serde_json::from_slice(bytes)
                .map_err(|e| Error::Binding(format!("CloudEvent data: {e}")))?,
            Some(Data::String(s)) => serde_json::from_str(s)
                .map_err(|e| Error::Binding(format!("CloudEvent data: {e}")))?,
            None => serde_json::Value::Object(serde_json::Map::new()),
        };

        let name = VersionedName::new(name, version);
        let event_type = EventType::new(aggregate_type, name.clone());
        let payload = registry.decode_payload(&event_type, &payload)?;

        Ok(Event::new(
            AggregateId::new(aggregate_type, instance_id)?,
            StreamTimestamp::new(stream, time),
            name,
            payload,
        ))
    }
}

impl TryFrom<&Event> for CloudEvent {
    type Error = Error;

    fn try_from(event: &Event) -> Result<Self> {
        Self::encode(event)
    }
}
