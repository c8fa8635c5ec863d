//! Defines the upcasting mechanism for handling payload versioning.
//!
//! Type matching is exact, so a processor registered against `created/2`
//! never sees a `created/1` event. Upcasters close that gap: when a stream is
//! loaded, every event is rewritten step by step until no upcaster matches
//! its `(aggregate type, name, version)` any more.
use tracing::trace;

use crate::{Error, Event, EventType, Result, Tuple};

/// Transforms the payload of one event type into its next version.
pub trait Upcaster: Send + Sync {
    /// The event type, at its old version, this upcaster applies to.
    fn source(&self) -> &EventType;

    /// The version this upcaster produces.
    fn target_version(&self) -> &str;

    /// Transforms an old payload into the new version's payload.
    fn upcast(&self, payload: &Tuple) -> Result<Tuple>;
}

/// An [`Upcaster`] built from a function.
pub struct UpcastFn<F> {
    source: EventType,
    target_version: String,
    transform: F,
}

impl<F> UpcastFn<F>
where
    F: Fn(&Tuple) -> Result<Tuple> + Send + Sync,
{
    /// Creates an upcaster from `source` to `target_version` applying
    /// `transform`.
    pub fn new(source: EventType, target_version: impl Into<String>, transform: F) -> Self {
        Self {
            source,
            target_version: target_version.into(),
            transform,
        }
    }
}

impl<F> Upcaster for UpcastFn<F>
where
    F: Fn(&Tuple) -> Result<Tuple> + Send + Sync,
{
    fn source(&self) -> &EventType {
        &self.source
    }

    fn target_version(&self) -> &str {
        &self.target_version
    }

    fn upcast(&self, payload: &Tuple) -> Result<Tuple> {
        (self.transform)(payload)
    }
}

/// A chain of upcasters that can be applied sequentially to an event.
#[derive(Default)]
pub struct UpcasterChain {
    upcasters: Vec<Box<dyn Upcaster>>,
}

impl UpcasterChain {
    /// Creates a new, empty upcaster chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an upcaster to the chain.
    #[must_use]
    pub fn with<U: Upcaster + 'static>(mut self, upcaster: U) -> Self {
        self.upcasters.push(Box::new(upcaster));
        self
    }

    /// Applies upcasters until none matches the event's type.
    ///
    /// Each upcaster applies at most once per event, which stops a
    /// misconfigured cycle; hitting that bound is a [`Error::Schema`].
    pub fn upcast(&self, mut event: Event) -> Result<Event> {
        for _ in 0..=self.upcasters.len() {
            let event_type = EventType::of(&event);
            let Some(upcaster) = self.upcasters.iter().find(|u| *u.source() == event_type) else {
                return Ok(event);
            };
            let payload = upcaster.upcast(event.payload())?;
            let name = event.name().with_version(upcaster.target_version());
            trace!(from = %event_type, to = %name, "upcast event");
            event = event.with_payload(name, payload);
        }
        Err(Error::Schema(format!(
            "upcasters for {} form a cycle",
            EventType::of(&event)
        )))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{FieldType, StreamTimestamp, TupleSchema, Value, VersionedName};

    fn created(version: &str) -> EventType {
        EventType::new("widget", VersionedName::new("created", version))
    }

    fn v0_event() -> Event {
        let schema = TupleSchema::new([("name", FieldType::Text)]).expect("v0");
        created("0")
            .make_event(
                uuid::Uuid::new_v4(),
                StreamTimestamp::now("test"),
                schema.make([Value::from("sprocket")]).expect("payload"),
            )
            .expect("event")
    }

    fn add_colour() -> impl Upcaster {
        UpcastFn::new(created("0"), "1", |payload: &Tuple| {
            let schema = TupleSchema::new([("name", FieldType::Text), ("colour", FieldType::Text)])?;
            let name = payload.get("name").cloned().unwrap_or(Value::Null);
            schema.make([name, Value::from("grey")])
        })
    }

    fn rename_colour() -> impl Upcaster {
        UpcastFn::new(created("1"), "2", |payload: &Tuple| {
            let schema = TupleSchema::new([("name", FieldType::Text), ("color", FieldType::Text)])?;
            schema.make(payload.values().to_vec())
        })
    }

    #[test]
    fn applies_upcasters_in_sequence() {
        let chain = UpcasterChain::new().with(rename_colour()).with(add_colour());
        let event = chain.upcast(v0_event()).expect("upcast");

        assert_eq!(event.name(), &VersionedName::new("created", "2"));
        assert_eq!(event.payload().get("color"), Some(&Value::from("grey")));
        assert_eq!(event.payload().get("name"), Some(&Value::from("sprocket")));
    }

    #[test]
    fn events_without_upcasters_pass_through() {
        let event = v0_event();
        assert_eq!(UpcasterChain::new().upcast(event.clone()).expect("noop"), event);
    }

    #[test]
    fn cycles_are_reported() {
        let back = UpcastFn::new(created("1"), "0", |p: &Tuple| Ok(p.clone()));
        let forth = UpcastFn::new(created("0"), "1", |p: &Tuple| Ok(p.clone()));
        let chain = UpcasterChain::new().with(back).with(forth);
        assert!(matches!(chain.upcast(v0_event()), Err(Error::Schema(_))));
    }
}
