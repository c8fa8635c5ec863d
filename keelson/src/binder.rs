//! Binding tuples to host types.
//!
//! Tuples are converted to and from any serde type through their JSON
//! encoding (see [`tuple::json`](crate::tuple::json)), so a struct binds to a
//! tuple when its serde field names match the schema's. Byte fields travel as
//! hex strings and need a matching serde adapter on the struct side.
//!
//! Names are never derived at runtime: a type states its [`VersionedName`] by
//! implementing [`Named`], usually through `#[derive(Named)]` from
//! `keelson-derive`, and an [`EventBinder`] is an explicit table of such
//! types built at startup.
use std::{collections::HashMap, fmt};

use serde::{Serialize, de::DeserializeOwned};

use crate::{CommandType, Error, Event, EventType, Result, Tuple, TupleSchema, VersionedName};

/// A type with a registered payload name.
pub trait Named {
    /// The name and version this type's payloads carry.
    fn versioned_name() -> VersionedName;

    /// The event type of this payload for an aggregate type.
    fn event_type(aggregate_type: &str) -> EventType {
        EventType::new(aggregate_type, Self::versioned_name())
    }

    /// The command type of this payload for an aggregate type.
    fn command_type(aggregate_type: &str) -> CommandType {
        CommandType::new(aggregate_type, Self::versioned_name())
    }
}

/// Binds a tuple into `T`.
pub fn bind<T: DeserializeOwned>(tuple: &Tuple) -> Result<T> {
    serde_json::from_value(tuple.to_json()).map_err(|e| Error::Binding(e.to_string()))
}

/// Builds a tuple of `schema` from `value`.
pub fn unbind<T: Serialize>(schema: &TupleSchema, value: &T) -> Result<Tuple> {
    let json = serde_json::to_value(value).map_err(|e| Error::Binding(e.to_string()))?;
    schema.decode_json(&json)
}

type Decoder<B> = Box<dyn Fn(&Tuple) -> Result<B> + Send + Sync>;

/// Converts events into values of a common type `B`, chosen by the event's
/// versioned name.
///
/// ```rust
/// use keelson::{EventBinder, Named, VersionedName};
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Created { name: String }
///
/// impl Named for Created {
///     fn versioned_name() -> VersionedName { VersionedName::new("created", "0") }
/// }
///
/// enum WidgetEvent { Created(Created) }
///
/// impl From<Created> for WidgetEvent {
///     fn from(c: Created) -> Self { Self::Created(c) }
/// }
///
/// let binder = EventBinder::<WidgetEvent>::new().register::<Created>();
/// # let _ = binder;
/// ```
pub struct EventBinder<B> {
    decoders: HashMap<VersionedName, Decoder<B>>,
}

impl<B> Default for EventBinder<B> {
    fn default() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }
}

impl<B: 'static> EventBinder<B> {
    /// Creates an empty binder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` under its versioned name.
    #[must_use]
    pub fn register<T>(mut self) -> Self
    where
        T: Named + DeserializeOwned + Into<B> + 'static,
    {
        self.decoders.insert(
            T::versioned_name(),
            Box::new(|tuple| bind::<T>(tuple).map(Into::into)),
        );
        self
    }

    /// Returns whether a type is registered for `name`.
    pub fn contains(&self, name: &VersionedName) -> bool {
        self.decoders.contains_key(name)
    }

    /// Converts an event's payload into `B`.
    ///
    /// Fails with [`Error::UnregisteredType`] if no type is registered for
    /// the event's name.
    pub fn bind_event(&self, event: &Event) -> Result<B> {
        let decode = self
            .decoders
            .get(event.name())
            .ok_or_else(|| Error::UnregisteredType(format!("no type bound for event {}", event.name())))?;
        decode(event.payload())
    }
}

impl<B> fmt::Debug for EventBinder<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.decoders.keys()).finish()
    }
}
