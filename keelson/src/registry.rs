//! Static registration of command processors and event payload schemas.
use std::{collections::HashMap, sync::Arc};

use serde_json::Value as Json;

use crate::{
    CommandType, Error, EventType, Result, Tuple, TupleSchema, dispatch::CommandProcessor,
};

/// Maps command types to their processors and event types to their payload
/// schemas.
///
/// Populated once at startup and shared read-only afterwards. Lookups are
/// exact on `(aggregate type, name, version)`; there is no fallback to
/// another version.
#[derive(Default)]
pub struct TypeRegistry {
    commands: HashMap<CommandType, Arc<dyn CommandProcessor>>,
    events: HashMap<EventType, TupleSchema>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the processor for a command type, replacing any previous
    /// one.
    pub fn register_command<P>(&mut self, command_type: CommandType, processor: P) -> &mut Self
    where
        P: CommandProcessor + 'static,
    {
        self.commands.insert(command_type, Arc::new(processor));
        self
    }

    /// Registers the payload schema for an event type, replacing any
    /// previous one.
    pub fn register_event(&mut self, event_type: EventType, schema: TupleSchema) -> &mut Self {
        self.events.insert(event_type, schema);
        self
    }

    /// Returns the processor for a command type.
    pub fn resolve_command_handler(
        &self,
        command_type: &CommandType,
    ) -> Result<Arc<dyn CommandProcessor>> {
        self.commands
            .get(command_type)
            .cloned()
            .ok_or_else(|| Error::UnregisteredType(format!("command {command_type}")))
    }

    /// Returns the payload schema for an event type.
    pub fn resolve_event_schema(&self, event_type: &EventType) -> Result<TupleSchema> {
        self.events
            .get(event_type)
            .cloned()
            .ok_or_else(|| Error::UnregisteredType(format!("event {event_type}")))
    }

    /// Decodes a JSON payload for an event type into a tuple of its
    /// registered schema.
    pub fn decode_payload(&self, event_type: &EventType, payload: &Json) -> Result<Tuple> {
        self.resolve_event_schema(event_type)?.decode_json(payload)
    }
}
