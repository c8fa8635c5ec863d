//! Commands and their dispatch keys.
use std::fmt;

use uuid::Uuid;

use crate::{AggregateId, Result, StreamTimestamp, Tuple, TupleSchema, VersionedName};

/// The type of a [`Command`]: the aggregate type it is addressed to plus the
/// command's versioned name.
///
/// Used to match commands to their
/// [`CommandProcessor`](crate::dispatch::CommandProcessor). Matching is exact
/// on `(aggregate type, name, version)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandType {
    aggregate_type: String,
    name: VersionedName,
}

impl CommandType {
    /// Creates a command type.
    pub fn new(aggregate_type: impl Into<String>, name: VersionedName) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            name,
        }
    }

    /// Returns the type of the supplied command.
    pub fn of(command: &Command) -> Self {
        Self::new(command.aggregate_id().aggregate_type(), command.name().clone())
    }

    /// Returns the aggregate type commands of this type are addressed to.
    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    /// Returns the command name.
    pub fn name(&self) -> &VersionedName {
        &self.name
    }

    /// Creates a command of this type addressed to the given instance.
    ///
    /// `result_schema` is the shape the processor's result must have. Fails
    /// with [`Error::Schema`](crate::Error::Schema) if this type's aggregate
    /// type is empty.
    pub fn make_command(
        &self,
        instance_id: Uuid,
        timestamp: StreamTimestamp,
        parameters: Tuple,
        result_schema: TupleSchema,
    ) -> Result<Command> {
        Ok(Command {
            aggregate_id: AggregateId::new(self.aggregate_type.clone(), instance_id)?,
            timestamp,
            name: self.name.clone(),
            parameters,
            result_schema,
        })
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.aggregate_type, self.name)
    }
}

/// A request to change an aggregate's state.
///
/// Created per incoming request and consumed once by dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    aggregate_id: AggregateId,
    timestamp: StreamTimestamp,
    name: VersionedName,
    parameters: Tuple,
    result_schema: TupleSchema,
}

impl Command {
    /// Creates a command addressed to an existing aggregate id.
    pub fn new(
        aggregate_id: AggregateId,
        timestamp: StreamTimestamp,
        name: VersionedName,
        parameters: Tuple,
        result_schema: TupleSchema,
    ) -> Self {
        Self {
            aggregate_id,
            timestamp,
            name,
            parameters,
            result_schema,
        }
    }

    /// Returns the target aggregate.
    pub fn aggregate_id(&self) -> &AggregateId {
        &self.aggregate_id
    }

    /// Returns when the command was issued.
    pub fn timestamp(&self) -> &StreamTimestamp {
        &self.timestamp
    }

    /// Returns the command name.
    pub fn name(&self) -> &VersionedName {
        &self.name
    }

    /// Returns the command parameters.
    pub fn parameters(&self) -> &Tuple {
        &self.parameters
    }

    /// Returns the shape processing this command must return.
    pub fn result_schema(&self) -> &TupleSchema {
        &self.result_schema
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.aggregate_id, self.name, self.timestamp, self.parameters
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_of_command_equals_declared_type() {
        let declared = CommandType::new("widget", VersionedName::new("create", "1"));
        let command = declared
            .make_command(
                Uuid::new_v4(),
                StreamTimestamp::now("test"),
                Tuple::empty(),
                TupleSchema::empty(),
            )
            .expect("command");

        assert_eq!(CommandType::of(&command), declared);
        assert_ne!(
            CommandType::of(&command),
            CommandType::new("widget", VersionedName::new("create", "2"))
        );
        assert_eq!(declared.to_string(), "widget/create/1");
    }
}
