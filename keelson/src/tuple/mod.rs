//! Schema-driven structured values.
//!
//! A [`Tuple`] is the serialization-independent container for command
//! parameters, command results and event payloads. Every tuple is an
//! instance of a [`TupleSchema`], which fixes the order, names and types of
//! its fields. Tuples can only be produced through [`TupleSchema::make`] (or
//! [`TupleSchema::make_named`]), so a tuple that exists always matches its
//! schema.
//!
//! Encoders are layered on top; [`json`] provides the one this crate uses
//! for struct binding and CloudEvents.
use std::fmt;

pub mod json;
mod schema;
mod value;

pub use schema::{Field, TupleSchema};
pub use value::{FieldType, Value};

/// An immutable instance of a [`TupleSchema`].
///
/// Equality is structural: two tuples are equal when their schemas are
/// equal and they hold equal values.
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    schema: TupleSchema,
    values: Vec<Value>,
}

impl Tuple {
    pub(crate) fn from_parts(schema: TupleSchema, values: Vec<Value>) -> Self {
        Self { schema, values }
    }

    /// Returns the empty tuple of [`TupleSchema::empty`].
    pub fn empty() -> Self {
        Self::from_parts(TupleSchema::empty(), Vec::new())
    }

    /// Returns the schema this tuple was built from.
    pub fn schema(&self) -> &TupleSchema {
        &self.schema
    }

    /// Returns the named field's value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.schema.index_of(name).map(|i| &self.values[i])
    }

    /// Returns the value at `position`.
    pub fn get_at(&self, position: usize) -> Option<&Value> {
        self.values.get(position)
    }

    /// Returns the values in field order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Iterates over `(field name, value)` pairs in field order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.schema
            .fields()
            .iter()
            .map(|f| f.name())
            .zip(self.values.iter())
    }
}

/// The canonical form, e.g. `{name="widget", count=3}`.
impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        f.write_str("}")
    }
}
