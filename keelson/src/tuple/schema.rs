//! Tuple schemas: ordered, named, typed field lists.
use std::{collections::HashMap, fmt, sync::Arc};

use super::{FieldType, Tuple, Value};
use crate::{Error, Result};

/// One named, typed field of a [`TupleSchema`].
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    name: String,
    field_type: FieldType,
}

impl Field {
    /// Returns the field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the declared type.
    pub fn field_type(&self) -> &FieldType {
        &self.field_type
    }
}

#[derive(Debug)]
struct SchemaInner {
    fields: Vec<Field>,
    index: HashMap<String, usize>,
}

/// The declared shape of a [`Tuple`].
///
/// Schemas are immutable and cheap to clone; one instance is typically
/// registered per payload shape and shared by every tuple built from it.
/// Equality is structural over the ordered field list.
#[derive(Clone)]
pub struct TupleSchema {
    inner: Arc<SchemaInner>,
}

impl TupleSchema {
    /// Builds a schema from ordered `(name, type)` pairs.
    ///
    /// Fails with [`Error::Schema`] if a field name repeats or is empty.
    pub fn new<N, I>(fields: I) -> Result<Self>
    where
        N: Into<String>,
        I: IntoIterator<Item = (N, FieldType)>,
    {
        let mut index = HashMap::new();
        let mut declared = Vec::new();
        for (position, (name, field_type)) in fields.into_iter().enumerate() {
            let name = name.into();
            if name.is_empty() {
                return Err(Error::Schema(format!(
                    "field at position {position} has an empty name"
                )));
            }
            if index.insert(name.clone(), position).is_some() {
                return Err(Error::Schema(format!("duplicate field name `{name}`")));
            }
            declared.push(Field { name, field_type });
        }
        Ok(Self {
            inner: Arc::new(SchemaInner {
                fields: declared,
                index,
            }),
        })
    }

    /// The zero-field schema, used by payload-less commands and events.
    pub fn empty() -> Self {
        Self {
            inner: Arc::new(SchemaInner {
                fields: Vec::new(),
                index: HashMap::new(),
            }),
        }
    }

    /// Returns the fields in declaration order.
    pub fn fields(&self) -> &[Field] {
        &self.inner.fields
    }

    /// Returns the number of fields.
    pub fn arity(&self) -> usize {
        self.inner.fields.len()
    }

    /// Returns whether the schema has no fields.
    pub fn is_empty(&self) -> bool {
        self.inner.fields.is_empty()
    }

    /// Returns the position of the named field.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.inner.index.get(name).copied()
    }

    /// Returns the named field.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.index_of(name).map(|i| &self.inner.fields[i])
    }

    /// Builds a tuple from values given in field order.
    ///
    /// Fails with [`Error::Arity`] if the count is wrong and with
    /// [`Error::Type`] if a value does not satisfy its field's type.
    pub fn make<I>(&self, values: I) -> Result<Tuple>
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        if values.len() != self.arity() {
            return Err(Error::Arity {
                expected: self.arity(),
                actual: values.len(),
            });
        }
        for (field, value) in self.inner.fields.iter().zip(&values) {
            if !field.field_type.accepts(value) {
                return Err(Error::Type {
                    field: field.name.clone(),
                    expected: field.field_type.to_string(),
                    actual: value.kind().to_owned(),
                });
            }
        }
        Ok(Tuple::from_parts(self.clone(), values))
    }

    /// Builds a tuple from `(field, value)` pairs given in any order.
    ///
    /// Unknown or repeated field names fail with [`Error::Schema`]; missing
    /// fields fail with [`Error::Arity`]. Optional fields may be omitted and become
    /// [`Value::Null`].
    pub fn make_named<N, V, I>(&self, pairs: I) -> Result<Tuple>
    where
        N: AsRef<str>,
        V: Into<Value>,
        I: IntoIterator<Item = (N, V)>,
    {
        let mut slots: Vec<Option<Value>> = vec![None; self.arity()];
        for (name, value) in pairs {
            let name = name.as_ref();
            let position = self
                .index_of(name)
                .ok_or_else(|| Error::Schema(format!("schema has no field `{name}`")))?;
            if slots[position].replace(value.into()).is_some() {
                return Err(Error::Schema(format!("field `{name}` given more than once")));
            }
        }

        let provided = slots.iter().filter(|s| s.is_some()).count();
        let mut values = Vec::with_capacity(slots.len());
        for (field, slot) in self.inner.fields.iter().zip(slots) {
            match (slot, &field.field_type) {
                (Some(v), _) => values.push(v),
                (None, FieldType::Optional(_)) => values.push(Value::Null),
                (None, _) => {
                    return Err(Error::Arity {
                        expected: self.arity(),
                        actual: provided,
                    });
                }
            }
        }
        self.make(values)
    }
}

impl PartialEq for TupleSchema {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) || self.inner.fields == other.inner.fields
    }
}

impl fmt::Debug for TupleSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.inner.fields.iter()).finish()
    }
}

impl fmt::Display for TupleSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, field) in self.inner.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", field.name, field.field_type)?;
        }
        f.write_str(")")
    }
}
