//! JSON encoding of tuples, bound to their schema.
//!
//! A tuple encodes as a JSON object keyed by field name. Decoding needs the
//! schema to restore the declared types: timestamps travel as RFC 3339
//! strings, UUIDs as strings, bytes as lowercase hex, nested tuples as
//! objects.
use chrono::{DateTime, Utc};
use serde_json::{Map, Number, Value as Json};
use uuid::Uuid;

use super::{FieldType, Tuple, TupleSchema, Value};
use crate::{Error, Result};

impl Tuple {
    /// Encodes this tuple as a JSON object.
    pub fn to_json(&self) -> Json {
        let mut object = Map::with_capacity(self.values().len());
        for (name, value) in self.iter() {
            object.insert(name.to_owned(), encode(value));
        }
        Json::Object(object)
    }
}

impl TupleSchema {
    /// Decodes a JSON object into a tuple of this schema.
    ///
    /// Missing keys decode as null, which only optional fields accept. Keys
    /// the schema does not declare are ignored.
    pub fn decode_json(&self, json: &Json) -> Result<Tuple> {
        let object = json.as_object().ok_or_else(|| Error::Type {
            field: "<tuple>".into(),
            expected: "object".into(),
            actual: json_kind(json).into(),
        })?;

        let mut values = Vec::with_capacity(self.arity());
        for field in self.fields() {
            let raw = object.get(field.name()).unwrap_or(&Json::Null);
            values.push(decode(field.name(), field.field_type(), raw)?);
        }
        self.make(values)
    }
}

fn encode(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::Number((*i).into()),
        Value::Float(x) => Number::from_f64(*x).map_or(Json::Null, Json::Number),
        Value::Text(s) => Json::String(s.clone()),
        Value::Uuid(u) => Json::String(u.to_string()),
        Value::Timestamp(t) => Json::String(t.to_rfc3339()),
        Value::Bytes(b) => Json::String(hex::encode(b)),
        Value::List(items) => Json::Array(items.iter().map(encode).collect()),
        Value::Tuple(t) => t.to_json(),
    }
}

fn decode(field: &str, field_type: &FieldType, json: &Json) -> Result<Value> {
    let mismatch = || Error::Type {
        field: field.to_owned(),
        expected: field_type.to_string(),
        actual: json_kind(json).to_owned(),
    };

    let value = match (field_type, json) {
        (FieldType::Optional(_), Json::Null) => Value::Null,
        (FieldType::Optional(inner), _) => decode(field, inner, json)?,
        (FieldType::Bool, Json::Bool(b)) => Value::Bool(*b),
        (FieldType::Int, Json::Number(n)) => Value::Int(n.as_i64().ok_or_else(mismatch)?),
        (FieldType::Float, Json::Number(n)) => Value::Float(n.as_f64().ok_or_else(mismatch)?),
        (FieldType::Text, Json::String(s)) => Value::Text(s.clone()),
        (FieldType::Uuid, Json::String(s)) => {
            Value::Uuid(Uuid::parse_str(s).map_err(|_| mismatch())?)
        }
        (FieldType::Timestamp, Json::String(s)) => Value::Timestamp(
            DateTime::parse_from_rfc3339(s)
                .map_err(|_| mismatch())?
                .with_timezone(&Utc),
        ),
        (FieldType::Bytes, Json::String(s)) => {
            Value::Bytes(hex::decode(s).map_err(|_| mismatch())?)
        }
        (FieldType::List(inner), Json::Array(items)) => Value::List(
            items
                .iter()
                .map(|item| decode(field, inner, item))
                .collect::<Result<_>>()?,
        ),
        (FieldType::Tuple(schema), Json::Object(_)) => Value::Tuple(schema.decode_json(json)?),
        _ => return Err(mismatch()),
    };
    Ok(value)
}

fn json_kind(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn order_schema() -> TupleSchema {
        let line = TupleSchema::new([("sku", FieldType::Text), ("qty", FieldType::Int)])
            .expect("line schema");
        TupleSchema::new([
            ("order_id", FieldType::Uuid),
            ("placed_at", FieldType::Timestamp),
            ("lines", FieldType::list_of(FieldType::Tuple(line))),
            ("note", FieldType::optional(FieldType::Text)),
            ("signature", FieldType::Bytes),
        ])
        .expect("order schema")
    }

    #[test]
    fn decodes_typed_fields_from_json() {
        let id = Uuid::new_v4();
        let tuple = order_schema()
            .decode_json(&json!({
                "order_id": id.to_string(),
                "placed_at": "2024-05-06T07:08:09Z",
                "lines": [{ "sku": "A-1", "qty": 2 }],
                "signature": "cafe",
                "unrelated": true,
            }))
            .expect("decodes");

        assert_eq!(tuple.get("order_id").and_then(Value::as_uuid), Some(id));
        assert_eq!(
            tuple.get("placed_at").and_then(Value::as_timestamp),
            Some(Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap())
        );
        assert_eq!(tuple.get("note"), Some(&Value::Null));
        assert_eq!(
            tuple.get("signature").and_then(Value::as_bytes),
            Some(&[0xca, 0xfe][..])
        );
        let lines = tuple.get("lines").and_then(Value::as_list).expect("lines");
        assert_eq!(
            lines[0].as_tuple().and_then(|l| l.get("qty")),
            Some(&Value::Int(2))
        );
    }

    #[test]
    fn encoding_then_decoding_preserves_the_tuple() {
        let json = json!({
            "order_id": Uuid::nil().to_string(),
            "placed_at": "2024-05-06T07:08:09+00:00",
            "lines": [],
            "note": "leave at door",
            "signature": "00ff",
        });
        let tuple = order_schema().decode_json(&json).expect("decodes");
        assert_eq!(tuple.to_json(), json);
    }

    #[test]
    fn mismatched_json_is_a_type_error() {
        let err = order_schema()
            .decode_json(&json!({ "order_id": 7 }))
            .expect_err("mismatch");
        assert!(matches!(err, Error::Type { ref field, .. } if field == "order_id"));

        let err = TupleSchema::empty()
            .decode_json(&json!([1, 2]))
            .expect_err("not an object");
        assert!(matches!(err, Error::Type { .. }));
    }
}
