//! Row-to-event transformation
//!
//! A row becomes a JSON object keyed by column name, plus the reserved
//! `_CHANGE_TYPE` key. Keys, the marker included, are emitted in byte order;
//! duplicate column names keep the last value, and a column named
//! `_CHANGE_TYPE` is replaced by the marker.

use crate::error::{PipelineError, Result};
use crate::request::ChangeType;
use crate::schema::{Row, Schema, Value};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// Reserved key carrying the change-type marker
pub const CHANGE_TYPE_KEY: &str = "_CHANGE_TYPE";

/// A CDC event borrowing its values from the row it was built from
#[derive(Debug, Clone, PartialEq)]
pub struct CdcEvent<'a> {
    columns: BTreeMap<&'a str, &'a Value>,
    change_type: ChangeType,
}

impl<'a> CdcEvent<'a> {
    /// Pair each schema column with the row value at the same position.
    pub fn from_row(row: &'a Row, schema: &'a Schema, change_type: ChangeType) -> Result<Self> {
        if row.len() != schema.len() {
            return Err(PipelineError::serialization(
                "event.build",
                format!(
                    "row has {} values but schema has {} columns",
                    row.len(),
                    schema.len()
                ),
            ));
        }

        let mut columns = BTreeMap::new();
        for (column, value) in schema.columns().iter().zip(row) {
            if column.name == CHANGE_TYPE_KEY {
                continue;
            }
            columns.insert(column.name.as_str(), value);
        }

        Ok(Self {
            columns,
            change_type,
        })
    }

    pub fn change_type(&self) -> ChangeType {
        self.change_type
    }

    /// Value of a column, if present
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column).copied()
    }

    /// Number of keys in the encoded object, marker included
    pub fn field_count(&self) -> usize {
        self.columns.len() + 1
    }

    /// Encode the event as JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| PipelineError::serialization("event.encode", e))
    }
}

impl Serialize for CdcEvent<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.field_count()))?;
        for (name, value) in self.columns.range(..CHANGE_TYPE_KEY) {
            map.serialize_entry(name, value)?;
        }
        map.serialize_entry(CHANGE_TYPE_KEY, self.change_type.as_str())?;
        for (name, value) in self.columns.range(CHANGE_TYPE_KEY..) {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Transform one row into an encoded CDC event.
pub fn encode_event(row: &Row, schema: &Schema, change_type: ChangeType) -> Result<Vec<u8>> {
    CdcEvent::from_row(row, schema, change_type)?.to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn decode(bytes: &[u8]) -> serde_json::Value {
        serde_json::from_slice(bytes).unwrap()
    }

    #[test]
    fn test_encode_row() {
        let schema = Schema::from_names(["id", "name"]);
        let row = vec![Value::Int64(1), Value::from("Alice")];

        let bytes = encode_event(&row, &schema, ChangeType::Delete).unwrap();
        assert_eq!(
            decode(&bytes),
            json!({"id": 1, "name": "Alice", "_CHANGE_TYPE": "DELETE"})
        );
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"_CHANGE_TYPE":"DELETE","id":1,"name":"Alice"}"#
        );
    }

    #[test]
    fn test_marker_sorts_with_columns() {
        // Uppercase and digits sort before '_', lowercase after
        let schema = Schema::from_names(["name", "ID", "2nd", "_a", "Zone"]);
        let row = vec![
            Value::from("Alice"),
            Value::Int64(1),
            Value::Bool(true),
            Value::Null,
            Value::from("eu"),
        ];

        let bytes = encode_event(&row, &schema, ChangeType::Upsert).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"2nd":true,"ID":1,"Zone":"eu","_CHANGE_TYPE":"UPSERT","_a":null,"name":"Alice"}"#
        );
    }

    #[test]
    fn test_duplicate_columns_last_wins() {
        let schema = Schema::from_names(["id", "id"]);
        let row = vec![Value::Int64(1), Value::Int64(2)];

        let event = CdcEvent::from_row(&row, &schema, ChangeType::Upsert).unwrap();
        assert_eq!(event.get("id"), Some(&Value::Int64(2)));
        assert_eq!(
            decode(&event.to_bytes().unwrap()),
            json!({"id": 2, "_CHANGE_TYPE": "UPSERT"})
        );
    }

    #[test]
    fn test_marker_overrides_column() {
        let schema = Schema::from_names(["_CHANGE_TYPE", "id"]);
        let row = vec![Value::from("INSERT"), Value::Int64(9)];

        let bytes = encode_event(&row, &schema, ChangeType::Upsert).unwrap();
        assert_eq!(
            decode(&bytes),
            json!({"id": 9, "_CHANGE_TYPE": "UPSERT"})
        );
    }

    #[test]
    fn test_empty_row_still_carries_marker() {
        let bytes = encode_event(&Vec::new(), &Schema::default(), ChangeType::Delete).unwrap();
        assert_eq!(decode(&bytes), json!({"_CHANGE_TYPE": "DELETE"}));
    }

    #[test]
    fn test_unrepresentable_value() {
        let schema = Schema::from_names(["score"]);
        let row = vec![Value::Float64(f64::NAN)];

        let err = encode_event(&row, &schema, ChangeType::Upsert).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SerializationFailed);
        assert!(err.to_string().starts_with("event.encode: "));
    }

    #[test]
    fn test_row_schema_mismatch() {
        let schema = Schema::from_names(["a", "b"]);
        let row = vec![Value::Null];

        let err = encode_event(&row, &schema, ChangeType::Upsert).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SerializationFailed);
    }
}
