//! Conversion between local records and wire records.
//!
//! Only declared fields cross the boundary in either direction. Booleans
//! are 0/1 locally and `true`/`false` on the wire; JSON fields are stored
//! locally as serialized text and travel as structured JSON.

use serde_json::Value;

use fieldsync_common::{Error, FieldKind, FieldSpec, Record, Result, TableSpec};

use crate::protocol::WireRecord;

/// Convert a local row to its wire form.
pub fn to_wire(table: &TableSpec, row: &Record) -> WireRecord {
    let mut wire = WireRecord::new();
    for field in table.fields {
        if let Some(value) = row.get(field.local) {
            wire.insert(field.wire.to_string(), local_to_wire(field, value));
        }
    }
    wire
}

/// Convert a wire record to a local row.
///
/// # Errors
/// - The primary key is missing or not a string/number
/// - A field value does not match its declared kind
pub fn from_wire(table: &TableSpec, wire: &WireRecord) -> Result<Record> {
    let mut row = Record::new();
    for field in table.fields {
        if let Some(value) = wire.get(field.wire) {
            row.insert(field.local.to_string(), wire_to_local(table, field, value)?);
        }
    }

    if table.row_id(&row).is_none() {
        return Err(Error::Decode(format!(
            "{} record without primary key",
            table.id
        )));
    }
    Ok(row)
}

fn local_to_wire(field: &FieldSpec, value: &Value) -> Value {
    match (field.kind, value) {
        (FieldKind::Bool, Value::Number(n)) => Value::Bool(n.as_i64().is_some_and(|n| n != 0)),
        (FieldKind::Json, Value::String(text)) => {
            serde_json::from_str(text).unwrap_or_else(|_| value.clone())
        }
        _ => value.clone(),
    }
}

fn wire_to_local(table: &TableSpec, field: &FieldSpec, value: &Value) -> Result<Value> {
    let converted = match (field.kind, value) {
        (_, Value::Null) => Some(Value::Null),
        (FieldKind::Text, Value::String(_)) => Some(value.clone()),
        (FieldKind::Text, Value::Number(n)) if field.local == table.primary_key => {
            Some(Value::String(n.to_string()))
        }
        (FieldKind::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => Some(value.clone()),
        (FieldKind::Real, Value::Number(_)) => Some(value.clone()),
        (FieldKind::Bool, Value::Bool(b)) => Some(Value::from(i64::from(*b))),
        (FieldKind::Bool, Value::Number(n)) => match n.as_i64() {
            Some(0) | Some(1) => Some(value.clone()),
            _ => None,
        },
        (FieldKind::Timestamp, Value::String(_) | Value::Number(_)) => Some(value.clone()),
        (FieldKind::Json, _) => Some(Value::String(value.to_string())),
        _ => None,
    };

    converted.ok_or_else(|| {
        Error::Decode(format!(
            "{}.{}: expected {:?}, got {}",
            table.id, field.wire, field.kind, value
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_common::catalog::{AUDIT_ENTRIES, FIELD_DEFINITIONS, TOOLS};
    use serde_json::json;

    fn object(value: Value) -> serde_json::Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_to_wire_renames_and_converts() {
        let row = object(json!({
            "id": "fd1",
            "category_id": "c1",
            "code": "PRESSURE",
            "required": 1,
            "position": 3,
            "options": "{\"unit\":\"bar\"}",
            "updated_at": "2024-03-01T10:00:00Z",
            "local_only": "dropped"
        }));

        let wire = to_wire(&FIELD_DEFINITIONS, &row);

        assert_eq!(wire["categoryId"], "c1");
        assert_eq!(wire["required"], true);
        assert_eq!(wire["position"], 3);
        assert_eq!(wire["options"], json!({"unit": "bar"}));
        assert_eq!(wire["updatedAt"], "2024-03-01T10:00:00Z");
        assert!(!wire.contains_key("local_only"));
        assert!(!wire.contains_key("category_id"));
    }

    #[test]
    fn test_from_wire_renames_and_converts() {
        let wire = object(json!({
            "id": "t1",
            "serialNumber": "SN-1",
            "calibrated": false,
            "deletedAt": null,
            "serverOnly": 7
        }));

        let row = from_wire(&TOOLS, &wire).unwrap();

        assert_eq!(row["serial_number"], "SN-1");
        assert_eq!(row["calibrated"], 0);
        assert_eq!(row["deleted_at"], Value::Null);
        assert!(!row.contains_key("serverOnly"));
    }

    #[test]
    fn test_json_fields_stored_as_text() {
        let wire = object(json!({"id": "a1", "details": {"before": 1, "after": 2}}));

        let row = from_wire(&AUDIT_ENTRIES, &wire).unwrap();
        let text = row["details"].as_str().unwrap();
        assert_eq!(serde_json::from_str::<Value>(text).unwrap(), json!({"before": 1, "after": 2}));

        let back = to_wire(&AUDIT_ENTRIES, &row);
        assert_eq!(back["details"], json!({"before": 1, "after": 2}));
    }

    #[test]
    fn test_from_wire_requires_primary_key() {
        let wire = object(json!({"serialNumber": "SN-1"}));
        assert!(matches!(from_wire(&TOOLS, &wire), Err(Error::Decode(_))));
    }

    #[test]
    fn test_from_wire_rejects_wrong_kind() {
        let wire = object(json!({"id": "t1", "calibrated": "yes"}));
        assert!(matches!(from_wire(&TOOLS, &wire), Err(Error::Decode(_))));

        let wire = object(json!({"id": "fd1", "position": 1.5}));
        assert!(matches!(
            from_wire(&FIELD_DEFINITIONS, &wire),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn test_numeric_primary_key_becomes_text() {
        let wire = object(json!({"id": 17, "name": "Torque wrench"}));
        let row = from_wire(&TOOLS, &wire).unwrap();
        assert_eq!(row["id"], "17");
    }
}
