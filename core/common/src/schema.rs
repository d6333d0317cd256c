//! Table descriptors shared by the stores and the sync engine.
//!
//! A [`TableSpec`] is plain data: it names the local columns, their wire
//! names and kinds, the primary and natural keys, and the foreign keys
//! that reference other tables.

use serde_json::Value;

use crate::types::{Record, TableId};

/// How a field is represented locally and on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// UTF-8 text.
    Text,
    /// 64-bit integer.
    Integer,
    /// Floating point number.
    Real,
    /// Boolean; stored locally as 0/1.
    Bool,
    /// RFC 3339 string or epoch milliseconds.
    Timestamp,
    /// Arbitrary JSON; stored locally as serialized text.
    Json,
}

/// Mapping of one local column to its wire field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Local column name.
    pub local: &'static str,
    /// Stable external field name.
    pub wire: &'static str,
    /// Value kind.
    pub kind: FieldKind,
}

impl FieldSpec {
    pub const fn new(local: &'static str, wire: &'static str, kind: FieldKind) -> Self {
        Self { local, wire, kind }
    }
}

/// A column holding the primary key of another table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: &'static str,
    pub references: TableId,
}

impl ForeignKey {
    pub const fn new(column: &'static str, references: TableId) -> Self {
        Self { column, references }
    }
}

/// Values of a natural key, one entry per key column.
pub type NaturalKey = Vec<String>;

/// Static description of a synchronized table.
#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    /// Logical table.
    pub id: TableId,
    /// Local table name.
    pub local_name: &'static str,
    /// Primary key column (text ids).
    pub primary_key: &'static str,
    /// Column holding the last-modified timestamp.
    pub updated_at: &'static str,
    /// Soft-delete column, if the table supports soft deletion.
    pub deleted_at: Option<&'static str>,
    /// Every synchronized column, primary key included.
    pub fields: &'static [FieldSpec],
    /// Columns forming a locally unique business key; empty if none.
    pub natural_key: &'static [&'static str],
    /// Columns referencing other tables.
    pub foreign_keys: &'static [ForeignKey],
    /// Default maximum rows of this table per push.
    pub push_cap: usize,
}

impl TableSpec {
    /// Look up a field by local column name.
    pub fn field(&self, local: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.local == local)
    }

    /// Local column names in declaration order.
    pub fn columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|f| f.local)
    }

    /// Whether the table carries a natural key.
    pub fn has_natural_key(&self) -> bool {
        !self.natural_key.is_empty()
    }

    /// Primary key of a local record.
    pub fn row_id(&self, record: &Record) -> Option<String> {
        record.get(self.primary_key).and_then(key_part)
    }

    /// Natural key of a local record; `None` if any part is missing or null.
    pub fn natural_key_of(&self, record: &Record) -> Option<NaturalKey> {
        if !self.has_natural_key() {
            return None;
        }
        self.natural_key
            .iter()
            .map(|column| record.get(*column).and_then(key_part))
            .collect()
    }

    /// Foreign keys pointing at `table`.
    pub fn references_to(&self, table: TableId) -> impl Iterator<Item = &ForeignKey> + '_ {
        self.foreign_keys
            .iter()
            .filter(move |fk| fk.references == table)
    }
}

/// Canonical text form of a key value.
pub fn key_part(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_natural_key_compound() {
        let spec = catalog::spec(TableId::FieldDefinitions);
        let row = record(json!({"id": "f1", "category_id": "c1", "code": "SERIAL"}));
        assert_eq!(
            spec.natural_key_of(&row),
            Some(vec!["c1".to_string(), "SERIAL".to_string()])
        );
    }

    #[test]
    fn test_natural_key_missing_part() {
        let spec = catalog::spec(TableId::FieldDefinitions);
        let row = record(json!({"id": "f1", "category_id": null, "code": "SERIAL"}));
        assert_eq!(spec.natural_key_of(&row), None);
    }

    #[test]
    fn test_no_natural_key() {
        let spec = catalog::spec(TableId::FieldValues);
        let row = record(json!({"id": "v1"}));
        assert!(!spec.has_natural_key());
        assert_eq!(spec.natural_key_of(&row), None);
        assert_eq!(spec.row_id(&row).as_deref(), Some("v1"));
    }

    #[test]
    fn test_references_to() {
        let spec = catalog::spec(TableId::FieldValues);
        let columns: Vec<_> = spec
            .references_to(TableId::FieldDefinitions)
            .map(|fk| fk.column)
            .collect();
        assert_eq!(columns, vec!["field_id"]);
    }
}
