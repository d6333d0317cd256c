//! Built-in table catalog.
//!
//! Order matters: tables are listed parents first, and that order is used
//! for collection, ID remapping and application.

use crate::schema::{FieldKind::*, FieldSpec, ForeignKey, TableSpec};
use crate::types::TableId;

pub const CATEGORY_DEFINITIONS: TableSpec = TableSpec {
    id: TableId::CategoryDefinitions,
    local_name: "category_definitions",
    primary_key: "id",
    updated_at: "updated_at",
    deleted_at: Some("deleted_at"),
    fields: &[
        FieldSpec::new("id", "id", Text),
        FieldSpec::new("code", "code", Text),
        FieldSpec::new("name", "name", Text),
        FieldSpec::new("description", "description", Text),
        FieldSpec::new("updated_at", "updatedAt", Timestamp),
        FieldSpec::new("deleted_at", "deletedAt", Timestamp),
    ],
    natural_key: &["code"],
    foreign_keys: &[],
    push_cap: 50,
};

pub const FIELD_DEFINITIONS: TableSpec = TableSpec {
    id: TableId::FieldDefinitions,
    local_name: "field_definitions",
    primary_key: "id",
    updated_at: "updated_at",
    deleted_at: Some("deleted_at"),
    fields: &[
        FieldSpec::new("id", "id", Text),
        FieldSpec::new("category_id", "categoryId", Text),
        FieldSpec::new("code", "code", Text),
        FieldSpec::new("label", "label", Text),
        FieldSpec::new("field_type", "fieldType", Text),
        FieldSpec::new("required", "required", Bool),
        FieldSpec::new("position", "position", Integer),
        FieldSpec::new("options", "options", Json),
        FieldSpec::new("updated_at", "updatedAt", Timestamp),
        FieldSpec::new("deleted_at", "deletedAt", Timestamp),
    ],
    natural_key: &["category_id", "code"],
    foreign_keys: &[ForeignKey::new("category_id", TableId::CategoryDefinitions)],
    push_cap: 200,
};

pub const CATEGORY_INSTANCES: TableSpec = TableSpec {
    id: TableId::CategoryInstances,
    local_name: "category_instances",
    primary_key: "id",
    updated_at: "updated_at",
    deleted_at: Some("deleted_at"),
    fields: &[
        FieldSpec::new("id", "id", Text),
        FieldSpec::new("category_id", "categoryId", Text),
        FieldSpec::new("label", "label", Text),
        FieldSpec::new("status", "status", Text),
        FieldSpec::new("created_at", "createdAt", Timestamp),
        FieldSpec::new("updated_at", "updatedAt", Timestamp),
        FieldSpec::new("deleted_at", "deletedAt", Timestamp),
    ],
    natural_key: &[],
    foreign_keys: &[ForeignKey::new("category_id", TableId::CategoryDefinitions)],
    push_cap: 300,
};

pub const FIELD_VALUES: TableSpec = TableSpec {
    id: TableId::FieldValues,
    local_name: "field_values",
    primary_key: "id",
    updated_at: "updated_at",
    deleted_at: Some("deleted_at"),
    fields: &[
        FieldSpec::new("id", "id", Text),
        FieldSpec::new("instance_id", "instanceId", Text),
        FieldSpec::new("field_id", "fieldId", Text),
        FieldSpec::new("value", "value", Text),
        FieldSpec::new("updated_at", "updatedAt", Timestamp),
        FieldSpec::new("deleted_at", "deletedAt", Timestamp),
    ],
    natural_key: &[],
    foreign_keys: &[
        ForeignKey::new("instance_id", TableId::CategoryInstances),
        ForeignKey::new("field_id", TableId::FieldDefinitions),
    ],
    push_cap: 800,
};

pub const OPERATIONS: TableSpec = TableSpec {
    id: TableId::Operations,
    local_name: "operations",
    primary_key: "id",
    updated_at: "updated_at",
    deleted_at: Some("deleted_at"),
    fields: &[
        FieldSpec::new("id", "id", Text),
        FieldSpec::new("instance_id", "instanceId", Text),
        FieldSpec::new("kind", "kind", Text),
        FieldSpec::new("performed_at", "performedAt", Timestamp),
        FieldSpec::new("performed_by", "performedBy", Text),
        FieldSpec::new("notes", "notes", Text),
        FieldSpec::new("updated_at", "updatedAt", Timestamp),
        FieldSpec::new("deleted_at", "deletedAt", Timestamp),
    ],
    natural_key: &[],
    foreign_keys: &[ForeignKey::new("instance_id", TableId::CategoryInstances)],
    push_cap: 400,
};

pub const AUDIT_ENTRIES: TableSpec = TableSpec {
    id: TableId::AuditEntries,
    local_name: "audit_entries",
    primary_key: "id",
    updated_at: "updated_at",
    deleted_at: None,
    fields: &[
        FieldSpec::new("id", "id", Text),
        FieldSpec::new("entity_table", "entityTable", Text),
        FieldSpec::new("entity_id", "entityId", Text),
        FieldSpec::new("action", "action", Text),
        FieldSpec::new("actor", "actor", Text),
        FieldSpec::new("details", "details", Json),
        FieldSpec::new("created_at", "createdAt", Timestamp),
        FieldSpec::new("updated_at", "updatedAt", Timestamp),
    ],
    natural_key: &[],
    foreign_keys: &[],
    push_cap: 800,
};

pub const TOOLS: TableSpec = TableSpec {
    id: TableId::Tools,
    local_name: "tools",
    primary_key: "id",
    updated_at: "updated_at",
    deleted_at: Some("deleted_at"),
    fields: &[
        FieldSpec::new("id", "id", Text),
        FieldSpec::new("serial_number", "serialNumber", Text),
        FieldSpec::new("name", "name", Text),
        FieldSpec::new("location", "location", Text),
        FieldSpec::new("calibrated", "calibrated", Bool),
        FieldSpec::new("updated_at", "updatedAt", Timestamp),
        FieldSpec::new("deleted_at", "deletedAt", Timestamp),
    ],
    natural_key: &[],
    foreign_keys: &[],
    push_cap: 100,
};

pub const TOOL_MOVEMENTS: TableSpec = TableSpec {
    id: TableId::ToolMovements,
    local_name: "tool_movements",
    primary_key: "id",
    updated_at: "updated_at",
    deleted_at: Some("deleted_at"),
    fields: &[
        FieldSpec::new("id", "id", Text),
        FieldSpec::new("tool_id", "toolId", Text),
        FieldSpec::new("instance_id", "instanceId", Text),
        FieldSpec::new("direction", "direction", Text),
        FieldSpec::new("quantity", "quantity", Real),
        FieldSpec::new("moved_at", "movedAt", Timestamp),
        FieldSpec::new("updated_at", "updatedAt", Timestamp),
        FieldSpec::new("deleted_at", "deletedAt", Timestamp),
    ],
    natural_key: &[],
    foreign_keys: &[
        ForeignKey::new("tool_id", TableId::Tools),
        ForeignKey::new("instance_id", TableId::CategoryInstances),
    ],
    push_cap: 500,
};

/// Every built-in table, parents first.
pub const ALL: [&TableSpec; 8] = [
    &CATEGORY_DEFINITIONS,
    &FIELD_DEFINITIONS,
    &CATEGORY_INSTANCES,
    &FIELD_VALUES,
    &OPERATIONS,
    &AUDIT_ENTRIES,
    &TOOLS,
    &TOOL_MOVEMENTS,
];

/// Built-in spec for a table.
pub fn spec(table: TableId) -> &'static TableSpec {
    match table {
        TableId::CategoryDefinitions => &CATEGORY_DEFINITIONS,
        TableId::FieldDefinitions => &FIELD_DEFINITIONS,
        TableId::CategoryInstances => &CATEGORY_INSTANCES,
        TableId::FieldValues => &FIELD_VALUES,
        TableId::Operations => &OPERATIONS,
        TableId::AuditEntries => &AUDIT_ENTRIES,
        TableId::Tools => &TOOLS,
        TableId::ToolMovements => &TOOL_MOVEMENTS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_order_matches_table_ids() {
        let ids: Vec<_> = ALL.iter().map(|s| s.id).collect();
        assert_eq!(ids, TableId::ALL.to_vec());
    }

    #[test]
    fn test_every_spec_is_well_formed() {
        for spec in ALL {
            assert_eq!(spec.local_name, spec.id.as_str());
            assert!(spec.field(spec.primary_key).is_some(), "{}", spec.id);
            assert!(spec.field(spec.updated_at).is_some(), "{}", spec.id);
            if let Some(deleted) = spec.deleted_at {
                assert!(spec.field(deleted).is_some(), "{}", spec.id);
            }
            for column in spec.natural_key {
                assert!(spec.field(column).is_some(), "{}.{}", spec.id, column);
            }
            for fk in spec.foreign_keys {
                assert!(spec.field(fk.column).is_some(), "{}.{}", spec.id, fk.column);
            }
            assert!(spec.push_cap > 0);
        }
    }

    #[test]
    fn test_parents_precede_children() {
        let position = |t: TableId| TableId::ALL.iter().position(|x| *x == t).unwrap();
        for spec in ALL {
            for fk in spec.foreign_keys {
                assert!(position(fk.references) < position(spec.id));
            }
        }
    }
}
