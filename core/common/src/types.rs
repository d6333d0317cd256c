//! Common types used throughout FieldSync.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A local row, keyed by local column names.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Logical tables known to the sync engine.
///
/// The set is closed: a new table is a new variant plus a catalog entry,
/// never a new code path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableId {
    CategoryDefinitions,
    FieldDefinitions,
    CategoryInstances,
    FieldValues,
    Operations,
    AuditEntries,
    Tools,
    ToolMovements,
}

impl TableId {
    /// All tables in dependency order (parents first).
    pub const ALL: [TableId; 8] = [
        TableId::CategoryDefinitions,
        TableId::FieldDefinitions,
        TableId::CategoryInstances,
        TableId::FieldValues,
        TableId::Operations,
        TableId::AuditEntries,
        TableId::Tools,
        TableId::ToolMovements,
    ];

    /// Stable wire name of the table.
    pub fn as_str(&self) -> &'static str {
        match self {
            TableId::CategoryDefinitions => "category_definitions",
            TableId::FieldDefinitions => "field_definitions",
            TableId::CategoryInstances => "category_instances",
            TableId::FieldValues => "field_values",
            TableId::Operations => "operations",
            TableId::AuditEntries => "audit_entries",
            TableId::Tools => "tools",
            TableId::ToolMovements => "tool_movements",
        }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TableId {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        TableId::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| crate::Error::NotFound(format!("Unknown table '{}'", s)))
    }
}

/// Per-row synchronization flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Local changes not yet acknowledged by the server.
    Pending,
    /// Acknowledged by the server or received from it.
    Synced,
    /// Last push of this row failed permanently.
    Error,
}

impl SyncStatus {
    /// Column value stored locally.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Error => "error",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "synced" => Ok(SyncStatus::Synced),
            "error" => Ok(SyncStatus::Error),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown sync status '{}'",
                other
            ))),
        }
    }
}

/// Row counts per sync status for one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub synced: usize,
    pub error: usize,
}

impl StatusCounts {
    /// Total number of rows.
    pub fn total(&self) -> usize {
        self.pending + self.synced + self.error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_id_parse() {
        for table in TableId::ALL {
            assert_eq!(table.as_str().parse::<TableId>().unwrap(), table);
        }
        assert!("nope".parse::<TableId>().is_err());
    }

    #[test]
    fn test_table_id_serde_matches_wire_name() {
        let json = serde_json::to_string(&TableId::FieldValues).unwrap();
        assert_eq!(json, "\"field_values\"");
    }

    #[test]
    fn test_sync_status_parse() {
        assert_eq!("pending".parse::<SyncStatus>().unwrap(), SyncStatus::Pending);
        assert_eq!(SyncStatus::Synced.to_string(), "synced");
        assert!("done".parse::<SyncStatus>().is_err());
    }

    #[test]
    fn test_status_counts_total() {
        let counts = StatusCounts {
            pending: 2,
            synced: 5,
            error: 1,
        };
        assert_eq!(counts.total(), 8);
    }
}
