//! Wire messages exchanged with the sync server.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use fieldsync_common::{Error, Result, TableId};

/// A record in its external representation, keyed by wire field names.
pub type WireRecord = serde_json::Map<String, Value>;

/// Rows of one table sent in a push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePacket {
    pub table: TableId,
    pub rows: Vec<WireRecord>,
}

/// Body of `POST /sync/push`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    pub client_id: String,
    pub upserts: Vec<ChangePacket>,
}

impl PushRequest {
    /// Total rows across all packets.
    pub fn row_count(&self) -> usize {
        self.upserts.iter().map(|p| p.rows.len()).sum()
    }
}

/// Response of `POST /sync/push`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied: Option<u64>,
}

/// One change in a pull response.
///
/// The table stays a string so an unknown table only skips its own change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullChange {
    pub table: String,
    pub payload_json: String,
}

impl PullChange {
    /// Parse `payload_json` into a wire record.
    pub fn decode(&self) -> Result<WireRecord> {
        let value: Value = serde_json::from_str(&self.payload_json)
            .map_err(|e| Error::Decode(format!("{}: {}", self.table, e)))?;
        match value {
            Value::Object(record) => Ok(record),
            other => Err(Error::Decode(format!(
                "{}: payload is not an object but {}",
                self.table,
                type_name(&other)
            ))),
        }
    }
}

/// Response of `GET /sync/pull`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    #[serde(default)]
    pub changes: Vec<PullChange>,
    pub server_cursor: i64,
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
