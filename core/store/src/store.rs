//! Local store trait definition.

use async_trait::async_trait;

use fieldsync_common::{NaturalKey, Record, Result, StatusCounts, SyncStatus, TableSpec};

/// Column holding the per-row sync flag in every synchronized table.
pub const SYNC_STATUS_COLUMN: &str = "sync_status";

/// Local relational store consumed by the sync engine.
///
/// Rows are exchanged as [`Record`]s keyed by local column names; the
/// `sync_status` column is managed by the store and never appears in them.
/// Implementations serialize their own writes; the engine never holds a
/// cross-table transaction open.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Get the store name (e.g., "memory", "sqlite").
    fn name(&self) -> &str;

    /// Fetch up to `limit` rows flagged pending, oldest first.
    async fn select_pending(&self, table: &TableSpec, limit: usize) -> Result<Vec<Record>>;

    /// Insert or overwrite rows by primary key and flag them synced.
    ///
    /// # Postconditions
    /// - Absent rows are inserted, present rows have every supplied column
    ///   overwritten
    /// - Every written row has `sync_status = synced`
    ///
    /// # Errors
    /// - A row lacks its primary key
    /// - A row collides with a different row on the natural key
    async fn upsert_many(&self, table: &TableSpec, rows: &[Record]) -> Result<usize>;

    /// Set the sync status of the given ids, `chunk_size` ids per statement.
    ///
    /// Must not modify the updated-at column.
    async fn update_status_chunked(
        &self,
        table: &TableSpec,
        ids: &[String],
        status: SyncStatus,
        chunk_size: usize,
    ) -> Result<usize>;

    /// Fetch rows whose natural key is one of `keys`.
    async fn select_by_natural_key(
        &self,
        table: &TableSpec,
        keys: &[NaturalKey],
    ) -> Result<Vec<Record>>;

    /// Check whether a row exists.
    async fn exists(&self, table: &TableSpec, id: &str) -> Result<bool>;

    /// Count rows per sync status.
    async fn count_by_status(&self, table: &TableSpec) -> Result<StatusCounts>;

    /// Read a sync-state value.
    async fn get_state(&self, key: &str) -> Result<Option<String>>;

    /// Write a sync-state value.
    async fn set_state(&self, key: &str, value: &str) -> Result<()>;
}

/// Keep only the columns the table declares.
pub(crate) fn mapped_columns<'a>(
    table: &TableSpec,
    row: &'a Record,
) -> Vec<(&'static str, &'a serde_json::Value)> {
    table
        .fields
        .iter()
        .filter_map(|f| row.get(f.local).map(|v| (f.local, v)))
        .collect()
}
