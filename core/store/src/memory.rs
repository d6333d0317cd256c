//! In-memory local store for testing and embedding.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use fieldsync_common::{
    Error, NaturalKey, Record, Result, StatusCounts, SyncStatus, TableId, TableSpec,
};

use crate::store::{mapped_columns, LocalStore};

#[derive(Debug, Clone)]
struct StoredRow {
    seq: u64,
    status: SyncStatus,
    record: Record,
}

#[derive(Debug, Default)]
struct Tables {
    rows: HashMap<TableId, HashMap<String, StoredRow>>,
    state: HashMap<String, String>,
    next_seq: u64,
}

impl Tables {
    /// Merge `row` into the table, enforcing natural-key uniqueness.
    fn write(&mut self, table: &TableSpec, row: &Record, status: SyncStatus) -> Result<()> {
        let id = table.row_id(row).ok_or_else(|| {
            Error::InvalidInput(format!("Row for {} has no primary key", table.id))
        })?;

        let rows = self.rows.entry(table.id).or_default();
        let mut merged = rows
            .get(&id)
            .map(|existing| existing.record.clone())
            .unwrap_or_default();
        for (column, value) in mapped_columns(table, row) {
            merged.insert(column.to_string(), value.clone());
        }

        if let Some(key) = table.natural_key_of(&merged) {
            let clash = rows
                .iter()
                .find(|(other_id, other)| {
                    **other_id != id && table.natural_key_of(&other.record).as_ref() == Some(&key)
                })
                .map(|(other_id, _)| other_id.clone());
            if let Some(other_id) = clash {
                return Err(Error::Conflict(format!(
                    "{} natural key {:?} already used by {}",
                    table.id, key, other_id
                )));
            }
        }

        match rows.get_mut(&id) {
            Some(existing) => {
                existing.record = merged;
                existing.status = status;
            }
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                rows.insert(
                    id,
                    StoredRow {
                        seq,
                        status,
                        record: merged,
                    },
                );
            }
        }
        Ok(())
    }
}

/// In-memory store.
///
/// Enforces the same natural-key uniqueness a real local schema would, so
/// tests exercise the remapping path honestly. All data is lost on drop.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Tables>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.inner
            .read()
            .map_err(|_| Error::Storage("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.inner
            .write()
            .map_err(|_| Error::Storage("memory store lock poisoned".to_string()))
    }

    /// Record a local edit: the row is written and flagged pending.
    pub fn put_local(&self, table: &TableSpec, row: Record) -> Result<()> {
        self.write()?.write(table, &row, SyncStatus::Pending)
    }

    /// Write a row with an explicit status.
    pub fn put_with_status(&self, table: &TableSpec, row: Record, status: SyncStatus) -> Result<()> {
        self.write()?.write(table, &row, status)
    }

    /// Get a row by primary key.
    pub fn get(&self, table: &TableSpec, id: &str) -> Result<Option<Record>> {
        Ok(self
            .read()?
            .rows
            .get(&table.id)
            .and_then(|rows| rows.get(id))
            .map(|r| r.record.clone()))
    }

    /// Get the sync status of a row.
    pub fn status_of(&self, table: &TableSpec, id: &str) -> Result<Option<SyncStatus>> {
        Ok(self
            .read()?
            .rows
            .get(&table.id)
            .and_then(|rows| rows.get(id))
            .map(|r| r.status))
    }

    /// Number of rows in a table.
    pub fn len(&self, table: &TableSpec) -> Result<usize> {
        Ok(self.read()?.rows.get(&table.id).map_or(0, |rows| rows.len()))
    }

    /// Whether the table is empty.
    pub fn is_empty(&self, table: &TableSpec) -> Result<bool> {
        Ok(self.len(table)? == 0)
    }

    /// Snapshot of every table, sorted by id, for state comparisons.
    pub fn snapshot(&self) -> Result<Vec<(TableId, String, SyncStatus, Record)>> {
        let tables = self.read()?;
        let mut out: Vec<_> = tables
            .rows
            .iter()
            .flat_map(|(table, rows)| {
                rows.iter()
                    .map(move |(id, r)| (*table, id.clone(), r.status, r.record.clone()))
            })
            .collect();
        out.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));
        Ok(out)
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn select_pending(&self, table: &TableSpec, limit: usize) -> Result<Vec<Record>> {
        let tables = self.read()?;
        let Some(rows) = tables.rows.get(&table.id) else {
            return Ok(Vec::new());
        };

        let mut pending: Vec<&StoredRow> = rows
            .values()
            .filter(|r| r.status == SyncStatus::Pending)
            .collect();
        pending.sort_by_key(|r| r.seq);

        Ok(pending
            .into_iter()
            .take(limit)
            .map(|r| r.record.clone())
            .collect())
    }

    async fn upsert_many(&self, table: &TableSpec, rows: &[Record]) -> Result<usize> {
        let mut tables = self.write()?;
        for row in rows {
            tables.write(table, row, SyncStatus::Synced)?;
        }
        Ok(rows.len())
    }

    async fn update_status_chunked(
        &self,
        table: &TableSpec,
        ids: &[String],
        status: SyncStatus,
        chunk_size: usize,
    ) -> Result<usize> {
        if chunk_size == 0 {
            return Err(Error::InvalidInput("chunk size must be positive".to_string()));
        }

        let mut tables = self.write()?;
        let Some(rows) = tables.rows.get_mut(&table.id) else {
            return Ok(0);
        };

        let mut updated = 0;
        for chunk in ids.chunks(chunk_size) {
            for id in chunk {
                if let Some(row) = rows.get_mut(id) {
                    row.status = status;
                    updated += 1;
                }
            }
        }
        Ok(updated)
    }

    async fn select_by_natural_key(
        &self,
        table: &TableSpec,
        keys: &[NaturalKey],
    ) -> Result<Vec<Record>> {
        if keys.is_empty() || !table.has_natural_key() {
            return Ok(Vec::new());
        }

        let tables = self.read()?;
        let Some(rows) = tables.rows.get(&table.id) else {
            return Ok(Vec::new());
        };

        let mut matches: Vec<&StoredRow> = rows
            .values()
            .filter(|r| {
                table
                    .natural_key_of(&r.record)
                    .is_some_and(|key| keys.contains(&key))
            })
            .collect();
        matches.sort_by_key(|r| r.seq);
        Ok(matches.into_iter().map(|r| r.record.clone()).collect())
    }

    async fn exists(&self, table: &TableSpec, id: &str) -> Result<bool> {
        Ok(self
            .read()?
            .rows
            .get(&table.id)
            .is_some_and(|rows| rows.contains_key(id)))
    }

    async fn count_by_status(&self, table: &TableSpec) -> Result<StatusCounts> {
        let tables = self.read()?;
        let mut counts = StatusCounts::default();
        for row in tables.rows.get(&table.id).into_iter().flat_map(|r| r.values()) {
            match row.status {
                SyncStatus::Pending => counts.pending += 1,
                SyncStatus::Synced => counts.synced += 1,
                SyncStatus::Error => counts.error += 1,
            }
        }
        Ok(counts)
    }

    async fn get_state(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read()?.state.get(key).cloned())
    }

    async fn set_state(&self, key: &str, value: &str) -> Result<()> {
        self.write()?.state.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
