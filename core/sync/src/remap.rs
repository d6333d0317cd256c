//! Reconciliation of server IDs with locally created IDs.
//!
//! A record created offline keeps its local ID while the server may hold
//! the same logical entity under another ID. For tables with a natural key
//! the local row is authoritative: incoming records are rewritten to the
//! local ID, and so is every foreign key in the batch that pointed at the
//! server ID.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use fieldsync_common::{Error, NaturalKey, Record, Result, TableId, TableSpec};
use fieldsync_store::LocalStore;

use crate::registry::TableRegistry;

/// A pulled change decoded into a local row.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedChange {
    pub table: TableId,
    pub record: Record,
}

/// Server ID to local ID mappings discovered in one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdRemap {
    entries: HashMap<TableId, HashMap<String, String>>,
}

impl IdRemap {
    pub fn insert(&mut self, table: TableId, from: String, to: String) {
        self.entries.entry(table).or_default().insert(from, to);
    }

    /// Local ID for a server ID, if remapped.
    pub fn resolve(&self, table: TableId, id: &str) -> Option<&str> {
        self.entries
            .get(&table)
            .and_then(|ids| ids.get(id))
            .map(String::as_str)
    }

    /// Number of remapped IDs across all tables.
    pub fn len(&self) -> usize {
        self.entries.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rewrite `column` of `record` if it holds a remapped ID of `table`.
    fn rewrite(&self, table: TableId, record: &mut Record, column: &str) {
        let replacement = match record.get(column) {
            Some(Value::String(id)) => self.resolve(table, id).map(str::to_string),
            _ => None,
        };
        if let Some(local_id) = replacement {
            record.insert(column.to_string(), Value::String(local_id));
        }
    }

    fn rewrite_foreign_keys(&self, spec: &TableSpec, record: &mut Record) {
        for fk in spec.foreign_keys {
            self.rewrite(fk.references, record, fk.column);
        }
    }
}

/// Matches incoming records to local rows by natural key.
pub struct IdRemapper<'a> {
    registry: &'a TableRegistry,
    store: &'a dyn LocalStore,
}

impl<'a> IdRemapper<'a> {
    pub fn new(registry: &'a TableRegistry, store: &'a dyn LocalStore) -> Self {
        Self { registry, store }
    }

    /// Rewrite primary and foreign keys of `changes` in place.
    ///
    /// Natural-key tables are visited in registry order, parents first.
    /// Each table's foreign keys are rewritten before its own natural keys
    /// are computed, so a child whose key includes a parent reference
    /// matches the local child of the local parent.
    ///
    /// # Errors
    /// - Two local rows share a natural key
    /// - The store lookup fails
    pub async fn remap(&self, changes: &mut [DecodedChange]) -> Result<IdRemap> {
        let mut remap = IdRemap::default();
        let mut fk_rewritten: HashSet<TableId> = HashSet::new();

        for (handler, _) in self.registry.iter() {
            let spec = handler.spec();
            if !spec.has_natural_key() {
                continue;
            }

            let mut incoming: Vec<(usize, NaturalKey)> = Vec::new();
            for (index, change) in changes.iter_mut().enumerate() {
                if change.table != spec.id {
                    continue;
                }
                remap.rewrite_foreign_keys(spec, &mut change.record);
                if let Some(key) = spec.natural_key_of(&change.record) {
                    incoming.push((index, key));
                }
            }
            fk_rewritten.insert(spec.id);
            if incoming.is_empty() {
                continue;
            }

            let mut keys: Vec<NaturalKey> = Vec::new();
            for (_, key) in &incoming {
                if !keys.contains(key) {
                    keys.push(key.clone());
                }
            }
            let local = self.local_ids_by_key(spec, &keys).await?;

            for (index, key) in incoming {
                let Some(local_id) = local.get(&key) else {
                    continue;
                };
                let Some(incoming_id) = spec.row_id(&changes[index].record) else {
                    continue;
                };
                if *local_id != incoming_id {
                    debug!(
                        table = %spec.id,
                        from = %incoming_id,
                        to = %local_id,
                        "Remapping server id to local id"
                    );
                    remap.insert(spec.id, incoming_id, local_id.clone());
                }
            }
        }

        if remap.is_empty() {
            return Ok(remap);
        }

        for change in changes.iter_mut() {
            let Some(spec) = self.registry.spec(change.table) else {
                continue;
            };
            remap.rewrite(change.table, &mut change.record, spec.primary_key);
            if !fk_rewritten.contains(&change.table) {
                remap.rewrite_foreign_keys(spec, &mut change.record);
            }
        }

        debug!("Remapped {} ids", remap.len());
        Ok(remap)
    }

    /// Local ID per natural key; errors if a key is ambiguous.
    async fn local_ids_by_key(
        &self,
        spec: &TableSpec,
        keys: &[NaturalKey],
    ) -> Result<HashMap<NaturalKey, String>> {
        let rows = self.store.select_by_natural_key(spec, keys).await?;

        let mut by_key: HashMap<NaturalKey, String> = HashMap::new();
        for row in rows {
            let (Some(key), Some(id)) = (spec.natural_key_of(&row), spec.row_id(&row)) else {
                continue;
            };
            if let Some(existing) = by_key.get(&key) {
                if *existing != id {
                    return Err(Error::Consistency(format!(
                        "{} natural key {:?} is shared by local rows {} and {}",
                        spec.id, key, existing, id
                    )));
                }
                continue;
            }
            by_key.insert(key, id);
        }
        Ok(by_key)
    }
}
