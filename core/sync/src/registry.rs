//! Table handler registry.
//!
//! Every synchronized table is served by a [`TableHandler`] bundling the
//! four per-table capabilities the engine needs. Registration order is the
//! order tables are collected, remapped and applied, so parents must be
//! registered before their children.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use fieldsync_common::{catalog, Error, Record, Result, TableId, TableSpec};
use fieldsync_store::LocalStore;

use crate::codec;
use crate::protocol::WireRecord;

/// Per-table sync capabilities.
#[async_trait]
pub trait TableHandler: Send + Sync {
    /// Static description of the table.
    fn spec(&self) -> &TableSpec;

    /// Fetch up to `limit` pending rows.
    async fn collect(&self, store: &dyn LocalStore, limit: usize) -> Result<Vec<Record>> {
        store.select_pending(self.spec(), limit).await
    }

    /// Convert a local row to its wire form.
    fn to_wire(&self, row: &Record) -> WireRecord {
        codec::to_wire(self.spec(), row)
    }

    /// Convert a wire record to a local row.
    fn from_wire(&self, wire: &WireRecord) -> Result<Record> {
        codec::from_wire(self.spec(), wire)
    }

    /// Insert or overwrite rows, flagging them synced.
    async fn upsert(&self, store: &dyn LocalStore, rows: &[Record]) -> Result<usize> {
        store.upsert_many(self.spec(), rows).await
    }
}

/// Handler driven entirely by a [`TableSpec`].
#[derive(Debug, Clone, Copy)]
pub struct MappedTable {
    spec: TableSpec,
}

impl MappedTable {
    pub fn new(spec: TableSpec) -> Self {
        Self { spec }
    }
}

impl TableHandler for MappedTable {
    fn spec(&self) -> &TableSpec {
        &self.spec
    }
}

struct Registered {
    handler: Arc<dyn TableHandler>,
    cap: usize,
}

/// Ordered registry of table handlers with their push caps.
pub struct TableRegistry {
    tables: Vec<Registered>,
    index: HashMap<TableId, usize>,
}

impl TableRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            tables: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Registry holding every built-in table with its default cap.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for spec in catalog::ALL {
            registry.tables.push(Registered {
                handler: Arc::new(MappedTable::new(*spec)),
                cap: spec.push_cap,
            });
            registry.index.insert(spec.id, registry.tables.len() - 1);
        }
        registry
    }

    /// Register a handler after every already-registered table.
    ///
    /// # Errors
    /// - The table is already registered
    pub fn register(&mut self, handler: Arc<dyn TableHandler>) -> Result<()> {
        let table = handler.spec().id;
        if self.index.contains_key(&table) {
            return Err(Error::Conflict(format!(
                "Table '{}' is already registered",
                table
            )));
        }
        let cap = handler.spec().push_cap;
        self.tables.push(Registered { handler, cap });
        self.index.insert(table, self.tables.len() - 1);
        Ok(())
    }

    /// Override the push cap of a registered table.
    pub fn set_cap(&mut self, table: TableId, cap: usize) -> Result<()> {
        let position = *self
            .index
            .get(&table)
            .ok_or_else(|| Error::NotFound(format!("Table '{}' is not registered", table)))?;
        self.tables[position].cap = cap;
        Ok(())
    }

    /// Apply every cap override in `caps`.
    pub fn apply_caps(&mut self, caps: &HashMap<TableId, usize>) -> Result<()> {
        for (table, cap) in caps {
            self.set_cap(*table, *cap)?;
        }
        Ok(())
    }

    pub fn get(&self, table: TableId) -> Option<&Arc<dyn TableHandler>> {
        self.index.get(&table).map(|i| &self.tables[*i].handler)
    }

    /// Resolve a wire table name.
    pub fn get_by_name(&self, name: &str) -> Option<&Arc<dyn TableHandler>> {
        name.parse::<TableId>().ok().and_then(|table| self.get(table))
    }

    /// Spec of a registered table.
    pub fn spec(&self, table: TableId) -> Option<&TableSpec> {
        self.get(table).map(|handler| handler.spec())
    }

    /// Push cap of a registered table.
    pub fn cap(&self, table: TableId) -> Option<usize> {
        self.index.get(&table).map(|i| self.tables[*i].cap)
    }

    /// Handlers with their caps, in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&Arc<dyn TableHandler>, usize)> + '_ {
        self.tables.iter().map(|r| (&r.handler, r.cap))
    }

    /// Registered specs, in registration order.
    pub fn specs(&self) -> Vec<&TableSpec> {
        self.tables.iter().map(|r| r.handler.spec()).collect()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl Default for TableRegistry {
    fn default() -> Self {
        Self::new()
    }
}
