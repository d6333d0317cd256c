//! Pending-change collection for push.

use tracing::{debug, warn};

use fieldsync_common::{Result, TableId};
use fieldsync_store::LocalStore;

use crate::protocol::ChangePacket;
use crate::registry::TableRegistry;

/// Changes gathered for one push.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectedChanges {
    /// One packet per table that had pending rows, in registry order.
    pub packets: Vec<ChangePacket>,
    /// Primary keys of the rows in `packets`, per table.
    pub submitted: Vec<(TableId, Vec<String>)>,
}

impl CollectedChanges {
    /// Total rows across all packets.
    pub fn total_rows(&self) -> usize {
        self.packets.iter().map(|p| p.rows.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

/// Gathers pending rows across tables, bounded per table and globally.
pub struct ChangeCollector<'a> {
    registry: &'a TableRegistry,
    store: &'a dyn LocalStore,
    global_cap: usize,
}

impl<'a> ChangeCollector<'a> {
    pub fn new(registry: &'a TableRegistry, store: &'a dyn LocalStore, global_cap: usize) -> Self {
        Self {
            registry,
            store,
            global_cap,
        }
    }

    /// Collect pending rows in registry order.
    ///
    /// Each table contributes at most its cap and never more than the
    /// remaining global budget; tables after the budget runs out contribute
    /// nothing.
    pub async fn collect(&self) -> Result<CollectedChanges> {
        let mut collected = CollectedChanges::default();
        let mut remaining = self.global_cap;

        for (handler, cap) in self.registry.iter() {
            if remaining == 0 {
                break;
            }
            let spec = handler.spec();
            let limit = cap.min(remaining);
            if limit == 0 {
                continue;
            }

            let rows = handler.collect(self.store, limit).await?;
            let mut ids = Vec::with_capacity(rows.len());
            let mut wire_rows = Vec::with_capacity(rows.len());
            for row in rows.iter().take(limit) {
                match spec.row_id(row) {
                    Some(id) => {
                        ids.push(id);
                        wire_rows.push(handler.to_wire(row));
                    }
                    None => warn!(table = %spec.id, "Pending row without primary key, not pushed"),
                }
            }

            if wire_rows.is_empty() {
                continue;
            }
            debug!(table = %spec.id, rows = wire_rows.len(), "Collected pending rows");
            remaining -= wire_rows.len();
            collected.packets.push(ChangePacket {
                table: spec.id,
                rows: wire_rows,
            });
            collected.submitted.push((spec.id, ids));
        }

        Ok(collected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_common::catalog::{CATEGORY_INSTANCES, FIELD_VALUES, TOOLS};
    use fieldsync_common::{Record, SyncStatus};
    use fieldsync_store::MemoryStore;
    use proptest::prelude::*;
    use serde_json::json;

    fn seed(store: &MemoryStore, spec: &fieldsync_common::TableSpec, count: usize) {
        for i in 0..count {
            let row: Record = json!({"id": format!("{}-{}", spec.id, i)})
                .as_object()
                .cloned()
                .unwrap();
            store.put_local(spec, row).unwrap();
        }
    }

    #[tokio::test]
    async fn test_empty_store_collects_nothing() {
        let store = MemoryStore::new();
        let registry = TableRegistry::builtin();

        let collected = ChangeCollector::new(&registry, &store, 1200)
            .collect()
            .await
            .unwrap();

        assert!(collected.is_empty());
        assert_eq!(collected.total_rows(), 0);
    }

    #[tokio::test]
    async fn test_global_cap_truncates_later_tables() {
        let store = MemoryStore::new();
        seed(&store, &CATEGORY_INSTANCES, 300);
        seed(&store, &FIELD_VALUES, 800);
        seed(&store, &TOOLS, 100);

        let registry = TableRegistry::builtin();
        let collected = ChangeCollector::new(&registry, &store, 1000)
            .collect()
            .await
            .unwrap();

        assert_eq!(collected.total_rows(), 1000);
        let per_table: Vec<(TableId, usize)> = collected
            .packets
            .iter()
            .map(|p| (p.table, p.rows.len()))
            .collect();
        assert_eq!(
            per_table,
            vec![(TableId::CategoryInstances, 300), (TableId::FieldValues, 700)]
        );
    }

    #[tokio::test]
    async fn test_synced_rows_are_not_collected() {
        let store = MemoryStore::new();
        seed(&store, &TOOLS, 2);
        store
            .put_with_status(
                &TOOLS,
                json!({"id": "done"}).as_object().cloned().unwrap(),
                SyncStatus::Synced,
            )
            .unwrap();

        let registry = TableRegistry::builtin();
        let collected = ChangeCollector::new(&registry, &store, 1200)
            .collect()
            .await
            .unwrap();

        assert_eq!(collected.submitted, vec![(TableId::Tools, vec!["tools-0".to_string(), "tools-1".to_string()])]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_caps_are_respected(
            instances in 0usize..60,
            values in 0usize..60,
            tools in 0usize..60,
            instance_cap in 1usize..40,
            value_cap in 1usize..40,
            global_cap in 1usize..80,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let store = MemoryStore::new();
            seed(&store, &CATEGORY_INSTANCES, instances);
            seed(&store, &FIELD_VALUES, values);
            seed(&store, &TOOLS, tools);

            let mut registry = TableRegistry::builtin();
            registry.set_cap(TableId::CategoryInstances, instance_cap).unwrap();
            registry.set_cap(TableId::FieldValues, value_cap).unwrap();

            let collected = runtime
                .block_on(ChangeCollector::new(&registry, &store, global_cap).collect())
                .unwrap();

            let available = instances.min(instance_cap) + values.min(value_cap) + tools.min(100);
            prop_assert_eq!(collected.total_rows(), available.min(global_cap));
            for packet in &collected.packets {
                prop_assert!(packet.rows.len() <= registry.cap(packet.table).unwrap());
                prop_assert!(!packet.rows.is_empty());
            }
            for ((table, ids), packet) in collected.submitted.iter().zip(&collected.packets) {
                prop_assert_eq!(*table, packet.table);
                prop_assert_eq!(ids.len(), packet.rows.len());
            }
        }
    }
}
