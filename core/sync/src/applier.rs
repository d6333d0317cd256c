//! Application of pulled changes to the local store.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

use fieldsync_common::{Record, Result, TableId, TableSpec};
use fieldsync_store::LocalStore;

use crate::registry::TableRegistry;
use crate::remap::DecodedChange;
use crate::state::SyncStateStore;

/// Rows written per table by one application.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Rows written, after deduplication.
    pub applied: usize,
    /// Incoming changes dropped because a newer version of the same row
    /// was in the batch.
    pub superseded: usize,
    pub per_table: Vec<(TableId, usize)>,
}

/// Writes decoded changes table by table.
pub struct ChangeApplier<'a> {
    registry: &'a TableRegistry,
    store: &'a dyn LocalStore,
}

impl<'a> ChangeApplier<'a> {
    pub fn new(registry: &'a TableRegistry, store: &'a dyn LocalStore) -> Self {
        Self { registry, store }
    }

    /// Deduplicate by primary key, keeping the latest updated-at, then
    /// upsert each table in registry order.
    ///
    /// Tables are written sequentially without a cross-table transaction.
    /// `lastAppliedAt` is written once if anything was applied.
    pub async fn apply(
        &self,
        changes: Vec<DecodedChange>,
        applied_at: DateTime<Utc>,
    ) -> Result<ApplyReport> {
        let incoming = changes.len();
        let mut grouped = group_latest(self.registry, changes);
        let mut report = ApplyReport::default();

        for (handler, _) in self.registry.iter() {
            let table = handler.spec().id;
            let Some(rows) = grouped.remove(&table) else {
                continue;
            };
            let written = handler.upsert(self.store, &rows).await?;
            debug!(%table, rows = written, "Applied pulled rows");
            report.applied += written;
            report.per_table.push((table, written));
        }
        report.superseded = incoming.saturating_sub(report.per_table.iter().map(|(_, n)| n).sum());

        if report.applied > 0 {
            SyncStateStore::new(self.store).mark_applied(applied_at).await?;
        }
        Ok(report)
    }
}

/// Keep one row per primary key: the one with the greatest updated-at.
/// On equal timestamps the later change in the batch wins.
fn group_latest(
    registry: &TableRegistry,
    changes: Vec<DecodedChange>,
) -> HashMap<TableId, Vec<Record>> {
    let mut grouped: HashMap<TableId, (Vec<Record>, HashMap<String, usize>)> = HashMap::new();

    for change in changes {
        let Some(spec) = registry.spec(change.table) else {
            continue;
        };
        let Some(id) = spec.row_id(&change.record) else {
            continue;
        };
        let (rows, positions) = grouped.entry(change.table).or_default();
        match positions.get(&id) {
            Some(&position) => {
                if is_newer_or_equal(spec, &change.record, &rows[position]) {
                    rows[position] = change.record;
                }
            }
            None => {
                positions.insert(id, rows.len());
                rows.push(change.record);
            }
        }
    }

    grouped
        .into_iter()
        .map(|(table, (rows, _))| (table, rows))
        .collect()
}

fn is_newer_or_equal(spec: &TableSpec, candidate: &Record, current: &Record) -> bool {
    let candidate = TimestampKey::of(candidate.get(spec.updated_at));
    let current = TimestampKey::of(current.get(spec.updated_at));
    candidate.cmp(&current) != Ordering::Less
}

/// Comparable form of an updated-at value.
///
/// Numbers are epoch milliseconds, RFC 3339 strings are converted to
/// milliseconds, anything else compares lexically after all instants.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum TimestampKey {
    Missing,
    Millis(i64),
    Text(String),
}

impl TimestampKey {
    fn of(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => TimestampKey::Missing,
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .map_or(TimestampKey::Missing, TimestampKey::Millis),
            Some(Value::String(s)) => match DateTime::parse_from_rfc3339(s) {
                Ok(t) => TimestampKey::Millis(t.timestamp_millis()),
                Err(_) => s
                    .parse::<i64>()
                    .map_or_else(|_| TimestampKey::Text(s.clone()), TimestampKey::Millis),
            },
            Some(other) => TimestampKey::Text(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use fieldsync_common::catalog::{CATEGORY_DEFINITIONS, FIELD_DEFINITIONS, TOOLS};
    use fieldsync_common::SyncStatus;
    use fieldsync_store::MemoryStore;
    use serde_json::json;

    fn change(table: TableId, value: Value) -> DecodedChange {
        DecodedChange {
            table,
            record: value.as_object().cloned().unwrap(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_latest_version_wins() {
        let store = MemoryStore::new();
        let registry = TableRegistry::builtin();

        let changes = vec![
            change(TableId::Tools, json!({"id": "X", "name": "nine", "updated_at": 9})),
            change(TableId::Tools, json!({"id": "X", "name": "five", "updated_at": 5})),
        ];
        let report = ChangeApplier::new(&registry, &store)
            .apply(changes, now())
            .await
            .unwrap();

        assert_eq!(report.applied, 1);
        assert_eq!(report.superseded, 1);
        let row = store.get(&TOOLS, "X").unwrap().unwrap();
        assert_eq!(row["updated_at"], 9);
        assert_eq!(row["name"], "nine");
        assert_eq!(store.status_of(&TOOLS, "X").unwrap(), Some(SyncStatus::Synced));
    }

    #[tokio::test]
    async fn test_rfc3339_timestamps_compare_as_instants() {
        let store = MemoryStore::new();
        let registry = TableRegistry::builtin();

        let changes = vec![
            change(
                TableId::Tools,
                json!({"id": "X", "name": "later", "updated_at": "2024-01-01T10:00:00+02:00"}),
            ),
            change(
                TableId::Tools,
                json!({"id": "X", "name": "earlier", "updated_at": "2024-01-01T07:30:00Z"}),
            ),
        ];
        ChangeApplier::new(&registry, &store)
            .apply(changes, now())
            .await
            .unwrap();

        assert_eq!(store.get(&TOOLS, "X").unwrap().unwrap()["name"], "later");
    }

    #[tokio::test]
    async fn test_parents_applied_before_children() {
        let store = MemoryStore::new();
        let registry = TableRegistry::builtin();

        let changes = vec![
            change(
                TableId::FieldDefinitions,
                json!({"id": "F1", "category_id": "C1", "code": "P"}),
            ),
            change(TableId::CategoryDefinitions, json!({"id": "C1", "code": "PUMP"})),
        ];
        let report = ChangeApplier::new(&registry, &store)
            .apply(changes, now())
            .await
            .unwrap();

        assert_eq!(
            report.per_table,
            vec![(TableId::CategoryDefinitions, 1), (TableId::FieldDefinitions, 1)]
        );
        assert!(store.get(&CATEGORY_DEFINITIONS, "C1").unwrap().is_some());
        assert!(store.get(&FIELD_DEFINITIONS, "F1").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_applied_at_written_once_per_batch() {
        let store = MemoryStore::new();
        let registry = TableRegistry::builtin();
        let applier = ChangeApplier::new(&registry, &store);

        applier.apply(Vec::new(), now()).await.unwrap();
        assert_eq!(store.get_state("lastAppliedAt").await.unwrap(), None);

        applier
            .apply(vec![change(TableId::Tools, json!({"id": "X"}))], now())
            .await
            .unwrap();
        assert_eq!(
            SyncStateStore::new(&store).last_applied_at().await.unwrap(),
            Some(now())
        );
    }

    #[test]
    fn test_timestamp_ordering() {
        assert!(TimestampKey::of(None) < TimestampKey::of(Some(&json!(0))));
        assert!(TimestampKey::of(Some(&json!(5))) < TimestampKey::of(Some(&json!("9"))));
        assert_eq!(
            TimestampKey::of(Some(&json!("1970-01-01T00:00:01Z"))),
            TimestampKey::Millis(1000)
        );
    }
}
