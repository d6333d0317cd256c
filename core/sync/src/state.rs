//! Persistent sync state: pull cursor, timestamps and client identity.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use fieldsync_common::{Result, TableSpec};
use fieldsync_store::LocalStore;

/// Highest server sequence already pulled.
pub const LAST_PULLED_SERVER_SEQ: &str = "lastPulledServerSeq";
/// Time of the last completed pull.
pub const LAST_SYNC_AT: &str = "lastSyncAt";
/// Time a pulled batch was last applied.
pub const LAST_APPLIED_AT: &str = "lastAppliedAt";
/// Stable identifier of this client.
pub const CLIENT_ID: &str = "clientId";

/// Snapshot of the sync state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStateSnapshot {
    pub cursor: i64,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_applied_at: Option<DateTime<Utc>>,
    pub client_id: Option<String>,
}

/// Typed access to the sync-state key/value table.
pub struct SyncStateStore<'a> {
    store: &'a dyn LocalStore,
}

impl<'a> SyncStateStore<'a> {
    pub fn new(store: &'a dyn LocalStore) -> Self {
        Self { store }
    }

    /// Stored cursor; 0 when absent or unreadable.
    pub async fn cursor(&self) -> Result<i64> {
        let Some(raw) = self.store.get_state(LAST_PULLED_SERVER_SEQ).await? else {
            return Ok(0);
        };
        match raw.trim().parse::<i64>() {
            Ok(cursor) => Ok(cursor),
            Err(_) => {
                warn!("Unreadable cursor '{}', pulling from 0", raw);
                Ok(0)
            }
        }
    }

    pub async fn set_cursor(&self, cursor: i64) -> Result<()> {
        self.store
            .set_state(LAST_PULLED_SERVER_SEQ, &cursor.to_string())
            .await
    }

    /// Persist the cursor reported by a pull along with the pull time.
    pub async fn record_pull(&self, cursor: i64, at: DateTime<Utc>) -> Result<()> {
        self.set_cursor(cursor).await?;
        self.store.set_state(LAST_SYNC_AT, &at.to_rfc3339()).await
    }

    pub async fn mark_applied(&self, at: DateTime<Utc>) -> Result<()> {
        self.store.set_state(LAST_APPLIED_AT, &at.to_rfc3339()).await
    }

    pub async fn last_sync_at(&self) -> Result<Option<DateTime<Utc>>> {
        self.timestamp(LAST_SYNC_AT).await
    }

    pub async fn last_applied_at(&self) -> Result<Option<DateTime<Utc>>> {
        self.timestamp(LAST_APPLIED_AT).await
    }

    async fn timestamp(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .store
            .get_state(key)
            .await?
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|t| t.with_timezone(&Utc)))
    }

    /// Client identifier.
    ///
    /// A configured value wins. Otherwise the persisted one is used, and on
    /// first use a fresh one is generated and persisted.
    pub async fn client_id(&self, configured: Option<&str>) -> Result<String> {
        if let Some(id) = configured {
            return Ok(id.to_string());
        }
        if let Some(id) = self.store.get_state(CLIENT_ID).await? {
            return Ok(id);
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.store.set_state(CLIENT_ID, &id).await?;
        info!("Generated client id {}", id);
        Ok(id)
    }

    /// Cursor to pull from, discarding `stored` when the sentinel row is
    /// missing locally.
    ///
    /// Returns the effective cursor and whether it was reset. A reset is
    /// persisted so an interrupted run does not resume from the stale value.
    pub async fn self_heal(
        &self,
        stored: i64,
        sentinel: Option<(&TableSpec, &str)>,
    ) -> Result<(i64, bool)> {
        let Some((table, id)) = sentinel else {
            return Ok((stored, false));
        };
        if stored <= 0 || self.store.exists(table, id).await? {
            return Ok((stored, false));
        }

        warn!(
            table = %table.id,
            id,
            previous = stored,
            "Sentinel row missing, resetting pull cursor"
        );
        self.set_cursor(0).await?;
        Ok((0, true))
    }

    pub async fn snapshot(&self) -> Result<SyncStateSnapshot> {
        Ok(SyncStateSnapshot {
            cursor: self.cursor().await?,
            last_sync_at: self.last_sync_at().await?,
            last_applied_at: self.last_applied_at().await?,
            client_id: self.store.get_state(CLIENT_ID).await?,
        })
    }
}
