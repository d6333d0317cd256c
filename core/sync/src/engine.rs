//! Sync engine that orchestrates one push/pull run.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use fieldsync_common::{Error, Result, SyncStatus, TableSpec};
use fieldsync_store::LocalStore;

use crate::applier::ChangeApplier;
use crate::auth::AuthSessionProvider;
use crate::clock::{Clock, SystemClock};
use crate::collector::ChangeCollector;
use crate::config::SyncConfig;
use crate::log::{SyncEvent, SyncLog, TracingSyncLog};
use crate::protocol::{PullChange, PushRequest};
use crate::registry::TableRegistry;
use crate::remap::{DecodedChange, IdRemapper};
use crate::state::SyncStateStore;
use crate::transport::SyncTransport;

/// Step of a run at which it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    Precondition,
    Push,
    MarkSynced,
    ReadCursor,
    Pull,
    Apply,
    AdvanceCursor,
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncStage::Precondition => "precondition",
            SyncStage::Push => "push",
            SyncStage::MarkSynced => "mark-synced",
            SyncStage::ReadCursor => "read-cursor",
            SyncStage::Pull => "pull",
            SyncStage::Apply => "apply",
            SyncStage::AdvanceCursor => "advance-cursor",
        };
        f.write_str(name)
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    /// Rows accepted by the server and flagged synced.
    pub pushed: usize,
    /// Changes received from the server.
    pub pulled: usize,
    /// Rows written locally after deduplication.
    pub applied: usize,
    /// Changes skipped because they could not be decoded.
    pub skipped: usize,
    /// Cursor persisted at the end of the run.
    pub cursor: i64,
    /// Whether the stored cursor was discarded before pulling.
    pub self_healed: bool,
    pub duration: Duration,
}

/// Result of [`SyncEngine::run_sync`].
#[derive(Debug)]
pub enum SyncOutcome {
    Completed(SyncReport),
    Failed {
        stage: SyncStage,
        error: Error,
        /// Rows already pushed and flagged synced before the failure.
        pushed: usize,
    },
}

impl SyncOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, SyncOutcome::Completed(_))
    }

    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncOutcome::Completed(report) => Some(report),
            SyncOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            SyncOutcome::Completed(_) => None,
            SyncOutcome::Failed { error, .. } => Some(error),
        }
    }
}

#[derive(Debug, Default)]
struct Progress {
    pushed: usize,
    pulled: usize,
    applied: usize,
    skipped: usize,
    cursor: i64,
    self_healed: bool,
}

type StageResult<T> = std::result::Result<T, (SyncStage, Error)>;

fn at(stage: SyncStage) -> impl FnOnce(Error) -> (SyncStage, Error) {
    move |error| (stage, error)
}

/// Builder for [`SyncEngine`].
pub struct SyncEngineBuilder {
    config: SyncConfig,
    store: Arc<dyn LocalStore>,
    auth: Arc<dyn AuthSessionProvider>,
    registry: Option<TableRegistry>,
    log: Arc<dyn SyncLog>,
    clock: Arc<dyn Clock>,
}

impl SyncEngineBuilder {
    /// Use a custom table registry instead of the built-in catalog.
    pub fn registry(mut self, registry: TableRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn log(mut self, log: Arc<dyn SyncLog>) -> Self {
        self.log = log;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build the engine.
    ///
    /// # Errors
    /// - The configuration is invalid
    /// - A configured cap or the sentinel names an unregistered table
    pub fn build(self) -> Result<SyncEngine> {
        self.config.validate()?;

        let mut registry = self.registry.unwrap_or_else(TableRegistry::builtin);
        registry.apply_caps(&self.config.table_caps)?;
        if let Some(sentinel) = &self.config.sentinel {
            if registry.get(sentinel.table).is_none() {
                return Err(Error::Config(format!(
                    "sentinel table '{}' is not registered",
                    sentinel.table
                )));
            }
        }

        let transport = SyncTransport::new(self.config.clone(), self.auth.clone(), self.log.clone())?;

        Ok(SyncEngine {
            config: self.config,
            registry,
            store: self.store,
            auth: self.auth,
            transport,
            log: self.log,
            clock: self.clock,
        })
    }
}

/// Runs sync cycles against one server and one local store.
pub struct SyncEngine {
    config: SyncConfig,
    registry: TableRegistry,
    store: Arc<dyn LocalStore>,
    auth: Arc<dyn AuthSessionProvider>,
    transport: SyncTransport,
    log: Arc<dyn SyncLog>,
    clock: Arc<dyn Clock>,
}

impl SyncEngine {
    /// Start building an engine with the built-in catalog, `tracing`
    /// logging and the system clock.
    pub fn builder(
        config: SyncConfig,
        store: Arc<dyn LocalStore>,
        auth: Arc<dyn AuthSessionProvider>,
    ) -> SyncEngineBuilder {
        SyncEngineBuilder {
            config,
            store,
            auth,
            registry: None,
            log: Arc::new(TracingSyncLog),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn registry(&self) -> &TableRegistry {
        &self.registry
    }

    pub fn store(&self) -> &dyn LocalStore {
        self.store.as_ref()
    }

    /// Typed view of the persisted sync state.
    pub fn state(&self) -> SyncStateStore<'_> {
        SyncStateStore::new(self.store.as_ref())
    }

    /// Run one full cycle: push pending rows, then pull and apply.
    ///
    /// Never panics on remote or local failures; the outcome carries the
    /// failing stage. A failed push stops the run before the pull. An auth
    /// failure that survived the transport's refresh clears the session.
    pub async fn run_sync(&self) -> SyncOutcome {
        let started = Instant::now();
        let mut progress = Progress::default();
        info!("Starting sync");

        let outcome = match self.run_stages(&mut progress).await {
            Ok(()) => {
                let report = SyncReport {
                    pushed: progress.pushed,
                    pulled: progress.pulled,
                    applied: progress.applied,
                    skipped: progress.skipped,
                    cursor: progress.cursor,
                    self_healed: progress.self_healed,
                    duration: started.elapsed(),
                };
                info!(
                    "Sync completed in {:?}: {} pushed, {} pulled, {} applied, {} skipped",
                    report.duration, report.pushed, report.pulled, report.applied, report.skipped
                );
                SyncOutcome::Completed(report)
            }
            Err((stage, error)) => {
                warn!("Sync failed during {}: {}", stage, error);
                if error.is_auth() {
                    self.auth.clear_session().await;
                }
                SyncOutcome::Failed {
                    stage,
                    error,
                    pushed: progress.pushed,
                }
            }
        };

        self.log.append(SyncEvent::RunFinished {
            succeeded: outcome.is_ok(),
            pushed: progress.pushed,
            pulled: progress.pulled,
            cursor: outcome.report().map(|r| r.cursor),
            error: outcome.error().map(|e| e.to_string()),
        });
        outcome
    }

    async fn run_stages(&self, progress: &mut Progress) -> StageResult<()> {
        if self.auth.session().await.is_none() {
            return Err((SyncStage::Precondition, Error::AuthRequired));
        }

        progress.pushed = self.push_pending().await?;

        let state = self.state();
        let stored = state.cursor().await.map_err(at(SyncStage::ReadCursor))?;
        let (since, self_healed) = state
            .self_heal(stored, self.sentinel())
            .await
            .map_err(at(SyncStage::ReadCursor))?;
        if self_healed {
            self.log.append(SyncEvent::CursorReset { previous: stored });
        }
        progress.self_healed = self_healed;

        let response = self
            .transport
            .pull(since)
            .await
            .map_err(at(SyncStage::Pull))?;
        progress.pulled = response.changes.len();
        debug!(since, changes = progress.pulled, "Pulled changes");

        let mut decoded = self.decode(&response.changes);
        progress.skipped = progress.pulled - decoded.len();

        IdRemapper::new(&self.registry, self.store.as_ref())
            .remap(&mut decoded)
            .await
            .map_err(at(SyncStage::Apply))?;
        let applied = ChangeApplier::new(&self.registry, self.store.as_ref())
            .apply(decoded, self.clock.now())
            .await
            .map_err(at(SyncStage::Apply))?;
        progress.applied = applied.applied;

        if response.server_cursor < since {
            warn!(
                since,
                server_cursor = response.server_cursor,
                "Server cursor moved backwards"
            );
        }
        state
            .record_pull(response.server_cursor, self.clock.now())
            .await
            .map_err(at(SyncStage::AdvanceCursor))?;
        progress.cursor = response.server_cursor;

        Ok(())
    }

    /// Push pending rows and flag them synced. Returns rows pushed.
    async fn push_pending(&self) -> StageResult<usize> {
        let collected = ChangeCollector::new(&self.registry, self.store.as_ref(), self.config.global_cap)
            .collect()
            .await
            .map_err(at(SyncStage::Push))?;
        if collected.is_empty() {
            debug!("Nothing to push");
            return Ok(0);
        }

        let client_id = self
            .state()
            .client_id(self.config.client_id.as_deref())
            .await
            .map_err(at(SyncStage::Push))?;
        let request = PushRequest {
            client_id,
            upserts: collected.packets,
        };
        let rows = request.row_count();
        let response = self
            .transport
            .push(&request)
            .await
            .map_err(at(SyncStage::Push))?;
        debug!(rows, applied = ?response.applied, "Push acknowledged");

        for (table, ids) in &collected.submitted {
            let Some(spec) = self.registry.spec(*table) else {
                continue;
            };
            self.store
                .update_status_chunked(spec, ids, SyncStatus::Synced, self.config.status_chunk_size)
                .await
                .map_err(at(SyncStage::MarkSynced))?;
        }
        Ok(rows)
    }

    /// Decode pulled changes, skipping and logging the ones that fail.
    fn decode(&self, changes: &[PullChange]) -> Vec<DecodedChange> {
        let mut decoded = Vec::with_capacity(changes.len());
        for change in changes {
            match self.decode_one(change) {
                Ok(item) => decoded.push(item),
                Err(e) => self.log.append(SyncEvent::ChangeSkipped {
                    table: change.table.clone(),
                    reason: e.to_string(),
                }),
            }
        }
        decoded
    }

    fn decode_one(&self, change: &PullChange) -> Result<DecodedChange> {
        let handler = self
            .registry
            .get_by_name(&change.table)
            .ok_or_else(|| Error::NotFound(format!("unknown table '{}'", change.table)))?;
        let wire = change.decode()?;
        Ok(DecodedChange {
            table: handler.spec().id,
            record: handler.from_wire(&wire)?,
        })
    }

    fn sentinel(&self) -> Option<(&TableSpec, &str)> {
        let sentinel = self.config.sentinel.as_ref()?;
        let spec = self.registry.spec(sentinel.table)?;
        Some((spec, sentinel.id.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Session, StaticSessionProvider};
    use crate::log::MemorySyncLog;
    use fieldsync_store::MemoryStore;

    #[tokio::test]
    async fn test_no_session_fails_without_network() {
        let log = Arc::new(MemorySyncLog::new());
        // Nothing listens on this port; reaching it would yield a network error.
        let engine = SyncEngine::builder(
            SyncConfig::new("http://127.0.0.1:9"),
            Arc::new(MemoryStore::new()),
            Arc::new(StaticSessionProvider::new(None)),
        )
        .log(log.clone())
        .build()
        .unwrap();

        let outcome = engine.run_sync().await;

        match outcome {
            SyncOutcome::Failed { stage, error, pushed } => {
                assert_eq!(stage, SyncStage::Precondition);
                assert!(matches!(error, Error::AuthRequired));
                assert_eq!(pushed, 0);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(log.attempts(crate::log::SyncPhase::Push).is_empty());
        assert!(log.attempts(crate::log::SyncPhase::Pull).is_empty());
    }

    #[test]
    fn test_build_rejects_unknown_sentinel_table() {
        let mut config = SyncConfig::default();
        config.sentinel = Some(crate::config::SentinelRecord {
            table: fieldsync_common::TableId::Tools,
            id: "t".into(),
        });

        let registry = TableRegistry::new();
        let result = SyncEngine::builder(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(StaticSessionProvider::new(Some(Session::new("a", None)))),
        )
        .registry(registry)
        .build();

        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(SyncStage::MarkSynced.to_string(), "mark-synced");
        assert_eq!(SyncStage::AdvanceCursor.to_string(), "advance-cursor");
    }
}
