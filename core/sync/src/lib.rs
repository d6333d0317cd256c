//! FieldSync sync engine
//!
//! This module provides bidirectional synchronization between a local
//! store and a sync server, including:
//! - Capped collection of pending rows for push
//! - HTTP transport with retry, backoff, timeouts and token refresh
//! - Natural-key reconciliation of server and local IDs
//! - Deduplicated application of pulled changes
//! - Cursor persistence with sentinel-based self-healing

pub mod applier;
pub mod auth;
pub mod clock;
pub mod codec;
pub mod collector;
pub mod config;
pub mod engine;
pub mod log;
pub mod protocol;
pub mod registry;
pub mod remap;
pub mod retry;
pub mod state;
pub mod transport;

// Re-export main types
pub use applier::{ApplyReport, ChangeApplier};
pub use auth::{AuthSessionProvider, OAuthSessionProvider, Session, SessionFile, StaticSessionProvider};
pub use clock::{Clock, FixedClock, SystemClock};
pub use collector::{ChangeCollector, CollectedChanges};
pub use config::{OAuthConfig, SentinelRecord, SyncConfig, TransportConfig};
pub use engine::{SyncEngine, SyncEngineBuilder, SyncOutcome, SyncReport, SyncStage};
pub use log::{AttemptOutcome, MemorySyncLog, SyncEvent, SyncLog, SyncPhase, TracingSyncLog};
pub use protocol::{ChangePacket, PullChange, PullResponse, PushRequest, PushResponse, WireRecord};
pub use registry::{MappedTable, TableHandler, TableRegistry};
pub use remap::{DecodedChange, IdRemap, IdRemapper};
pub use retry::{BackoffPolicy, RetryExecutor};
pub use state::{SyncStateSnapshot, SyncStateStore};
pub use transport::SyncTransport;
