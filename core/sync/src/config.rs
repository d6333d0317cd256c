//! Sync engine configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use fieldsync_common::{Error, Result, TableId};

use crate::retry::BackoffPolicy;

/// Configuration for the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Server base URL; `/sync/push` and `/sync/pull` are appended.
    pub base_url: String,
    /// Fixed client identifier. Generated and persisted when absent.
    pub client_id: Option<String>,
    /// Maximum rows across all tables in one push.
    pub global_cap: usize,
    /// Ids per status-update statement after a successful push.
    pub status_chunk_size: usize,
    /// Per-table push caps overriding the catalog defaults.
    pub table_caps: HashMap<TableId, usize>,
    /// Reference row every fully-synced client is expected to hold.
    pub sentinel: Option<SentinelRecord>,
    /// HTTP transport settings.
    pub transport: TransportConfig,
    /// Token endpoint used to refresh expired sessions.
    pub oauth: Option<OAuthConfig>,
}

impl SyncConfig {
    /// Create a configuration for a server with defaults elsewhere.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Check the configuration for values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.base_url)
            .map_err(|e| Error::Config(format!("Invalid base_url '{}': {}", self.base_url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "base_url must be http(s), got '{}'",
                url.scheme()
            )));
        }
        if self.global_cap == 0 {
            return Err(Error::Config("global_cap must be positive".to_string()));
        }
        if self.status_chunk_size == 0 {
            return Err(Error::Config("status_chunk_size must be positive".to_string()));
        }
        if let Some((table, _)) = self.table_caps.iter().find(|(_, cap)| **cap == 0) {
            return Err(Error::Config(format!("cap for {} must be positive", table)));
        }
        if self.transport.attempts == 0 {
            return Err(Error::Config("transport.attempts must be positive".to_string()));
        }
        if let Some(sentinel) = &self.sentinel {
            if sentinel.id.is_empty() {
                return Err(Error::Config("sentinel.id cannot be empty".to_string()));
            }
        }
        Ok(())
    }

    /// Push endpoint.
    pub fn push_url(&self) -> String {
        format!("{}/sync/push", self.base_url.trim_end_matches('/'))
    }

    /// Pull endpoint for a cursor.
    pub fn pull_url(&self, since: i64) -> String {
        format!(
            "{}/sync/pull?since={}",
            self.base_url.trim_end_matches('/'),
            since
        )
    }

    /// Serialize configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            client_id: None,
            global_cap: 1200,
            status_chunk_size: 400,
            table_caps: HashMap::new(),
            sentinel: None,
            transport: TransportConfig::default(),
            oauth: None,
        }
    }
}

/// A well-known row whose absence means the cursor cannot be trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentinelRecord {
    pub table: TableId,
    pub id: String,
}

/// HTTP transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Tries per logical call.
    pub attempts: u32,
    /// Waits between tries, in milliseconds.
    pub backoff_ms: Vec<u64>,
    /// Per-try timeout for push.
    pub push_timeout_ms: u64,
    /// Per-try timeout for pull.
    pub pull_timeout_ms: u64,
    /// User agent sent with every request.
    pub user_agent: String,
}

impl TransportConfig {
    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_millis(self.pull_timeout_ms)
    }

    /// Retry policy derived from `attempts` and `backoff_ms`.
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            self.attempts,
            self.backoff_ms.iter().map(|ms| Duration::from_millis(*ms)).collect(),
        )
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_ms: vec![1000, 3000],
            push_timeout_ms: 120_000,
            pull_timeout_ms: 30_000,
            user_agent: concat!("FieldSync/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// OAuth2 refresh-token grant settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    pub token_url: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
}
