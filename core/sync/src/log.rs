//! Append-only sync event log.

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{info, warn};

/// Network phase of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncPhase {
    Push,
    Pull,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncPhase::Push => write!(f, "push"),
            SyncPhase::Pull => write!(f, "pull"),
        }
    }
}

/// Result of a single network try.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The server answered with this status.
    Status(u16),
    /// No response: connection failure or timeout.
    Failed(String),
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptOutcome::Status(status) => write!(f, "HTTP {}", status),
            AttemptOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Something worth recording about a sync run.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// One network try.
    Attempt {
        phase: SyncPhase,
        attempt: u32,
        url: String,
        outcome: AttemptOutcome,
        duration: Duration,
    },
    /// A token refresh after a 401/403.
    TokenRefresh { succeeded: bool },
    /// A pulled change that could not be applied.
    ChangeSkipped { table: String, reason: String },
    /// The cursor was discarded because the sentinel row is missing.
    CursorReset { previous: i64 },
    /// End of a run.
    RunFinished {
        succeeded: bool,
        pushed: usize,
        pulled: usize,
        cursor: Option<i64>,
        error: Option<String>,
    },
}

/// Sink for sync events.
pub trait SyncLog: Send + Sync {
    fn append(&self, event: SyncEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSyncLog;

impl SyncLog for TracingSyncLog {
    fn append(&self, event: SyncEvent) {
        match event {
            SyncEvent::Attempt {
                phase,
                attempt,
                url,
                outcome,
                duration,
            } => match &outcome {
                AttemptOutcome::Status(status) if (200..300).contains(status) => {
                    info!(%phase, attempt, %url, %outcome, ?duration, "Sync request")
                }
                _ => warn!(%phase, attempt, %url, %outcome, ?duration, "Sync request"),
            },
            SyncEvent::TokenRefresh { succeeded: true } => info!("Access token refreshed"),
            SyncEvent::TokenRefresh { succeeded: false } => warn!("Access token refresh failed"),
            SyncEvent::ChangeSkipped { table, reason } => {
                warn!(%table, %reason, "Skipped pulled change")
            }
            SyncEvent::CursorReset { previous } => {
                warn!(previous, "Sentinel row missing, resetting pull cursor to 0")
            }
            SyncEvent::RunFinished {
                succeeded,
                pushed,
                pulled,
                cursor,
                error,
            } => {
                if succeeded {
                    info!(pushed, pulled, ?cursor, "Sync run finished");
                } else {
                    warn!(pushed, pulled, error = error.as_deref(), "Sync run failed");
                }
            }
        }
    }
}

/// Keeps events in memory for inspection.
#[derive(Debug, Default)]
pub struct MemorySyncLog {
    events: Mutex<Vec<SyncEvent>>,
}

impl MemorySyncLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events recorded so far.
    pub fn events(&self) -> Vec<SyncEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Attempts recorded for a phase, in order.
    pub fn attempts(&self, phase: SyncPhase) -> Vec<(u32, AttemptOutcome)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SyncEvent::Attempt {
                    phase: p,
                    attempt,
                    outcome,
                    ..
                } if p == phase => Some((attempt, outcome)),
                _ => None,
            })
            .collect()
    }
}

impl SyncLog for MemorySyncLog {
    fn append(&self, event: SyncEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_log_filters_attempts() {
        let log = MemorySyncLog::new();
        log.append(SyncEvent::Attempt {
            phase: SyncPhase::Push,
            attempt: 1,
            url: "http://x/sync/push".into(),
            outcome: AttemptOutcome::Status(503),
            duration: Duration::from_millis(5),
        });
        log.append(SyncEvent::TokenRefresh { succeeded: true });
        log.append(SyncEvent::Attempt {
            phase: SyncPhase::Pull,
            attempt: 1,
            url: "http://x/sync/pull?since=0".into(),
            outcome: AttemptOutcome::Status(200),
            duration: Duration::from_millis(5),
        });

        assert_eq!(log.events().len(), 3);
        assert_eq!(
            log.attempts(SyncPhase::Push),
            vec![(1, AttemptOutcome::Status(503))]
        );
        assert_eq!(log.attempts(SyncPhase::Pull).len(), 1);
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(AttemptOutcome::Status(404).to_string(), "HTTP 404");
        assert_eq!(
            AttemptOutcome::Failed("timed out".into()).to_string(),
            "failed: timed out"
        );
    }
}
