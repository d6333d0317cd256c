//! Retry strategy with a fixed backoff schedule for transient errors.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use fieldsync_common::{Error, Result};

/// Ordered backoff schedule.
///
/// `delays[i]` is waited after failed try `i + 1`. When there are more tries
/// than delays the last delay repeats. Nothing is waited after the final try.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    attempts: u32,
    delays: Vec<Duration>,
}

impl BackoffPolicy {
    /// Create a policy. `attempts` is clamped to at least one.
    pub fn new(attempts: u32, delays: Vec<Duration>) -> Self {
        Self {
            attempts: attempts.max(1),
            delays,
        }
    }

    /// A policy that retries without waiting.
    pub fn immediate(attempts: u32) -> Self {
        Self::new(attempts, Vec::new())
    }

    /// Total tries, including the first.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay to wait after failed try `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if attempt == 0 || attempt >= self.attempts {
            return Duration::ZERO;
        }
        let index = (attempt - 1) as usize;
        self.delays
            .get(index)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(3, vec![Duration::from_secs(1), Duration::from_secs(3)])
    }
}

/// Retry executor for running operations with retry logic.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: BackoffPolicy,
}

impl RetryExecutor {
    /// Create a new retry executor.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy }
    }

    /// Execute an operation, retrying errors for which
    /// [`Error::is_retryable`] holds.
    ///
    /// The operation receives the 1-based try number.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with_condition(operation, Error::is_retryable)
            .await
    }

    /// Execute with a custom retry condition.
    pub async fn execute_with_condition<F, Fut, T, C>(
        &self,
        operation: F,
        should_retry: C,
    ) -> Result<T>
    where
        F: Fn(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
        C: Fn(&Error) -> bool,
    {
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!("Operation succeeded on attempt {}", attempt);
                    }
                    return Ok(result);
                }
                Err(err) => {
                    if !should_retry(&err) {
                        return Err(err);
                    }

                    if attempt >= self.policy.attempts() {
                        warn!("Operation failed after {} attempts: {}", attempt, err);
                        return Err(err);
                    }

                    let delay = self.policy.delay_after(attempt);
                    warn!(
                        "Attempt {} failed: {}. Retrying in {:?}...",
                        attempt, err, delay
                    );

                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
