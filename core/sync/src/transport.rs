//! HTTP transport for the push and pull endpoints.

use reqwest::{header, Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use fieldsync_common::{Error, Result};

use crate::auth::AuthSessionProvider;
use crate::config::SyncConfig;
use crate::log::{AttemptOutcome, SyncEvent, SyncLog, SyncPhase};
use crate::protocol::{PullResponse, PushRequest, PushResponse};
use crate::retry::RetryExecutor;

/// Sync server client.
///
/// Every logical call gets the configured number of tries with the
/// configured backoff and a per-try timeout. A 401/403 is not retried;
/// instead the session is refreshed once and the call gets one more
/// budget of tries.
pub struct SyncTransport {
    http: Client,
    config: SyncConfig,
    retry: RetryExecutor,
    auth: Arc<dyn AuthSessionProvider>,
    log: Arc<dyn SyncLog>,
}

impl SyncTransport {
    /// Create a new transport.
    ///
    /// # Errors
    /// - The HTTP client cannot be built
    pub fn new(
        config: SyncConfig,
        auth: Arc<dyn AuthSessionProvider>,
        log: Arc<dyn SyncLog>,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent(config.transport.user_agent.clone())
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            retry: RetryExecutor::new(config.transport.backoff_policy()),
            config,
            auth,
            log,
        })
    }

    /// `POST /sync/push`.
    ///
    /// # Errors
    /// - Transport failure after retries
    /// - `ok: false` in the response
    pub async fn push(&self, request: &PushRequest) -> Result<PushResponse> {
        let body = serde_json::to_vec(request)?;
        let url = self.config.push_url();
        let response: PushResponse = self
            .execute(
                SyncPhase::Push,
                Method::POST,
                &url,
                Some(body),
                self.config.transport.push_timeout(),
            )
            .await?;

        if !response.ok {
            return Err(Error::Rejected("push not acknowledged".to_string()));
        }
        Ok(response)
    }

    /// `GET /sync/pull?since={since}`.
    pub async fn pull(&self, since: i64) -> Result<PullResponse> {
        let url = self.config.pull_url(since);
        self.execute(
            SyncPhase::Pull,
            Method::GET,
            &url,
            None,
            self.config.transport.pull_timeout(),
        )
        .await
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        phase: SyncPhase,
        method: Method,
        url: &str,
        body: Option<Vec<u8>>,
        timeout: Duration,
    ) -> Result<T> {
        let run = || {
            self.retry.execute(|attempt| {
                self.send_once(phase, attempt, method.clone(), url, body.as_deref(), timeout)
            })
        };

        let text = match run().await {
            Err(err) if err.is_auth() => {
                let Some(refresh_token) = self.auth.session().await.and_then(|s| s.refresh_token)
                else {
                    return Err(err);
                };

                match self.auth.refresh(&refresh_token).await {
                    Ok(_) => {
                        self.log.append(SyncEvent::TokenRefresh { succeeded: true });
                        run().await?
                    }
                    Err(refresh_err) => {
                        warn!("Token refresh failed: {}", refresh_err);
                        self.log.append(SyncEvent::TokenRefresh { succeeded: false });
                        self.auth.clear_session().await;
                        return Err(err);
                    }
                }
            }
            other => other?,
        };

        serde_json::from_str(&text)
            .map_err(|e| Error::Serialization(format!("Invalid {} response: {}", phase, e)))
    }

    /// One try: send, read the body, classify, log.
    async fn send_once(
        &self,
        phase: SyncPhase,
        attempt: u32,
        method: Method,
        url: &str,
        body: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<String> {
        let started = Instant::now();

        let mut request = self.http.request(method, url);
        if let Some(session) = self.auth.session().await {
            request = request.bearer_auth(session.access_token);
        }
        if let Some(body) = body {
            request = request
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.to_vec());
        }

        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, text))
        };

        let (result, outcome) = match tokio::time::timeout(timeout, exchange).await {
            Err(_) => {
                let reason = format!("timed out after {:?}", timeout);
                (Err(Error::Network(reason.clone())), AttemptOutcome::Failed(reason))
            }
            Ok(Err(e)) => (
                Err(Error::Network(e.to_string())),
                AttemptOutcome::Failed(e.to_string()),
            ),
            Ok(Ok((status, text))) => (classify(status, text), AttemptOutcome::Status(status.as_u16())),
        };

        let duration = started.elapsed();
        debug!(%phase, attempt, ?duration, "Request finished: {}", outcome);
        self.log.append(SyncEvent::Attempt {
            phase,
            attempt,
            url: url.to_string(),
            outcome,
            duration,
        });
        result
    }
}

fn classify(status: StatusCode, text: String) -> Result<String> {
    if status.is_success() {
        Ok(text)
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Err(Error::auth(status.as_u16(), &text))
    } else {
        Err(Error::http(status.as_u16(), &text))
    }
}
