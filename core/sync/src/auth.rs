//! Session management and OAuth2 token refresh.

use async_trait::async_trait;
use oauth2::{basic::BasicClient, ClientId, ClientSecret, RefreshToken, TokenResponse, TokenUrl};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use fieldsync_common::{Error, Result};

use crate::config::OAuthConfig;

/// Credentials for the sync server.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Bearer token sent with every request.
    pub access_token: String,
    /// Token used to obtain a new access token.
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl Session {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Source of the current session.
#[async_trait]
pub trait AuthSessionProvider: Send + Sync {
    /// Current session, if signed in.
    async fn session(&self) -> Option<Session>;

    /// Exchange `refresh_token` for a new access token and keep it.
    ///
    /// # Postconditions
    /// - On success, [`session`](Self::session) returns the new access token
    ///
    /// # Errors
    /// - Refresh not supported, or the token endpoint refused the grant
    async fn refresh(&self, refresh_token: &str) -> Result<String>;

    /// Forget the session.
    async fn clear_session(&self);
}

/// JSON file holding a persisted session.
#[derive(Debug, Clone)]
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the session; `None` if the file does not exist.
    pub async fn load(&self) -> Result<Option<Session>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| Error::Serialization(format!("{}: {}", self.path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, session: &Session) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_vec_pretty(session)?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }

    /// Delete the file; a missing file is not an error.
    pub async fn remove(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Fixed session without refresh capability.
#[derive(Debug, Default)]
pub struct StaticSessionProvider {
    session: RwLock<Option<Session>>,
}

impl StaticSessionProvider {
    pub fn new(session: Option<Session>) -> Self {
        Self {
            session: RwLock::new(session),
        }
    }
}

#[async_trait]
impl AuthSessionProvider for StaticSessionProvider {
    async fn session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<String> {
        Err(Error::Config("no token endpoint configured".to_string()))
    }

    async fn clear_session(&self) {
        *self.session.write().await = None;
    }
}

/// Session provider refreshing through an OAuth2 token endpoint.
pub struct OAuthSessionProvider {
    config: OAuthConfig,
    http: oauth2::reqwest::Client,
    session: RwLock<Option<Session>>,
    file: Option<SessionFile>,
}

impl OAuthSessionProvider {
    /// Create a provider holding `session` in memory only.
    ///
    /// # Errors
    /// - The token URL is invalid
    /// - The HTTP client cannot be built
    pub fn new(config: OAuthConfig, session: Option<Session>) -> Result<Self> {
        TokenUrl::new(config.token_url.clone())
            .map_err(|e| Error::Config(format!("Invalid token URL: {}", e)))?;

        // Following redirects would leak the refresh token.
        let http = oauth2::reqwest::ClientBuilder::new()
            .redirect(oauth2::reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http,
            session: RwLock::new(session),
            file: None,
        })
    }

    /// Create a provider backed by a session file, loading it if present.
    pub async fn with_file(config: OAuthConfig, file: SessionFile) -> Result<Self> {
        let session = file.load().await?;
        let mut provider = Self::new(config, session)?;
        provider.file = Some(file);
        Ok(provider)
    }

    /// Replace the session, persisting it when file-backed.
    pub async fn set_session(&self, session: Session) -> Result<()> {
        if let Some(file) = &self.file {
            file.save(&session).await?;
        }
        *self.session.write().await = Some(session);
        Ok(())
    }

    /// Run the refresh-token grant.
    ///
    /// Returns the new session. The old refresh token is kept when the
    /// server does not rotate it.
    async fn exchange(&self, refresh_token: &str) -> Result<Session> {
        let token_url = TokenUrl::new(self.config.token_url.clone())
            .map_err(|e| Error::Config(format!("Invalid token URL: {}", e)))?;
        let mut client =
            BasicClient::new(ClientId::new(self.config.client_id.clone())).set_token_uri(token_url);
        if let Some(secret) = &self.config.client_secret {
            client = client.set_client_secret(ClientSecret::new(secret.clone()));
        }

        let token_result = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| Error::Rejected(format!("Token refresh failed: {}", e)))?;

        let refresh_token = token_result
            .refresh_token()
            .map(|t| t.secret().clone())
            .unwrap_or_else(|| refresh_token.to_string());

        Ok(Session {
            access_token: token_result.access_token().secret().clone(),
            refresh_token: Some(refresh_token),
        })
    }
}

#[async_trait]
impl AuthSessionProvider for OAuthSessionProvider {
    async fn session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    async fn refresh(&self, refresh_token: &str) -> Result<String> {
        info!("Refreshing access token");
        let session = self.exchange(refresh_token).await?;
        let access_token = session.access_token.clone();

        if let Some(file) = &self.file {
            if let Err(e) = file.save(&session).await {
                warn!("Failed to persist refreshed session: {}", e);
            }
        }
        *self.session.write().await = Some(session);
        Ok(access_token)
    }

    async fn clear_session(&self) {
        *self.session.write().await = None;
        if let Some(file) = &self.file {
            match file.remove().await {
                Ok(()) => debug!("Removed session file {}", file.path().display()),
                Err(e) => warn!("Failed to remove session file: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn oauth_config(server: &MockServer) -> OAuthConfig {
        OAuthConfig {
            token_url: format!("{}/oauth/token", server.uri()),
            client_id: "field-app".to_string(),
            client_secret: None,
        }
    }

    #[test]
    fn test_session_debug_redacts_tokens() {
        let session = Session::new("secret-access", Some("secret-refresh".into()));
        let printed = format!("{:?}", session);
        assert!(!printed.contains("secret"));
    }

    #[tokio::test]
    async fn test_static_provider_cannot_refresh() {
        let provider = StaticSessionProvider::new(Some(Session::new("a", None)));
        assert!(provider.refresh("r").await.is_err());
        provider.clear_session().await;
        assert!(provider.session().await.is_none());
    }

    #[tokio::test]
    async fn test_refresh_keeps_unrotated_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "fresh",
                "token_type": "bearer",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OAuthSessionProvider::new(
            oauth_config(&server),
            Some(Session::new("stale", Some("refresh-1".into()))),
        )
        .unwrap();

        let token = provider.refresh("refresh-1").await.unwrap();
        assert_eq!(token, "fresh");
        assert_eq!(
            provider.session().await,
            Some(Session::new("fresh", Some("refresh-1".into())))
        );
    }

    #[tokio::test]
    async fn test_refresh_failure_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant"
            })))
            .mount(&server)
            .await;

        let provider = OAuthSessionProvider::new(
            oauth_config(&server),
            Some(Session::new("stale", Some("revoked".into()))),
        )
        .unwrap();

        assert!(matches!(provider.refresh("revoked").await, Err(Error::Rejected(_))));
        assert_eq!(provider.session().await.unwrap().access_token, "stale");
    }

    #[tokio::test]
    async fn test_file_backed_session_lifecycle() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let file = SessionFile::new(dir.path().join("session.json"));

        let provider = OAuthSessionProvider::with_file(oauth_config(&server), file.clone())
            .await
            .unwrap();
        assert!(provider.session().await.is_none());

        provider
            .set_session(Session::new("a1", Some("r1".into())))
            .await
            .unwrap();
        assert_eq!(file.load().await.unwrap().unwrap().access_token, "a1");

        let reloaded = OAuthSessionProvider::with_file(oauth_config(&server), file.clone())
            .await
            .unwrap();
        assert_eq!(reloaded.session().await.unwrap().access_token, "a1");

        reloaded.clear_session().await;
        assert!(reloaded.session().await.is_none());
        assert!(!file.path().exists());
    }
}
