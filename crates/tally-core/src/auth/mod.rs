//! Access credential persistence and refresh.
//!
//! The stored credential is only ever touched through [`TokenStore`]'s
//! load/save/clear methods, and the expiry margin lives in
//! [`AccessToken::is_expired`].

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::{compact_text, is_http_url, non_empty_trimmed};

const EXPIRY_SKEW_SECONDS: i64 = 60;
const ERROR_PREVIEW_CHARS: usize = 180;

/// An OAuth access credential and its expiry (unix seconds).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_at: i64,
}

impl AccessToken {
    /// Whether the token is expired or about to expire within the safety margin.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now().timestamp() + EXPIRY_SKEW_SECONDS
    }

    #[must_use]
    pub fn can_refresh(&self) -> bool {
        self.refresh_token
            .as_deref()
            .is_some_and(|token| !token.trim().is_empty())
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AccessToken")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("No credential is configured for this workspace.")]
    NotConfigured,
    #[error("Credential was rejected: {0}")]
    Unauthorized(String),
    #[error("Invalid auth configuration: {0}")]
    InvalidConfiguration(String),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Failed to parse JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Auth API error: {0}")]
    Api(String),
    #[error("Token storage error: {0}")]
    Storage(String),
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Persistence for the single access credential of a workspace.
pub trait TokenStore: Clone + Send + Sync + 'static {
    fn load_token(&self) -> AuthResult<Option<AccessToken>>;
    fn save_token(&self, token: &AccessToken) -> AuthResult<()>;
    fn clear_token(&self) -> AuthResult<()>;
}

/// Process-local token store, mostly for tests and ephemeral sessions.
#[derive(Debug, Clone, Default)]
pub struct MemoryTokenStore {
    slot: Arc<Mutex<Option<AccessToken>>>,
}

impl MemoryTokenStore {
    #[must_use]
    pub fn with_token(token: AccessToken) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(token))),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load_token(&self) -> AuthResult<Option<AccessToken>> {
        let guard = self
            .slot
            .lock()
            .map_err(|error| AuthError::Storage(error.to_string()))?;
        Ok(guard.clone())
    }

    fn save_token(&self, token: &AccessToken) -> AuthResult<()> {
        let mut guard = self
            .slot
            .lock()
            .map_err(|error| AuthError::Storage(error.to_string()))?;
        *guard = Some(token.clone());
        Ok(())
    }

    fn clear_token(&self) -> AuthResult<()> {
        let mut guard = self
            .slot
            .lock()
            .map_err(|error| AuthError::Storage(error.to_string()))?;
        *guard = None;
        Ok(())
    }
}

/// JSON file token store.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TokenStore for FileTokenStore {
    fn load_token(&self) -> AuthResult<Option<AccessToken>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path).map_err(|error| {
            AuthError::Storage(format!("failed to read {}: {error}", self.path.display()))
        })?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn save_token(&self, token: &AccessToken) -> AuthResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                AuthError::Storage(format!("failed to create {}: {error}", parent.display()))
            })?;
        }
        let raw = serde_json::to_string(token)?;
        std::fs::write(&self.path, raw).map_err(|error| {
            AuthError::Storage(format!("failed to write {}: {error}", self.path.display()))
        })
    }

    fn clear_token(&self) -> AuthResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(AuthError::Storage(format!(
                "failed to remove {}: {error}",
                self.path.display()
            ))),
        }
    }
}

/// Source of valid access tokens for the sync engine.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Return a usable token, refreshing it if needed.
    async fn access_token(&self) -> AuthResult<AccessToken>;

    /// Drop the stored credential after the remote rejected it.
    fn invalidate(&self) -> AuthResult<()>;
}

/// OAuth refresh-token grant client.
#[derive(Clone)]
pub struct OAuthRefreshClient {
    token_endpoint: String,
    client_id: String,
    client_secret: Option<String>,
    client: Client,
}

impl OAuthRefreshClient {
    pub fn new(
        token_endpoint: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: Option<String>,
    ) -> AuthResult<Self> {
        let token_endpoint = non_empty_trimmed(Some(token_endpoint.into())).ok_or_else(|| {
            AuthError::InvalidConfiguration("token endpoint must not be empty".to_string())
        })?;
        if !is_http_url(&token_endpoint) {
            return Err(AuthError::InvalidConfiguration(
                "token endpoint must include http:// or https://".to_string(),
            ));
        }
        let client_id = non_empty_trimmed(Some(client_id.into())).ok_or_else(|| {
            AuthError::InvalidConfiguration("client id must not be empty".to_string())
        })?;

        Ok(Self {
            token_endpoint,
            client_id,
            client_secret: non_empty_trimmed(client_secret),
            client: Client::builder().build()?,
        })
    }

    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<AccessToken> {
        if refresh_token.trim().is_empty() {
            return Err(AuthError::InvalidConfiguration(
                "refresh token must not be empty".to_string(),
            ));
        }

        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
        ];
        if let Some(secret) = self.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        let response = self
            .client
            .post(&self.token_endpoint)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = parse_api_error(status, &body);
            if matches!(status, StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED) {
                return Err(AuthError::Unauthorized(message));
            }
            return Err(AuthError::Api(message));
        }

        let payload = response.json::<TokenResponse>().await?;
        payload.into_token(refresh_token)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    expires_at: Option<i64>,
}

impl TokenResponse {
    fn into_token(self, previous_refresh_token: &str) -> AuthResult<AccessToken> {
        let access_token = non_empty_trimmed(self.access_token).ok_or_else(|| {
            AuthError::Api("refresh response did not include access_token".to_string())
        })?;
        let expires_at = self
            .expires_at
            .or_else(|| {
                self.expires_in
                    .map(|expires_in| Utc::now().timestamp().saturating_add(expires_in))
            })
            .ok_or_else(|| {
                AuthError::Api("refresh response did not include expires_in".to_string())
            })?;
        let refresh_token = non_empty_trimmed(self.refresh_token)
            .or_else(|| Some(previous_refresh_token.to_string()));

        Ok(AccessToken {
            access_token,
            refresh_token,
            expires_at,
        })
    }
}

#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: Option<String>,
    error_description: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<OAuthErrorResponse>(body) {
        if let Some(message) = payload
            .error_description
            .or(payload.message)
            .or(payload.error)
        {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body, ERROR_PREVIEW_CHARS);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

/// Token provider backed by a [`TokenStore`] with optional silent refresh.
#[derive(Clone)]
pub struct TokenManager<S: TokenStore> {
    store: S,
    refresher: Option<OAuthRefreshClient>,
}

impl<S: TokenStore> TokenManager<S> {
    pub const fn new(store: S, refresher: Option<OAuthRefreshClient>) -> Self {
        Self { store, refresher }
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Replace the stored credential, e.g. after an interactive sign-in.
    pub fn set_token(&self, token: &AccessToken) -> AuthResult<()> {
        self.store.save_token(token)
    }

    /// Forget the stored credential.
    pub fn sign_out(&self) -> AuthResult<()> {
        self.store.clear_token()
    }
}

#[async_trait]
impl<S: TokenStore> TokenProvider for TokenManager<S> {
    async fn access_token(&self) -> AuthResult<AccessToken> {
        let Some(stored) = self.store.load_token()? else {
            return Err(AuthError::NotConfigured);
        };

        if !stored.is_expired() {
            return Ok(stored);
        }

        let (Some(refresher), Some(refresh_token)) =
            (self.refresher.as_ref(), stored.refresh_token.as_deref())
        else {
            return Err(AuthError::Unauthorized(
                "stored access token has expired".to_string(),
            ));
        };

        match refresher.refresh(refresh_token).await {
            Ok(refreshed) => {
                self.store.save_token(&refreshed)?;
                tracing::debug!("Refreshed access token");
                Ok(refreshed)
            }
            Err(AuthError::Unauthorized(message)) => {
                tracing::warn!("Refresh token was rejected: {}", message);
                self.store.clear_token()?;
                Err(AuthError::Unauthorized(message))
            }
            Err(error) => Err(error),
        }
    }

    fn invalidate(&self) -> AuthResult<()> {
        self.store.clear_token()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(expires_in: i64, refresh: Option<&str>) -> AccessToken {
        AccessToken {
            access_token: "secret-access".to_string(),
            refresh_token: refresh.map(ToString::to_string),
            expires_at: Utc::now().timestamp() + expires_in,
        }
    }

    #[test]
    fn token_debug_redacts_secrets() {
        let rendered = format!("{:?}", token(3600, Some("secret-refresh")));
        assert!(!rendered.contains("secret-access"));
        assert!(!rendered.contains("secret-refresh"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn expiry_includes_safety_margin() {
        assert!(token(30, None).is_expired());
        assert!(!token(3600, None).is_expired());
    }

    #[test]
    fn refresh_client_rejects_invalid_endpoint() {
        assert!(OAuthRefreshClient::new("", "client", None).is_err());
        assert!(OAuthRefreshClient::new("oauth.example.com/token", "client", None).is_err());
        assert!(OAuthRefreshClient::new("https://oauth.example.com/token", " ", None).is_err());
    }

    #[test]
    fn token_response_keeps_previous_refresh_token() {
        let response = TokenResponse {
            access_token: Some("new".to_string()),
            refresh_token: None,
            expires_in: Some(3600),
            expires_at: None,
        };
        let token = response.into_token("old-refresh").unwrap();
        assert_eq!(token.access_token, "new");
        assert_eq!(token.refresh_token.as_deref(), Some("old-refresh"));
        assert!(!token.is_expired());
    }

    #[test]
    fn parse_api_error_prefers_description() {
        let message = parse_api_error(
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_grant","error_description":"Token has been revoked."}"#,
        );
        assert_eq!(message, "Token has been revoked. (400)");
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, ""), "HTTP 502");
    }

    #[tokio::test]
    async fn manager_without_token_is_not_configured() {
        let manager = TokenManager::new(MemoryTokenStore::default(), None);
        assert!(matches!(
            manager.access_token().await,
            Err(AuthError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn manager_returns_valid_token_and_invalidates() {
        let manager = TokenManager::new(MemoryTokenStore::with_token(token(3600, None)), None);
        assert_eq!(
            manager.access_token().await.unwrap().access_token,
            "secret-access"
        );

        manager.invalidate().unwrap();
        assert!(manager.store().load_token().unwrap().is_none());
    }

    #[tokio::test]
    async fn manager_rejects_expired_token_without_refresher() {
        let manager = TokenManager::new(
            MemoryTokenStore::with_token(token(-10, Some("refresh"))),
            None,
        );
        assert!(matches!(
            manager.access_token().await,
            Err(AuthError::Unauthorized(_))
        ));
    }

    #[test]
    fn file_store_roundtrip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("nested").join("token.json"));

        assert!(store.load_token().unwrap().is_none());
        let saved = token(3600, Some("refresh"));
        store.save_token(&saved).unwrap();
        assert_eq!(store.load_token().unwrap(), Some(saved));

        store.clear_token().unwrap();
        assert!(store.load_token().unwrap().is_none());
        store.clear_token().unwrap();
    }
}
