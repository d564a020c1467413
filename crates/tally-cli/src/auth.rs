//! CLI credential helpers with secure keychain persistence.

#[cfg(test)]
use std::collections::HashMap;
#[cfg(test)]
use std::sync::{Mutex, OnceLock};

use async_trait::async_trait;
#[cfg(not(test))]
use keyring::Entry;
use tally_core::auth::{
    AccessToken, AuthError, AuthResult, OAuthRefreshClient, TokenManager, TokenProvider,
    TokenStore,
};
use tally_core::remote::R2Config;

use crate::config_profiles::{BackendProfile, WorkspaceProfile};

#[cfg(not(test))]
const KEYRING_SERVICE_NAME: &str = "tally-cli";
const CLIENT_SECRET_ENV: &str = "TALLY_OAUTH_CLIENT_SECRET";

/// Access token persisted in the OS keychain, one entry per workspace.
#[derive(Clone)]
pub struct KeyringTokenStore {
    username: String,
}

impl KeyringTokenStore {
    pub fn new(workspace_name: &str) -> Self {
        Self {
            username: format!("access_token:{workspace_name}"),
        }
    }

    #[cfg(test)]
    fn test_store() -> &'static Mutex<HashMap<String, String>> {
        static STORE: OnceLock<Mutex<HashMap<String, String>>> = OnceLock::new();
        STORE.get_or_init(|| Mutex::new(HashMap::new()))
    }

    #[cfg(not(test))]
    fn entry(&self) -> AuthResult<Entry> {
        Entry::new(KEYRING_SERVICE_NAME, &self.username)
            .map_err(|error| AuthError::Storage(error.to_string()))
    }
}

impl TokenStore for KeyringTokenStore {
    #[cfg(not(test))]
    fn load_token(&self) -> AuthResult<Option<AccessToken>> {
        let entry = self.entry()?;
        match entry.get_password() {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(AuthError::Storage(error.to_string())),
        }
    }

    #[cfg(test)]
    fn load_token(&self) -> AuthResult<Option<AccessToken>> {
        let store = Self::test_store();
        let guard = store
            .lock()
            .map_err(|error| AuthError::Storage(error.to_string()))?;
        if let Some(raw) = guard.get(&self.username) {
            Ok(Some(serde_json::from_str(raw)?))
        } else {
            Ok(None)
        }
    }

    #[cfg(not(test))]
    fn save_token(&self, token: &AccessToken) -> AuthResult<()> {
        let raw = serde_json::to_string(token)?;
        self.entry()?
            .set_password(&raw)
            .map_err(|error| AuthError::Storage(error.to_string()))?;
        Ok(())
    }

    #[cfg(test)]
    fn save_token(&self, token: &AccessToken) -> AuthResult<()> {
        let raw = serde_json::to_string(token)?;
        let store = Self::test_store();
        let mut guard = store
            .lock()
            .map_err(|error| AuthError::Storage(error.to_string()))?;
        guard.insert(self.username.clone(), raw);
        Ok(())
    }

    #[cfg(not(test))]
    fn clear_token(&self) -> AuthResult<()> {
        let entry = self.entry()?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(AuthError::Storage(error.to_string())),
        }
    }

    #[cfg(test)]
    fn clear_token(&self) -> AuthResult<()> {
        let store = Self::test_store();
        let mut guard = store
            .lock()
            .map_err(|error| AuthError::Storage(error.to_string()))?;
        guard.remove(&self.username);
        Ok(())
    }
}

/// Keychain-backed token manager for a Drive workspace, refreshing through
/// the profile's OAuth endpoint when one is configured.
pub fn drive_token_manager(
    workspace_name: &str,
    profile: &WorkspaceProfile,
) -> AuthResult<TokenManager<KeyringTokenStore>> {
    let refresher = match &profile.backend {
        BackendProfile::Drive {
            token_endpoint: Some(endpoint),
            client_id: Some(client_id),
            ..
        } => Some(OAuthRefreshClient::new(
            endpoint.as_str(),
            client_id.as_str(),
            std::env::var(CLIENT_SECRET_ENV).ok(),
        )?),
        _ => None,
    };
    Ok(TokenManager::new(
        KeyringTokenStore::new(workspace_name),
        refresher,
    ))
}

/// Token provider for backends authenticated by static environment keys.
pub struct EnvCredentialProvider {
    config: R2Config,
}

impl EnvCredentialProvider {
    pub const fn new(config: R2Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TokenProvider for EnvCredentialProvider {
    async fn access_token(&self) -> AuthResult<AccessToken> {
        Ok(AccessToken {
            access_token: self.config.access_key_id.clone(),
            refresh_token: None,
            expires_at: i64::MAX,
        })
    }

    /// Keys live in the environment; there is nothing to clear.
    fn invalidate(&self) -> AuthResult<()> {
        tracing::warn!(
            "R2 credentials for bucket {} were rejected; update the R2_* environment variables",
            self.config.bucket
        );
        Ok(())
    }
}
