//! Credential persistence.
//!
//! The credential is the only state kept outside process memory. It lives as JSON in a single
//! well-known file (see [`crate::config::get_credentials_path`]).

use super::{AuthError, Credential, CredentialProvider};
use reqwest::Client;
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

/// JSON file holding the current [`Credential`].
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored credential; a missing file is `Ok(None)`.
    pub async fn load(&self) -> Result<Option<Credential>, AuthError> {
        let buf = match fs::read(&self.path).await {
            Ok(buf) => buf,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&buf)
            .map(Some)
            .map_err(|e| AuthError::Storage(format!("invalid credential file: {}", e)))
    }

    /// Save, creating parent directories and overwriting any existing file.
    pub async fn save(&self, credential: &Credential) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(credential)
            .map_err(|e| AuthError::Storage(format!("Serialization failed: {}", e)))?;
        fs::write(&self.path, json).await?;
        Ok(())
    }

    /// Delete the file; already gone is fine.
    pub async fn clear(&self) -> Result<(), AuthError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug)]
enum Cached {
    Unloaded,
    Loaded(Option<Credential>),
}

/// [`CredentialProvider`] backed by a [`CredentialStore`], refreshing through an optional
/// HTTP endpoint that exchanges `{"refresh_token"}` for `{"access_token", "refresh_token"?}`.
#[derive(Debug)]
pub struct StoredCredentialProvider {
    store: CredentialStore,
    client: Client,
    refresh_url: Option<String>,
    cached: Mutex<Cached>,
}

impl StoredCredentialProvider {
    pub fn new(store: CredentialStore, client: Client, refresh_url: Option<String>) -> Self {
        Self {
            store,
            client,
            refresh_url,
            cached: Mutex::new(Cached::Unloaded),
        }
    }

    /// Replace the stored credential (e.g. after an interactive login).
    pub async fn set_credential(&self, credential: Credential) -> Result<(), AuthError> {
        self.store.save(&credential).await?;
        *self.cached.lock().await = Cached::Loaded(Some(credential));
        Ok(())
    }
}

#[async_trait::async_trait]
impl CredentialProvider for StoredCredentialProvider {
    async fn get_credential(&self) -> Option<Credential> {
        let mut cached = self.cached.lock().await;
        if let Cached::Loaded(credential) = &*cached {
            return credential.clone();
        }
        let credential = match self.store.load().await {
            Ok(credential) => credential,
            Err(e) => {
                log::warn!("Ignoring unreadable credential file: {}", e);
                None
            }
        };
        *cached = Cached::Loaded(credential.clone());
        credential
    }

    async fn refresh_credential(&self) -> Result<Credential, AuthError> {
        let url = self
            .refresh_url
            .as_deref()
            .ok_or(AuthError::RefreshUnavailable)?;
        let refresh_token = self
            .get_credential()
            .await
            .and_then(|c| c.refresh_token)
            .ok_or(AuthError::MissingCredential)?;

        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AuthError::RefreshRejected(format!(
                "status {}",
                response.status()
            )));
        }
        let body: RefreshResponse = response.json().await?;

        let credential = Credential {
            access_token: body.access_token,
            refresh_token: body.refresh_token.or(Some(refresh_token)),
        };
        self.set_credential(credential.clone()).await?;
        Ok(credential)
    }

    async fn clear_credential(&self) {
        *self.cached.lock().await = Cached::Loaded(None);
        if let Err(e) = self.store.clear().await {
            log::warn!("Failed to remove credential file: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    // Loading a saved credential should return the same credential.
    async fn test_load_recovers_saved_credential() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("nested").join("credentials.json"));

        let credential = Credential::new("access").with_refresh_token("refresh");
        store.save(&credential).await.unwrap();

        assert_eq!(store.load().await.unwrap(), Some(credential));
    }

    #[tokio::test]
    async fn test_missing_file_loads_as_none_and_clears_cleanly() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("credentials.json"));

        assert_eq!(store.load().await.unwrap(), None);
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_json_is_a_storage_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, "not json").unwrap();

        let result = CredentialStore::new(path).load().await;
        assert!(matches!(result, Err(AuthError::Storage(_))));
    }

    #[tokio::test]
    async fn test_clear_credential_removes_file_and_cache() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("credentials.json"));
        store.save(&Credential::new("access")).await.unwrap();

        let provider = StoredCredentialProvider::new(store.clone(), Client::new(), None);
        assert_eq!(
            provider.get_credential().await,
            Some(Credential::new("access"))
        );

        provider.clear_credential().await;
        assert_eq!(provider.get_credential().await, None);
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_refresh_without_url_is_unavailable() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("credentials.json"));
        let provider = StoredCredentialProvider::new(store, Client::new(), None);

        assert_eq!(
            provider.refresh_credential().await,
            Err(AuthError::RefreshUnavailable)
        );
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token_is_missing_credential() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("credentials.json"));
        store.save(&Credential::new("access")).await.unwrap();
        let provider = StoredCredentialProvider::new(
            store,
            Client::new(),
            Some("http://127.0.0.1:9/refresh".to_string()),
        );

        assert_eq!(
            provider.refresh_credential().await,
            Err(AuthError::MissingCredential)
        );
    }
}
