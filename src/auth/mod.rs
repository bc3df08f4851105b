//! Credentials: the provider seam, on-disk persistence, and single-flight refresh.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Formatter};
use thiserror::Error;

pub mod refresh;
pub mod store;

pub use refresh::TokenRefresher;
pub use store::{CredentialStore, StoredCredentialProvider};

#[cfg(test)]
use mockall::automock;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("No credential is available")]
    MissingCredential,

    #[error("Credential refresh is not configured")]
    RefreshUnavailable,

    #[error("Credential refresh rejected: {0}")]
    RefreshRejected(String),

    #[error("Credential refresh failed: {0}")]
    RefreshFailed(String),

    #[error("Credential refresh was abandoned before it completed")]
    RefreshAbandoned,

    #[error("Credential storage error: {0}")]
    Storage(String),
}

impl From<std::io::Error> for AuthError {
    fn from(error: std::io::Error) -> Self {
        AuthError::Storage(error.to_string())
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(error: reqwest::Error) -> Self {
        AuthError::RefreshFailed(error.to_string())
    }
}

/// Bearer credential plus the optional token used to renew it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl Credential {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

impl Debug for Credential {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Source of the current credential.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Current credential, if any.
    async fn get_credential(&self) -> Option<Credential>;

    /// Obtain and persist a new credential.
    async fn refresh_credential(&self) -> Result<Credential, AuthError>;

    /// Drop all local credential state.
    async fn clear_credential(&self);
}

/// Provider for unauthenticated APIs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCredentials;

#[async_trait::async_trait]
impl CredentialProvider for NoCredentials {
    async fn get_credential(&self) -> Option<Credential> {
        None
    }

    async fn refresh_credential(&self) -> Result<Credential, AuthError> {
        Err(AuthError::RefreshUnavailable)
    }

    async fn clear_credential(&self) {}
}
