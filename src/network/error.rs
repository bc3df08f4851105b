//! Errors returned by [`super::HttpClient`].

use crate::auth::AuthError;
use crate::errors::record::user_message;
use crate::errors::{ErrorId, ErrorKind};
use thiserror::Error;
use tokio::sync::oneshot;

/// `Clone` so one failure can be handed to every caller sharing a deduplicated request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// Terminal failure, also tracked in the error store under `error_id`.
    #[error("{kind} error on {endpoint} after {attempts} retries: {message}")]
    Failed {
        kind: ErrorKind,
        status: Option<u16>,
        endpoint: String,
        message: String,
        attempts: u32,
        error_id: ErrorId,
    },

    /// The credential could not be refreshed after a 401.
    #[error("Authentication failed: {source}")]
    Auth { source: AuthError, error_id: ErrorId },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Failed to encode request body: {0}")]
    Encode(String),

    #[error("Failed to decode response body: {0}")]
    Decode(String),

    #[error("Client is shutting down")]
    Shutdown,

    #[error("Request was abandoned before it settled")]
    Abandoned,

    #[error("Error {0} is not tracked")]
    UnknownError(ErrorId),

    #[error("Error {0} cannot be retried")]
    NotRetryable(ErrorId),
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Failed { kind, .. } => *kind,
            ClientError::Auth { .. } => ErrorKind::Auth,
            ClientError::InvalidRequest(_) | ClientError::Encode(_) => ErrorKind::Validation,
            _ => ErrorKind::Unknown,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Failed { status, .. } => *status,
            ClientError::Auth { .. } => Some(401),
            _ => None,
        }
    }

    /// Store record tracking this failure, if any.
    pub fn error_id(&self) -> Option<ErrorId> {
        match self {
            ClientError::Failed { error_id, .. } | ClientError::Auth { error_id, .. } => {
                Some(*error_id)
            }
            _ => None,
        }
    }

    /// Short classified text for a toast-style surface.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Failed { kind, message, .. } => user_message(*kind, message),
            ClientError::Auth { .. } => user_message(ErrorKind::Auth, ""),
            other => user_message(other.kind(), &other.to_string()),
        }
    }
}

impl From<oneshot::error::RecvError> for ClientError {
    fn from(_: oneshot::error::RecvError) -> Self {
        ClientError::Abandoned
    }
}
