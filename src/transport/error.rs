//! Error handling for the transport module

use super::HttpResponse;
use crate::consts::client_consts::transport::MAX_ERROR_MESSAGE_LEN;
use std::time::Duration;
use thiserror::Error;

/// Outcome of one failed transport call. `Clone` so a single failure can be handed to every
/// caller waiting on the same request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The call did not settle within its timeout.
    #[error("Request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Connection-level failure; no HTTP status was received.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The server answered with a non-success status.
    #[error("HTTP error with status {status}: {message}")]
    Http {
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },
}

impl TransportError {
    /// Build an `Http` error from a non-success response, preferring a server-provided
    /// `message`/`error` field over the raw body.
    pub fn from_response(response: &HttpResponse) -> TransportError {
        TransportError::Http {
            status: response.status,
            message: server_message(&response.body),
            retry_after: response.retry_after(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Http { status, .. } => Some(*status),
            TransportError::Timeout(_) | TransportError::Connection(_) => None,
        }
    }

    /// Server-provided `Retry-After`, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            TransportError::Http { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Message suitable for an error record (no status prefix, no debug output).
    pub fn message(&self) -> String {
        match self {
            TransportError::Http { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            // reqwest does not expose the configured limit
            TransportError::Timeout(Duration::ZERO)
        } else {
            TransportError::Connection(error.to_string())
        }
    }
}

fn server_message(body: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
        for field in ["message", "error", "detail"] {
            if let Some(text) = value.get(field).and_then(|v| v.as_str()) {
                return truncate(text);
            }
        }
    }
    truncate(String::from_utf8_lossy(body).trim())
}

fn truncate(text: &str) -> String {
    match text.char_indices().nth(MAX_ERROR_MESSAGE_LEN) {
        Some((index, _)) => format!("{}…", &text[..index]),
        None => text.to_string(),
    }
}
