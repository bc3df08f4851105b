use crate::auth::AuthError;
use crate::logging::LogLevel;
use crate::network::ClientError;
use crate::transport::TransportError;

#[derive(Debug, Clone)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Level for a single failed attempt.
    pub fn classify_transport_error(&self, error: &TransportError) -> LogLevel {
        match error {
            // Non-critical: Rate limiting, temporary server issues
            TransportError::Http { status: 429, .. } => LogLevel::Debug,
            TransportError::Http { status, .. } if (500..=599).contains(status) => {
                LogLevel::Warn
            }

            // Critical: Auth
            TransportError::Http {
                status: 401 | 403, ..
            } => LogLevel::Error,

            // Caller-correctable input
            TransportError::Http { status: 400..=499, .. } => LogLevel::Info,

            // Network issues - usually temporary
            _ => LogLevel::Warn,
        }
    }

    /// Level for a failure returned to the caller.
    pub fn classify_client_error(&self, error: &ClientError) -> LogLevel {
        match error {
            ClientError::Auth {
                source: AuthError::RefreshUnavailable,
                ..
            } => LogLevel::Warn,
            ClientError::Auth { .. } => LogLevel::Error,
            ClientError::Failed { status: None, .. } => LogLevel::Warn,
            ClientError::Failed {
                status: Some(401 | 403),
                ..
            } => LogLevel::Error,
            ClientError::Failed {
                status: Some(status),
                ..
            } if *status >= 500 => LogLevel::Error,
            ClientError::Failed { .. } => LogLevel::Info,
            ClientError::Decode(_) | ClientError::Encode(_) => LogLevel::Error,
            ClientError::Shutdown | ClientError::Abandoned => LogLevel::Debug,
            ClientError::InvalidRequest(_)
            | ClientError::UnknownError(_)
            | ClientError::NotRetryable(_) => LogLevel::Warn,
        }
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}
