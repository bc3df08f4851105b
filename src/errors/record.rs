//! Tracked failures.

use super::kind::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::{self, Display, Formatter};
use uuid::Uuid;

/// Opaque identifier of an [`ErrorRecord`]. Generated once, never reused.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorId(Uuid);

impl ErrorId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for ErrorId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ErrorId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// One tracked failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: ErrorId,
    pub kind: ErrorKind,
    pub message: String,
    pub status: Option<u16>,
    pub endpoint: String,
    pub created_at: DateTime<Utc>,
    /// Retries already made.
    pub attempt: u32,
    /// Policy ceiling; the record is terminal once `attempt >= max_attempts`.
    pub max_attempts: u32,
    /// True only while a scheduled retry has not yet settled.
    pub is_retrying: bool,
    /// Diagnostics only (method, correlation id, raw payload).
    pub context: Map<String, Value>,
}

impl ErrorRecord {
    pub fn is_terminal(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    pub fn is_retryable(&self) -> bool {
        !self.is_terminal()
    }

    /// Short classified text for a toast-style surface.
    pub fn user_message(&self) -> String {
        user_message(self.kind, &self.message)
    }
}

pub(crate) fn user_message(kind: ErrorKind, server_message: &str) -> String {
    let server_message = server_message.trim();
    if server_message.is_empty() {
        kind.headline().to_string()
    } else {
        format!("{}: {}", kind.headline(), server_message)
    }
}

/// Fields supplied when a failure is first recorded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewError {
    pub message: String,
    pub status: Option<u16>,
    pub endpoint: String,
    pub max_attempts: u32,
    pub context: Map<String, Value>,
}

impl NewError {
    pub fn new(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: Option<u16>) -> Self {
        self.status = status;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Classify and stamp a fresh record.
    pub(crate) fn into_record(self) -> ErrorRecord {
        ErrorRecord {
            id: ErrorId::generate(),
            kind: ErrorKind::classify(self.status),
            message: self.message,
            status: self.status,
            endpoint: self.endpoint,
            created_at: Utc::now(),
            attempt: 0,
            max_attempts: self.max_attempts,
            is_retrying: false,
            context: self.context,
        }
    }
}

/// Partial update merged into an existing record. `kind` is fixed at creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorUpdate {
    pub attempt: Option<u32>,
    pub max_attempts: Option<u32>,
    pub is_retrying: Option<bool>,
    pub message: Option<String>,
}

impl ErrorUpdate {
    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn retrying(mut self, is_retrying: bool) -> Self {
        self.is_retrying = Some(is_retrying);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Apply to `record`, keeping `attempt <= max_attempts`.
    pub(crate) fn apply_to(self, record: &mut ErrorRecord) -> bool {
        let before = record.clone();
        if let Some(max_attempts) = self.max_attempts {
            record.max_attempts = max_attempts;
        }
        if let Some(attempt) = self.attempt {
            record.attempt = attempt;
        }
        record.attempt = record.attempt.min(record.max_attempts);
        if let Some(is_retrying) = self.is_retrying {
            record.is_retrying = is_retrying;
        }
        if let Some(message) = self.message {
            record.message = message;
        }
        *record != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_records_start_clean_and_classified() {
        let record = NewError::new("reports", "bad input")
            .with_status(Some(422))
            .with_max_attempts(0)
            .with_context("method", "POST")
            .into_record();

        assert_eq!(record.kind, ErrorKind::Validation);
        assert_eq!(record.attempt, 0);
        assert!(!record.is_retrying);
        assert!(record.is_terminal());
        assert_eq!(record.context["method"], "POST");
    }

    #[test]
    fn ids_are_unique() {
        let a = NewError::new("a", "x").into_record();
        let b = NewError::new("a", "x").into_record();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn update_clamps_attempt_to_ceiling() {
        let mut record = NewError::new("reports", "boom")
            .with_status(Some(503))
            .with_max_attempts(3)
            .into_record();

        assert!(ErrorUpdate::default().attempt(7).apply_to(&mut record));
        assert_eq!(record.attempt, 3);
        assert!(record.is_terminal());
    }

    #[test]
    fn unchanged_update_reports_no_change() {
        let mut record = NewError::new("reports", "boom").into_record();
        assert!(!ErrorUpdate::default().retrying(false).apply_to(&mut record));
    }

    #[test]
    fn user_message_prefers_server_text() {
        let record = NewError::new("reports", "quota exceeded")
            .with_status(Some(503))
            .into_record();
        assert_eq!(
            record.user_message(),
            "The server ran into a problem: quota exceeded"
        );

        let record = NewError::new("reports", "  ").into_record();
        assert_eq!(record.user_message(), "Unable to reach the server");
    }
}
