//! Failure taxonomy.

use serde::{Deserialize, Serialize};

/// Closed set of failure classes tracked by the error store.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ErrorKind {
    /// Upstream failure (5xx).
    Api,
    /// No status at all: connection refused, DNS, timeout.
    Network,
    /// Caller-correctable input (400, 422).
    Validation,
    /// Credential invalid or forbidden (401, 403).
    Auth,
    Unknown,
}

impl ErrorKind {
    /// Derive the kind from an optional HTTP status.
    ///
    /// Absence of a status is checked first: a failure without a transport-level status is
    /// always `Network`, whatever else is known about it.
    pub fn classify(status: Option<u16>) -> Self {
        match status {
            None => ErrorKind::Network,
            Some(401 | 403) => ErrorKind::Auth,
            Some(400 | 422) => ErrorKind::Validation,
            Some(status) if status >= 500 => ErrorKind::Api,
            Some(_) => ErrorKind::Unknown,
        }
    }

    /// Short title for notification-style surfaces.
    pub fn headline(&self) -> &'static str {
        match self {
            ErrorKind::Api => "The server ran into a problem",
            ErrorKind::Network => "Unable to reach the server",
            ErrorKind::Validation => "The request was rejected",
            ErrorKind::Auth => "Your session is not authorized",
            ErrorKind::Unknown => "Something went wrong",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_status_is_network() {
        assert_eq!(ErrorKind::classify(None), ErrorKind::Network);
    }

    #[test]
    fn auth_statuses() {
        assert_eq!(ErrorKind::classify(Some(401)), ErrorKind::Auth);
        assert_eq!(ErrorKind::classify(Some(403)), ErrorKind::Auth);
    }

    #[test]
    fn validation_statuses() {
        assert_eq!(ErrorKind::classify(Some(400)), ErrorKind::Validation);
        assert_eq!(ErrorKind::classify(Some(422)), ErrorKind::Validation);
    }

    #[test]
    fn server_statuses_are_api() {
        for status in [500, 502, 503, 504, 599] {
            assert_eq!(ErrorKind::classify(Some(status)), ErrorKind::Api);
        }
    }

    #[test]
    fn everything_else_is_unknown() {
        for status in [200, 302, 404, 409, 429] {
            assert_eq!(ErrorKind::classify(Some(status)), ErrorKind::Unknown);
        }
    }

    #[test]
    fn display_matches_serialized_form() {
        assert_eq!(ErrorKind::Validation.to_string(), "validation");
        assert_eq!(
            serde_json::to_string(&ErrorKind::Network).unwrap(),
            "\"network\""
        );
    }
}
