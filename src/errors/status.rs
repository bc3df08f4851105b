//! Aggregate connectivity status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse classification of the active link.
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionType {
    Wifi,
    Cellular,
    Ethernet,
    #[default]
    Unknown,
}

/// Last known connectivity of the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub is_online: bool,
    pub last_checked: DateTime<Utc>,
    pub connection_type: ConnectionType,
    /// Round-trip time of the last successful probe.
    pub latency_ms: Option<u64>,
}

impl Default for NetworkStatus {
    fn default() -> Self {
        Self {
            is_online: true,
            last_checked: Utc::now(),
            connection_type: ConnectionType::Unknown,
            latency_ms: None,
        }
    }
}

/// Partial update merged into [`NetworkStatus`]; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkStatusUpdate {
    pub is_online: Option<bool>,
    pub connection_type: Option<ConnectionType>,
    pub latency_ms: Option<Option<u64>>,
}

impl NetworkStatusUpdate {
    pub fn online() -> Self {
        Self {
            is_online: Some(true),
            ..Self::default()
        }
    }

    pub fn offline() -> Self {
        Self {
            is_online: Some(false),
            latency_ms: Some(None),
            ..Self::default()
        }
    }

    pub fn with_connection_type(mut self, connection_type: ConnectionType) -> Self {
        self.connection_type = Some(connection_type);
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: Option<u64>) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }
}

impl NetworkStatus {
    /// Merge `update` and stamp `checked_at`. The stamp never moves backwards.
    ///
    /// Returns true when any observable field changed.
    pub(crate) fn merge(&mut self, update: NetworkStatusUpdate, checked_at: DateTime<Utc>) -> bool {
        let before = self.clone();
        if let Some(is_online) = update.is_online {
            self.is_online = is_online;
        }
        if let Some(connection_type) = update.connection_type {
            self.connection_type = connection_type;
        }
        if let Some(latency_ms) = update.latency_ms {
            self.latency_ms = latency_ms;
        }
        self.last_checked = self.last_checked.max(checked_at);
        *self != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn merge_only_touches_present_fields() {
        let mut status = NetworkStatus::default();
        let now = status.last_checked;
        status.merge(
            NetworkStatusUpdate::default().with_connection_type(ConnectionType::Wifi),
            now,
        );
        assert!(status.is_online);
        assert_eq!(status.connection_type, ConnectionType::Wifi);

        status.merge(NetworkStatusUpdate::offline(), now);
        assert!(!status.is_online);
        assert_eq!(status.connection_type, ConnectionType::Wifi);
        assert_eq!(status.latency_ms, None);
    }

    #[test]
    fn last_checked_never_moves_backwards() {
        let mut status = NetworkStatus::default();
        let later = status.last_checked + Duration::seconds(10);
        status.merge(NetworkStatusUpdate::online(), later);
        assert_eq!(status.last_checked, later);

        status.merge(NetworkStatusUpdate::online(), later - Duration::seconds(5));
        assert_eq!(status.last_checked, later);
    }
}
