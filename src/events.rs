//! Event System
//!
//! Notifications published by the resilience layer for UI and logging subscribers.

use crate::consts::client_consts::EVENT_QUEUE_SIZE;
use crate::errors::{ErrorId, ErrorKind};
use crate::logging::LogLevel;
use std::fmt::Display;
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Debug, Copy, Clone, Eq, PartialEq, strum::Display)]
pub enum EventType {
    Success,
    Error,
    Refresh,
    Waiting,
    StateChange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    ErrorAdded {
        id: ErrorId,
        kind: ErrorKind,
        endpoint: String,
        message: String,
    },
    ErrorUpdated {
        id: ErrorId,
    },
    ErrorRemoved {
        id: ErrorId,
    },
    ErrorsCleared {
        count: usize,
    },
    NetworkStatusChanged {
        is_online: bool,
    },
    RetryScheduled {
        id: ErrorId,
        endpoint: String,
        attempt: u32,
        delay: Duration,
    },
    CredentialRefreshed,
    /// Refresh failed and local credentials were cleared; the application should send the
    /// user back to its authentication entry point.
    CredentialInvalidated {
        reason: String,
    },
}

impl ClientEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            ClientEvent::ErrorAdded { .. } | ClientEvent::CredentialInvalidated { .. } => {
                EventType::Error
            }
            ClientEvent::ErrorUpdated { .. } | ClientEvent::NetworkStatusChanged { .. } => {
                EventType::StateChange
            }
            ClientEvent::ErrorRemoved { .. } | ClientEvent::ErrorsCleared { .. } => {
                EventType::Success
            }
            ClientEvent::RetryScheduled { .. } => EventType::Waiting,
            ClientEvent::CredentialRefreshed => EventType::Refresh,
        }
    }

    pub fn log_level(&self) -> LogLevel {
        match self {
            ClientEvent::ErrorAdded { kind, .. } => match kind {
                ErrorKind::Auth => LogLevel::Error,
                ErrorKind::Validation => LogLevel::Info,
                _ => LogLevel::Warn,
            },
            ClientEvent::CredentialInvalidated { .. } => LogLevel::Error,
            ClientEvent::NetworkStatusChanged { is_online: false } => LogLevel::Warn,
            ClientEvent::RetryScheduled { .. } | ClientEvent::ErrorUpdated { .. } => {
                LogLevel::Debug
            }
            _ => LogLevel::Info,
        }
    }
}

impl Display for ClientEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientEvent::ErrorAdded {
                id,
                kind,
                endpoint,
                message,
            } => write!(f, "{kind} error {id} on {endpoint}: {message}"),
            ClientEvent::ErrorUpdated { id } => write!(f, "error {id} updated"),
            ClientEvent::ErrorRemoved { id } => write!(f, "error {id} resolved"),
            ClientEvent::ErrorsCleared { count } => write!(f, "cleared {count} errors"),
            ClientEvent::NetworkStatusChanged { is_online: true } => write!(f, "network online"),
            ClientEvent::NetworkStatusChanged { is_online: false } => {
                write!(f, "network offline")
            }
            ClientEvent::RetryScheduled {
                id,
                endpoint,
                attempt,
                delay,
            } => write!(
                f,
                "retry {attempt} of {endpoint} ({id}) in {}ms",
                delay.as_millis()
            ),
            ClientEvent::CredentialRefreshed => write!(f, "credential refreshed"),
            ClientEvent::CredentialInvalidated { reason } => {
                write!(f, "credential invalidated: {reason}")
            }
        }
    }
}

/// Shared publisher for [`ClientEvent`]s. Every event is also written to the log.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<ClientEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_QUEUE_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ClientEvent) {
        log::log!(
            log::Level::from(event.log_level()),
            "[{}] {}",
            event.event_type(),
            event
        );
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.emit(ClientEvent::CredentialRefreshed);
        bus.emit(ClientEvent::ErrorsCleared { count: 2 });

        assert_eq!(receiver.recv().await.unwrap(), ClientEvent::CredentialRefreshed);
        assert_eq!(
            receiver.recv().await.unwrap(),
            ClientEvent::ErrorsCleared { count: 2 }
        );
    }

    #[test]
    fn emit_without_subscribers_is_harmless() {
        EventBus::new().emit(ClientEvent::NetworkStatusChanged { is_online: false });
    }

    #[test]
    fn invalidation_is_an_error() {
        let event = ClientEvent::CredentialInvalidated {
            reason: "refresh rejected".to_string(),
        };
        assert_eq!(event.event_type(), EventType::Error);
        assert_eq!(event.log_level(), LogLevel::Error);
        assert_eq!(event.to_string(), "credential invalidated: refresh rejected");
    }
}
