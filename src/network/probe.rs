//! Network Probe
//!
//! Keeps the store's network status current from three sources: a periodic reachability
//! check, connectivity transitions reported by the host application, and (from the client
//! façade) the outcome of ordinary requests.

use crate::consts::client_consts::probe;
use crate::errors::{ErrorStore, MonitorGuard, NetworkStatusUpdate};
use crate::system::detect_connection_type;
use crate::transport::{HttpRequest, Transport, TransportError};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[cfg(test)]
use mockall::automock;

const TRANSITION_QUEUE_SIZE: usize = 16;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ProbeConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub timeout_ms: u64,
    /// Probe target; the client's base URL when unset.
    pub url: Option<String>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: probe::INTERVAL_MS,
            timeout_ms: probe::TIMEOUT_MS,
            url: None,
        }
    }
}

/// Connectivity change reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityTransition {
    Online,
    Offline,
}

/// Trait for reachability checks - allows for easy mocking in tests
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait ConnectivityCheck: Send + Sync {
    /// `Ok` when the API answered at all, whatever the status.
    async fn check(&self) -> Result<(), TransportError>;
}

/// Reachability check that sends a `HEAD` request through a [`Transport`].
pub struct HttpConnectivityCheck {
    transport: Arc<dyn Transport>,
    url: String,
}

impl HttpConnectivityCheck {
    pub fn new(transport: Arc<dyn Transport>, url: impl Into<String>) -> Self {
        Self {
            transport,
            url: url.into(),
        }
    }
}

#[async_trait::async_trait]
impl ConnectivityCheck for HttpConnectivityCheck {
    async fn check(&self) -> Result<(), TransportError> {
        self.transport
            .send(HttpRequest::new(Method::HEAD, self.url.clone()))
            .await
            .map(|_| ())
    }
}

pub struct NetworkProbe {
    store: ErrorStore,
    check: Arc<dyn ConnectivityCheck>,
    interval: Duration,
    timeout: Duration,
}

impl NetworkProbe {
    pub fn new(store: ErrorStore, check: Arc<dyn ConnectivityCheck>) -> Self {
        Self {
            store,
            check,
            interval: probe::interval(),
            timeout: probe::timeout(),
        }
    }

    pub fn from_config(
        store: ErrorStore,
        check: Arc<dyn ConnectivityCheck>,
        config: &ProbeConfig,
    ) -> Self {
        Self::new(store, check)
            .with_interval(Duration::from_millis(config.interval_ms))
            .with_timeout(Duration::from_millis(config.timeout_ms))
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        // tokio intervals reject a zero period
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run one check and record the result. Returns whether the API was reachable.
    pub async fn probe_once(&self) -> bool {
        let started = Instant::now();
        let outcome = match tokio::time::timeout(self.timeout, self.check.check()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.timeout)),
        };

        match outcome {
            Ok(()) => {
                let latency_ms = started.elapsed().as_millis() as u64;
                log::debug!("Connectivity check succeeded in {}ms", latency_ms);
                self.store.set_network_status(
                    NetworkStatusUpdate::online()
                        .with_latency_ms(Some(latency_ms))
                        .with_connection_type(detect_connection_type()),
                );
                true
            }
            Err(e) => {
                log::debug!("Connectivity check failed: {}", e);
                self.store
                    .set_network_status(NetworkStatusUpdate::offline());
                false
            }
        }
    }

    /// Start the periodic loop. It stops when the handle is shut down or the store is
    /// disposed.
    pub fn spawn(self) -> ProbeHandle {
        let token = self.store.lifecycle();
        let (sender, receiver) = mpsc::channel(TRANSITION_QUEUE_SIZE);
        let monitor = self.store.attach_monitor();
        let task = tokio::spawn(self.run(receiver, token.clone(), monitor));
        ProbeHandle {
            transitions: sender,
            token,
            task,
        }
    }

    async fn run(
        self,
        mut transitions: mpsc::Receiver<ConnectivityTransition>,
        token: CancellationToken,
        _monitor: MonitorGuard,
    ) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                Some(transition) = transitions.recv() => match transition {
                    // Trusted as-is; there is nothing to reach.
                    ConnectivityTransition::Offline => {
                        self.store.set_network_status(NetworkStatusUpdate::offline());
                    }
                    ConnectivityTransition::Online => {
                        self.probe_once().await;
                    }
                },
                _ = ticker.tick() => {
                    self.probe_once().await;
                }
            }
        }
        log::debug!("Network probe stopped");
    }
}

/// Handle to a running [`NetworkProbe`].
pub struct ProbeHandle {
    transitions: mpsc::Sender<ConnectivityTransition>,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl ProbeHandle {
    /// Forward a platform connectivity transition to the probe.
    pub fn notify(&self, transition: ConnectivityTransition) {
        if self.transitions.try_send(transition).is_err() {
            log::debug!("Dropped connectivity transition {:?}", transition);
        }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.task.await;
    }
}
