//! Per-endpoint request throttling.
//!
//! Each endpoint keeps the start times of its recent requests. A request that would exceed
//! either the per-minute quota or the burst quota is held back until the oldest counted
//! request leaves the window; nothing is ever rejected.

use crate::consts::client_consts::throttling;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointLimit {
    pub max_per_minute: u32,
    pub max_burst: u32,
}

impl Default for EndpointLimit {
    fn default() -> Self {
        Self {
            max_per_minute: throttling::DEFAULT_MAX_PER_MINUTE,
            max_burst: throttling::DEFAULT_MAX_BURST,
        }
    }
}

/// Limit table. Endpoints are matched by longest prefix; anything unmatched gets `default`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ThrottleConfig {
    pub default: EndpointLimit,
    pub endpoints: BTreeMap<String, EndpointLimit>,
}

impl ThrottleConfig {
    pub fn with_endpoint(mut self, prefix: impl Into<String>, limit: EndpointLimit) -> Self {
        self.endpoints.insert(prefix.into(), limit);
        self
    }

    /// Window key and limit for `endpoint`. Endpoints sharing a table entry share a window.
    fn resolve<'a>(&'a self, endpoint: &'a str) -> (&'a str, EndpointLimit) {
        self.endpoints
            .iter()
            .filter(|(prefix, _)| endpoint.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(prefix, limit)| (prefix.as_str(), *limit))
            .unwrap_or((endpoint, self.default))
    }

    pub fn limit_for(&self, endpoint: &str) -> EndpointLimit {
        self.resolve(endpoint).1
    }
}

#[derive(Debug, Default)]
struct Window {
    starts: VecDeque<Instant>,
}

impl Window {
    fn prune(&mut self, now: Instant, span: Duration) {
        while let Some(&oldest) = self.starts.front() {
            if now.duration_since(oldest) >= span {
                self.starts.pop_front();
            } else {
                break;
            }
        }
    }

    /// How long until another request fits under `limit` requests per `span`.
    fn wait_for(&self, now: Instant, limit: u32, span: Duration) -> Duration {
        let limit = limit.max(1) as usize;
        if self.starts.len() < limit {
            return Duration::ZERO;
        }
        let pivot = self.starts[self.starts.len() - limit];
        (pivot + span).saturating_duration_since(now)
    }
}

#[derive(Debug)]
struct Windows {
    by_key: HashMap<String, Window>,
    last_sweep: Instant,
}

impl Windows {
    /// Drop windows that have gone idle, at most once per `span`.
    fn sweep(&mut self, now: Instant, span: Duration) {
        if now.duration_since(self.last_sweep) < span {
            return;
        }
        self.by_key.retain(|_, window| {
            window.prune(now, span);
            !window.starts.is_empty()
        });
        self.last_sweep = now;
    }
}

#[derive(Debug)]
pub struct Throttler {
    config: ThrottleConfig,
    window: Duration,
    burst_window: Duration,
    windows: Mutex<Windows>,
}

impl Throttler {
    pub fn new(config: ThrottleConfig) -> Self {
        Self::with_windows(config, throttling::window(), throttling::burst_window())
    }

    pub fn with_windows(config: ThrottleConfig, window: Duration, burst_window: Duration) -> Self {
        Self {
            config,
            window,
            burst_window: burst_window.min(window),
            windows: Mutex::new(Windows {
                by_key: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Reserve a slot for `endpoint` or report how long to wait for one.
    fn try_reserve(&self, endpoint: &str) -> Result<(), Duration> {
        let (key, limit) = self.config.resolve(endpoint);
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        windows.sweep(now, self.window);
        let window = windows.by_key.entry(key.to_string()).or_default();
        window.prune(now, self.window);

        let wait = window
            .wait_for(now, limit.max_per_minute, self.window)
            .max(window.wait_for(now, limit.max_burst, self.burst_window));
        if wait.is_zero() {
            window.starts.push_back(now);
            Ok(())
        } else {
            Err(wait)
        }
    }

    /// Wait until `endpoint` has capacity and record the request.
    pub async fn acquire(&self, endpoint: &str) {
        loop {
            match self.try_reserve(endpoint) {
                Ok(()) => return,
                Err(wait) => {
                    log::debug!("Throttling {} for {}ms", endpoint, wait.as_millis());
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Run `call` once `endpoint` has capacity.
    pub async fn admit<F>(&self, endpoint: &str, call: F) -> F::Output
    where
        F: Future,
    {
        self.acquire(endpoint).await;
        call.await
    }

    /// Requests counted against `endpoint` in the current window.
    pub fn recent_count(&self, endpoint: &str) -> usize {
        let (key, _) = self.config.resolve(endpoint);
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let count = match windows.by_key.get_mut(key) {
            Some(window) => {
                window.prune(now, self.window);
                window.starts.len()
            }
            None => return 0,
        };
        if count == 0 {
            windows.by_key.remove(key);
        }
        count
    }
}

impl Default for Throttler {
    fn default() -> Self {
        Self::new(ThrottleConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn limit(max_per_minute: u32, max_burst: u32) -> EndpointLimit {
        EndpointLimit {
            max_per_minute,
            max_burst,
        }
    }

    #[test]
    fn test_longest_prefix_wins() {
        let config = ThrottleConfig::default()
            .with_endpoint("/users", limit(30, 5))
            .with_endpoint("/users/search", limit(10, 2));

        assert_eq!(config.limit_for("/users/search?q=a"), limit(10, 2));
        assert_eq!(config.limit_for("/users/42"), limit(30, 5));
        assert_eq!(config.limit_for("/orders"), EndpointLimit::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_under_limit_is_immediate() {
        let throttler = Throttler::new(ThrottleConfig::default());
        let start = Instant::now();
        for _ in 0..10 {
            throttler.acquire("/items").await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(throttler.recent_count("/items"), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_delayed_not_rejected() {
        let throttler = Throttler::new(ThrottleConfig {
            default: limit(60, 2),
            ..Default::default()
        });
        let start = Instant::now();
        for _ in 0..3 {
            throttler.acquire("/items").await;
        }
        // Third call waits for the burst window to roll over.
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_minute_quota_delays_excess() {
        let throttler = Throttler::new(ThrottleConfig {
            default: limit(3, 3),
            ..Default::default()
        });
        let start = Instant::now();
        for _ in 0..4 {
            throttler.admit("/reports", async {}).await;
        }
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert!(start.elapsed() < Duration::from_secs(61));
    }

    #[tokio::test(start_paused = true)]
    async fn test_endpoints_do_not_share_windows() {
        let throttler = Arc::new(Throttler::new(ThrottleConfig {
            default: limit(1, 1),
            ..Default::default()
        }));
        throttler.acquire("/a").await;

        let start = Instant::now();
        throttler.acquire("/b").await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        throttler.acquire("/a").await;
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    fn tracked(throttler: &Throttler) -> usize {
        throttler.windows.lock().unwrap().by_key.len()
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_windows_are_evicted() {
        let throttler = Throttler::new(ThrottleConfig::default());
        for i in 0..1000 {
            throttler.acquire(&format!("/items/{i}")).await;
        }
        assert_eq!(tracked(&throttler), 1000);

        tokio::time::advance(Duration::from_secs(120)).await;
        throttler.acquire("/items/new").await;
        assert_eq!(tracked(&throttler), 1);
        assert_eq!(throttler.recent_count("/items/0"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_limit_is_treated_as_one() {
        let throttler = Throttler::new(ThrottleConfig {
            default: limit(0, 0),
            ..Default::default()
        });
        throttler.acquire("/x").await;
        assert_eq!(throttler.recent_count("/x"), 1);
    }
}
