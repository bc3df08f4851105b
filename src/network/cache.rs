//! Short-lived cache of successful GET responses.
//!
//! Caching is opt-in per endpoint: only endpoints listed in the TTL table are cached.

use crate::consts::client_consts::cache;
use crate::transport::HttpResponse;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,
    /// TTL in milliseconds by endpoint prefix, clamped to the 2-10 minute range.
    pub ttl_ms: BTreeMap<String, u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: cache::MAX_ENTRIES,
            ttl_ms: BTreeMap::new(),
        }
    }
}

impl CacheConfig {
    pub fn with_ttl(mut self, prefix: impl Into<String>, ttl: Duration) -> Self {
        self.ttl_ms.insert(prefix.into(), ttl.as_millis() as u64);
        self
    }

    /// TTL for `endpoint` by longest prefix, or `None` if it is not cached.
    pub fn ttl_for(&self, endpoint: &str) -> Option<Duration> {
        self.ttl_ms
            .iter()
            .filter(|(prefix, _)| endpoint.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, &ttl)| {
                Duration::from_millis(ttl.clamp(cache::MIN_TTL_MS, cache::MAX_TTL_MS))
            })
    }
}

#[derive(Debug)]
struct Entry {
    endpoint: String,
    response: HttpResponse,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct Entries {
    by_key: HashMap<String, Entry>,
    // Insertion order for eviction.
    order: VecDeque<String>,
}

/// Bounded response cache; the oldest entry is evicted when full.
#[derive(Debug)]
pub struct ResponseCache {
    config: CacheConfig,
    inner: Mutex<Entries>,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Entries::default()),
        }
    }

    pub fn is_cacheable(&self, endpoint: &str) -> bool {
        self.config.max_entries > 0 && self.config.ttl_for(endpoint).is_some()
    }

    /// Fresh response under `key`; expired entries are dropped on the way.
    pub fn get(&self, key: &str) -> Option<HttpResponse> {
        let mut entries = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let expired = match entries.by_key.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                return Some(entry.response.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.by_key.remove(key);
            entries.order.retain(|k| k != key);
        }
        None
    }

    /// Store a response for `endpoint` if the endpoint is cacheable.
    pub fn insert(&self, key: &str, endpoint: &str, response: HttpResponse) {
        let Some(ttl) = self.config.ttl_for(endpoint) else {
            return;
        };
        if self.config.max_entries == 0 {
            return;
        }
        let mut entries = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.by_key.contains_key(key) {
            entries.order.retain(|k| k != key);
        } else if entries.by_key.len() >= self.config.max_entries {
            if let Some(oldest) = entries.order.pop_front() {
                entries.by_key.remove(&oldest);
            }
        }
        entries.order.push_back(key.to_string());
        entries.by_key.insert(
            key.to_string(),
            Entry {
                endpoint: endpoint.to_string(),
                response,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Drop every entry whose endpoint starts with `prefix`.
    pub fn invalidate(&self, prefix: &str) {
        let mut entries = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        entries.by_key.retain(|_, entry| !entry.endpoint.starts_with(prefix));
        let Entries { by_key, order } = &mut *entries;
        order.retain(|k| by_key.contains_key(k));
    }

    pub fn clear(&self) {
        let mut entries = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        entries.by_key.clear();
        entries.order.clear();
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .by_key
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(body: &str) -> HttpResponse {
        HttpResponse::new(200, body.as_bytes().to_vec())
    }

    #[test]
    fn test_ttl_is_clamped_and_opt_in() {
        let config = CacheConfig::default()
            .with_ttl("/catalog", Duration::from_secs(1))
            .with_ttl("/catalog/archive", Duration::from_secs(3600));

        assert_eq!(config.ttl_for("/catalog/1"), Some(cache::min_ttl()));
        assert_eq!(config.ttl_for("/catalog/archive/2"), Some(cache::max_ttl()));
        assert_eq!(config.ttl_for("/users"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = ResponseCache::new(
            CacheConfig::default().with_ttl("/catalog", Duration::from_secs(180)),
        );
        cache.insert("GET /catalog", "/catalog", ok("v1"));
        assert_eq!(cache.get("GET /catalog"), Some(ok("v1")));

        tokio::time::advance(Duration::from_secs(181)).await;
        assert_eq!(cache.get("GET /catalog"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_unlisted_endpoints_are_not_stored() {
        let cache = ResponseCache::new(CacheConfig::default());
        cache.insert("GET /users", "/users", ok("[]"));
        assert!(cache.get("GET /users").is_none());
        assert!(!cache.is_cacheable("/users"));
    }

    #[tokio::test]
    async fn test_oldest_entry_is_evicted_when_full() {
        let cache = ResponseCache::new(CacheConfig {
            max_entries: 2,
            ..CacheConfig::default().with_ttl("/", Duration::from_secs(300))
        });
        cache.insert("a", "/a", ok("a"));
        cache.insert("b", "/b", ok("b"));
        cache.insert("c", "/c", ok("c"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert_eq!(cache.get("c"), Some(ok("c")));
    }

    #[tokio::test]
    async fn test_invalidate_by_prefix() {
        let cache =
            ResponseCache::new(CacheConfig::default().with_ttl("/", Duration::from_secs(300)));
        cache.insert("GET /users/1", "/users/1", ok("1"));
        cache.insert("GET /orders", "/orders", ok("o"));

        cache.invalidate("/users");
        assert!(cache.get("GET /users/1").is_none());
        assert_eq!(cache.get("GET /orders"), Some(ok("o")));
    }
}
