//! HTTP client façade
//!
//! Every call goes through the same pipeline:
//! response cache → single-flight deduplication → { throttling → authenticated transport
//! call with timeout → classification → backoff } → error store.

use super::cache::{CacheConfig, ResponseCache};
use super::dedup::Deduplicator;
use super::error::ClientError;
use super::retry::{RetryConfig, RetryPolicy};
use super::throttle::{ThrottleConfig, Throttler};
use crate::auth::{AuthError, Credential, CredentialProvider, NoCredentials, TokenRefresher};
use crate::config::ClientConfig;
use crate::consts::client_consts::transport;
use crate::error_classifier::ErrorClassifier;
use crate::errors::{
    ErrorId, ErrorKind, ErrorStore, ErrorUpdate, NetworkStatusUpdate, NewError,
};
use crate::events::{ClientEvent, EventBus};
use crate::transport::{HttpRequest, HttpResponse, Transport, TransportError};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One logical API call, relative to the client's base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    endpoint: String,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
    logical_key: Option<String>,
    timeout: Option<Duration>,
}

impl ApiRequest {
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
            logical_key: None,
            timeout: None,
        }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::GET, endpoint)
    }

    pub fn post(endpoint: impl Into<String>) -> Self {
        Self::new(Method::POST, endpoint)
    }

    pub fn put(endpoint: impl Into<String>) -> Self {
        Self::new(Method::PUT, endpoint)
    }

    pub fn patch(endpoint: impl Into<String>) -> Self {
        Self::new(Method::PATCH, endpoint)
    }

    pub fn delete(endpoint: impl Into<String>) -> Self {
        Self::new(Method::DELETE, endpoint)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ClientError> {
        let bytes = serde_json::to_vec(body).map_err(|e| ClientError::Encode(e.to_string()))?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(bytes);
        Ok(self)
    }

    pub fn body(mut self, body: Vec<u8>, content_type: HeaderValue) -> Self {
        self.headers.insert(CONTENT_TYPE, content_type);
        self.body = Some(body);
        self
    }

    /// Merge concurrent calls sharing `key` into one underlying call.
    pub fn logical_key(mut self, key: impl Into<String>) -> Self {
        self.logical_key = Some(key.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// An [`ApiRequest`] resolved against the base URL, ready to send and to replay.
#[derive(Debug, Clone)]
struct PreparedRequest {
    method: Method,
    endpoint: String,
    http: HttpRequest,
    timeout: Duration,
    key: Option<String>,
}

enum AttemptError {
    Transport(TransportError),
    /// The credential could not be renewed after a 401.
    Auth(AuthError),
}

impl From<TransportError> for AttemptError {
    fn from(error: TransportError) -> Self {
        AttemptError::Transport(error)
    }
}

struct ClientInner {
    base_url: String,
    request_timeout: Duration,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialProvider>,
    refresher: TokenRefresher,
    store: ErrorStore,
    dedup: Deduplicator<HttpResponse, ClientError>,
    throttler: Throttler,
    retry: RetryPolicy,
    cache: ResponseCache,
    classifier: ErrorClassifier,
    shutdown: CancellationToken,
    /// Requests behind terminal records, kept for manual retry.
    replays: Mutex<HashMap<ErrorId, PreparedRequest>>,
}

impl ClientInner {
    fn prepare(&self, request: ApiRequest) -> Result<PreparedRequest, ClientError> {
        let raw = if request.endpoint.starts_with("http://")
            || request.endpoint.starts_with("https://")
        {
            request.endpoint.clone()
        } else {
            format!(
                "{}/{}",
                self.base_url.trim_end_matches('/'),
                request.endpoint.trim_start_matches('/')
            )
        };
        let mut url = Url::parse(&raw)
            .map_err(|e| ClientError::InvalidRequest(format!("{}: {}", request.endpoint, e)))?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.query);
        }

        // Default read key: method plus the encoded URL.
        let key = match request.logical_key {
            Some(key) => Some(key),
            None if request.method == Method::GET || request.method == Method::HEAD => {
                Some(format!("{} {}", request.method, url))
            }
            None => None,
        };

        let mut http = HttpRequest::new(request.method.clone(), url.to_string());
        http.headers = request.headers;
        http.body = request.body;

        Ok(PreparedRequest {
            method: request.method,
            endpoint: request.endpoint,
            http,
            timeout: request.timeout.unwrap_or(self.request_timeout),
            key,
        })
    }

    fn lock_replays(&self) -> std::sync::MutexGuard<'_, HashMap<ErrorId, PreparedRequest>> {
        self.replays.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serve from cache or run the request, sharing it with identical calls in flight.
    async fn dispatch(
        self: &Arc<Self>,
        request: PreparedRequest,
        existing: Option<ErrorId>,
    ) -> Result<HttpResponse, ClientError> {
        if self.shutdown.is_cancelled() {
            return Err(ClientError::Shutdown);
        }
        if existing.is_none()
            && request.method == Method::GET
            && self.cache.is_cacheable(&request.endpoint)
        {
            if let Some(hit) = self.cache.get(&request.http.url) {
                log::debug!("Serving {} from cache", request.endpoint);
                return Ok(hit);
            }
        }

        match request.key.clone() {
            Some(key) => {
                let inner = self.clone();
                self.dedup
                    .dedupe(key, move || inner.execute(request, existing))
                    .await
            }
            None => self.clone().execute(request, existing).await,
        }
    }

    /// The retry loop for one request. `existing` is the record being retried manually.
    async fn execute(
        self: Arc<Self>,
        request: PreparedRequest,
        existing: Option<ErrorId>,
    ) -> Result<HttpResponse, ClientError> {
        let mut record = existing;
        let mut attempt = 0;
        let mut max_attempts = self.retry.max_attempts();

        loop {
            if self.shutdown.is_cancelled() {
                if let Some(id) = record {
                    self.store
                        .update_error(id, ErrorUpdate::default().retrying(false));
                }
                return Err(ClientError::Shutdown);
            }

            let (error, auth_error) = match self.send_authenticated(&request).await {
                Ok(response) => {
                    self.on_success(&request, record, &response);
                    return Ok(response);
                }
                Err(AttemptError::Transport(error)) => (error, None),
                Err(AttemptError::Auth(auth_error)) => {
                    // Responses fetched under the lost credential must not be served again.
                    self.cache.clear();
                    (
                        TransportError::Http {
                            status: 401,
                            message: auth_error.to_string(),
                            retry_after: None,
                        },
                        Some(auth_error),
                    )
                }
            };

            if error.status().is_none() && self.store.is_online() {
                self.store
                    .set_network_status(NetworkStatusUpdate::offline());
            }

            let id = match record {
                Some(id) => {
                    self.store.update_error(
                        id,
                        ErrorUpdate::default()
                            .retrying(false)
                            .message(error.message()),
                    );
                    id
                }
                None => {
                    max_attempts = self.retry.max_attempts_for(&error);
                    let id = self.store.add_error(
                        NewError::new(request.endpoint.clone(), error.message())
                            .with_status(error.status())
                            .with_max_attempts(max_attempts)
                            .with_context("method", request.method.as_str())
                            .with_context("url", request.http.url.clone()),
                    );
                    record = Some(id);
                    id
                }
            };

            if auth_error.is_none() && self.retry.should_retry(&error, attempt, max_attempts) {
                let delay = self.retry.delay_for(&error, attempt);
                attempt += 1;
                log::log!(
                    log::Level::from(self.classifier.classify_transport_error(&error)),
                    "{} {} failed ({}); retry {}/{} in {}ms",
                    request.method,
                    request.endpoint,
                    error,
                    attempt,
                    max_attempts,
                    delay.as_millis()
                );
                self.store.update_error(
                    id,
                    ErrorUpdate::default().attempt(attempt).retrying(true),
                );
                self.store.events().emit(ClientEvent::RetryScheduled {
                    id,
                    endpoint: request.endpoint.clone(),
                    attempt,
                    delay,
                });
                self.wait_for_retry(id, delay).await?;
                continue;
            }

            if !RetryPolicy::is_transient(error.status()) {
                // Close out a record that started transient.
                self.store
                    .update_error(id, ErrorUpdate::default().max_attempts(attempt));
            }
            let kind = match self.store.get(id) {
                Some(tracked) => {
                    self.lock_replays().insert(id, request.clone());
                    tracked.kind
                }
                None => ErrorKind::classify(error.status()),
            };

            let failure = match auth_error {
                Some(source) => ClientError::Auth {
                    source,
                    error_id: id,
                },
                None => ClientError::Failed {
                    kind,
                    status: error.status(),
                    endpoint: request.endpoint.clone(),
                    message: error.message(),
                    attempts: attempt,
                    error_id: id,
                },
            };
            log::log!(
                log::Level::from(self.classifier.classify_client_error(&failure)),
                "{} {}: {}",
                request.method,
                request.endpoint,
                failure
            );
            return Err(failure);
        }
    }

    /// Backoff sleep, then wait a bounded time for connectivity if the network is down and a
    /// monitor is attached to report its return.
    async fn wait_for_retry(&self, id: ErrorId, delay: Duration) -> Result<(), ClientError> {
        let ready = async {
            tokio::time::sleep(delay).await;
            if !self.store.is_online() && self.store.is_monitored() {
                log::debug!(
                    "Network offline; holding retry for up to {}ms",
                    self.retry.offline_wait().as_millis()
                );
                self.store
                    .wait_until_online(self.retry.offline_wait())
                    .await;
            }
        };
        tokio::select! {
            _ = self.shutdown.cancelled() => {
                self.store.update_error(id, ErrorUpdate::default().retrying(false));
                Err(ClientError::Shutdown)
            }
            _ = ready => Ok(()),
        }
    }

    /// One attempt, including at most one credential refresh and replay on 401.
    async fn send_authenticated(
        &self,
        request: &PreparedRequest,
    ) -> Result<HttpResponse, AttemptError> {
        let credential = self.credentials.get_credential().await;
        let error = match self.send_once(request, credential.as_ref(), false).await {
            Ok(response) => return Ok(response),
            Err(error) => error,
        };
        let Some(sent) = credential else {
            return Err(error.into());
        };
        if !error.is_unauthorized() {
            return Err(error.into());
        }

        let replacement = match self.credentials.get_credential().await {
            // Someone else refreshed while this request was in flight.
            Some(current) if current != sent => {
                log::debug!("Credential changed in flight; replaying {}", request.endpoint);
                current
            }
            Some(_) => self.refresher.refresh().await.map_err(AttemptError::Auth)?,
            None => return Err(AttemptError::Auth(AuthError::MissingCredential)),
        };
        Ok(self.send_once(request, Some(&replacement), true).await?)
    }

    async fn send_once(
        &self,
        request: &PreparedRequest,
        credential: Option<&Credential>,
        replayed: bool,
    ) -> Result<HttpResponse, TransportError> {
        let mut http = request.http.clone();
        http.auth_replayed = replayed;
        if let Some(credential) = credential {
            match HeaderValue::from_str(&credential.authorization_header()) {
                Ok(mut value) => {
                    value.set_sensitive(true);
                    http.headers.insert(AUTHORIZATION, value);
                }
                Err(_) => log::warn!("Credential is not a valid header value; sending without it"),
            }
        }

        self.throttler.acquire(&request.endpoint).await;
        match tokio::time::timeout(request.timeout, self.transport.send(http)).await {
            Ok(result) => result?.error_for_status(),
            Err(_) => Err(TransportError::Timeout(request.timeout)),
        }
    }

    fn on_success(&self, request: &PreparedRequest, record: Option<ErrorId>, response: &HttpResponse) {
        if !self.store.is_online() {
            self.store.set_network_status(NetworkStatusUpdate::online());
        }
        if let Some(id) = record {
            self.store.remove_error(id);
            self.lock_replays().remove(&id);
        }
        if request.method == Method::GET {
            self.cache
                .insert(&request.http.url, &request.endpoint, response.clone());
        } else if request.method != Method::HEAD {
            self.cache.invalidate(&request.endpoint);
        }
    }
}

pub struct HttpClientBuilder {
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialProvider>,
    store: Option<ErrorStore>,
    base_url: String,
    request_timeout: Duration,
    retry: RetryConfig,
    throttle: ThrottleConfig,
    cache: CacheConfig,
}

impl HttpClientBuilder {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            credentials: Arc::new(NoCredentials),
            store: None,
            base_url: transport::DEFAULT_BASE_URL.to_string(),
            request_timeout: transport::request_timeout(),
            retry: RetryConfig::default(),
            throttle: ThrottleConfig::default(),
            cache: CacheConfig::default(),
        }
    }

    pub fn from_config(transport: Arc<dyn Transport>, config: &ClientConfig) -> Self {
        Self::new(transport)
            .base_url(config.base_url.clone())
            .request_timeout(config.request_timeout())
            .retry(config.retry.clone())
            .throttle(config.throttle.clone())
            .cache(config.cache.clone())
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Share an existing store (and its event bus) instead of creating one.
    pub fn store(mut self, store: ErrorStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn throttle(mut self, throttle: ThrottleConfig) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn build(self) -> HttpClient {
        let store = self
            .store
            .unwrap_or_else(|| ErrorStore::new(EventBus::new()));
        let refresher = TokenRefresher::new(self.credentials.clone(), store.events().clone());
        // Disposing the store shuts the client down; shutting the client down leaves the store.
        let shutdown = store.lifecycle();

        HttpClient {
            inner: Arc::new(ClientInner {
                base_url: self.base_url,
                request_timeout: self.request_timeout,
                transport: self.transport,
                credentials: self.credentials,
                refresher,
                store,
                dedup: Deduplicator::new(),
                throttler: Throttler::new(self.throttle),
                retry: RetryPolicy::new(self.retry),
                cache: ResponseCache::new(self.cache),
                classifier: ErrorClassifier::new(),
                shutdown,
                replays: Mutex::new(HashMap::new()),
            }),
        }
    }
}

/// Resets the store's bulk-retry flag however `retry_all` ends.
struct BulkRetry<'a>(&'a ErrorStore);

impl<'a> BulkRetry<'a> {
    fn start(store: &'a ErrorStore) -> Self {
        store.set_retrying(true);
        Self(store)
    }
}

impl Drop for BulkRetry<'_> {
    fn drop(&mut self) {
        self.0.set_retrying(false);
    }
}

/// Resilient HTTP client. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<ClientInner>,
}

impl HttpClient {
    pub fn builder(transport: Arc<dyn Transport>) -> HttpClientBuilder {
        HttpClientBuilder::new(transport)
    }

    pub fn store(&self) -> &ErrorStore {
        &self.inner.store
    }

    pub fn events(&self) -> &EventBus {
        self.inner.store.events()
    }

    pub fn refresher(&self) -> &TokenRefresher {
        &self.inner.refresher
    }

    pub fn throttler(&self) -> &Throttler {
        &self.inner.throttler
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.dedup.in_flight_count()
    }

    /// Issue a request. Only terminal failures are returned; they are also tracked in the
    /// store.
    pub async fn request(&self, request: ApiRequest) -> Result<HttpResponse, ClientError> {
        let prepared = self.inner.prepare(request)?;
        self.inner.dispatch(prepared, None).await
    }

    pub async fn get(&self, endpoint: &str) -> Result<HttpResponse, ClientError> {
        self.request(ApiRequest::get(endpoint)).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, ClientError> {
        decode(self.get(endpoint).await?)
    }

    pub async fn post_json<B, T>(&self, endpoint: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        decode(self.request(ApiRequest::post(endpoint).json(body)?).await?)
    }

    pub async fn put_json<B, T>(&self, endpoint: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        decode(self.request(ApiRequest::put(endpoint).json(body)?).await?)
    }

    pub async fn patch_json<B, T>(&self, endpoint: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        decode(self.request(ApiRequest::patch(endpoint).json(body)?).await?)
    }

    pub async fn delete(&self, endpoint: &str) -> Result<HttpResponse, ClientError> {
        self.request(ApiRequest::delete(endpoint)).await
    }

    /// POST raw bytes.
    pub async fn upload(
        &self,
        endpoint: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<HttpResponse, ClientError> {
        let content_type = HeaderValue::from_str(content_type)
            .map_err(|e| ClientError::InvalidRequest(format!("content type: {}", e)))?;
        self.request(ApiRequest::post(endpoint).body(body, content_type))
            .await
    }

    pub async fn download(&self, endpoint: &str) -> Result<Vec<u8>, ClientError> {
        Ok(self.get(endpoint).await?.body)
    }

    /// Re-run the request behind a tracked failure with a fresh retry budget.
    pub async fn retry_error(&self, id: ErrorId) -> Result<HttpResponse, ClientError> {
        let record = self
            .inner
            .store
            .get(id)
            .ok_or(ClientError::UnknownError(id))?;
        if !RetryPolicy::is_transient(record.status) {
            return Err(ClientError::NotRetryable(id));
        }
        let request = self
            .inner
            .lock_replays()
            .get(&id)
            .cloned()
            .ok_or(ClientError::NotRetryable(id))?;

        self.inner.store.update_error(
            id,
            ErrorUpdate::default()
                .max_attempts(self.inner.retry.max_attempts())
                .attempt(0)
                .retrying(true),
        );
        let result = self.inner.dispatch(request, Some(id)).await;
        // The call may have been merged into another in flight that knew nothing of `id`.
        match &result {
            Ok(_) => self.forget(id),
            Err(_) => self
                .inner
                .store
                .update_error(id, ErrorUpdate::default().retrying(false)),
        }
        result
    }

    /// Retry every tracked failure that can be retried, concurrently.
    pub async fn retry_all(&self) -> Vec<(ErrorId, Result<HttpResponse, ClientError>)> {
        let ids: Vec<ErrorId> = {
            let mut replays = self.inner.lock_replays();
            replays.retain(|id, _| self.inner.store.get(*id).is_some());
            replays.keys().copied().collect()
        };
        let ids: Vec<ErrorId> = ids
            .into_iter()
            .filter(|id| {
                self.inner
                    .store
                    .get(*id)
                    .is_some_and(|record| RetryPolicy::is_transient(record.status))
            })
            .collect();
        if ids.is_empty() {
            return Vec::new();
        }

        let _bulk = BulkRetry::start(&self.inner.store);
        futures::future::join_all(
            ids.into_iter()
                .map(|id| async move { (id, self.retry_error(id).await) }),
        )
        .await
    }

    /// Remove a tracked failure. Unknown ids are ignored.
    pub fn dismiss_error(&self, id: ErrorId) {
        self.forget(id);
    }

    pub fn clear_errors(&self) {
        self.inner.store.clear_all();
        self.inner.lock_replays().clear();
    }

    /// Stop scheduling retries; pending backoffs end with [`ClientError::Shutdown`].
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    fn forget(&self, id: ErrorId) {
        self.inner.store.remove_error(id);
        self.inner.lock_replays().remove(&id);
    }
}

fn decode<T: DeserializeOwned>(response: HttpResponse) -> Result<T, ClientError> {
    response
        .json()
        .map_err(|e| ClientError::Decode(e.to_string()))
}
