//! Outbound HTTP collaborator.
//!
//! The resilience layer depends only on [`Transport`]; [`ReqwestTransport`] is the
//! production implementation.

use reqwest::Method;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::de::DeserializeOwned;
use std::time::Duration;

pub mod error;
mod reqwest_transport;

pub use error::TransportError;
pub use reqwest_transport::ReqwestTransport;

#[cfg(test)]
use mockall::automock;

/// A single fully-resolved HTTP call.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    /// Set on the one replay that follows a credential refresh.
    pub auth_replayed: bool,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            auth_replayed: false,
        }
    }

    pub fn authorization(&self) -> Option<&str> {
        self.headers
            .get(reqwest::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
    }
}

/// Status, headers and fully-read body of a response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// `Retry-After` in delta-seconds form.
    pub fn retry_after(&self) -> Option<Duration> {
        self.headers
            .get(RETRY_AFTER)?
            .to_str()
            .ok()?
            .trim()
            .parse::<u64>()
            .ok()
            .map(Duration::from_secs)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Turn a non-success status into an error.
    pub fn error_for_status(self) -> Result<Self, TransportError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(TransportError::from_response(&self))
        }
    }
}

/// Performs one HTTP call. Any response that arrives, whatever its status, is `Ok`;
/// `Err` means no response was received.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn retry_after_accepts_delta_seconds_only() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static(" 12 "));
        let response = HttpResponse::new(429, Vec::new()).with_headers(headers);
        assert_eq!(response.retry_after(), Some(Duration::from_secs(12)));

        let mut headers = HeaderMap::new();
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        let response = HttpResponse::new(429, Vec::new()).with_headers(headers);
        assert_eq!(response.retry_after(), None);
    }

    #[test]
    fn error_for_status_passes_success_through() {
        let ok = HttpResponse::new(204, Vec::new()).error_for_status();
        assert!(ok.is_ok());

        let err = HttpResponse::new(500, b"down".to_vec()).error_for_status();
        assert_eq!(err.unwrap_err().status(), Some(500));
    }

    #[test]
    fn json_decodes_body() {
        let response = HttpResponse::new(200, br#"{"id":4}"#.to_vec());
        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["id"], 4);
    }
}
