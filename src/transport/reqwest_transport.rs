//! reqwest-backed [`Transport`].

use super::{HttpRequest, HttpResponse, Transport, TransportError};
use crate::consts::client_consts::transport;
use reqwest::{Client, ClientBuilder};
use std::time::Duration;

// User-Agent string with crate version
const USER_AGENT: &str = concat!("apiguard/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportError> {
        Self::with_timeouts(transport::connect_timeout(), transport::request_timeout())
    }

    /// `request_timeout` is a hard ceiling; the client façade applies its own, usually
    /// shorter, per-call timeout on top.
    pub fn with_timeouts(
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = ClientBuilder::new()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();

        Ok(HttpResponse::new(status, body).with_headers(headers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Method;

    #[tokio::test]
    /// A refused connection surfaces as a status-less transport error.
    async fn unreachable_host_is_a_connection_error() {
        let transport =
            ReqwestTransport::with_timeouts(Duration::from_millis(200), Duration::from_millis(500))
                .unwrap();
        // Port 9 (discard) on loopback is closed on CI machines.
        let result = transport
            .send(HttpRequest::new(Method::GET, "http://127.0.0.1:9/health"))
            .await;

        let error = result.unwrap_err();
        assert_eq!(error.status(), None);
    }

    #[tokio::test]
    #[ignore] // This test requires network access.
    async fn fetches_a_live_page() {
        let transport = ReqwestTransport::new().unwrap();
        let response = transport
            .send(HttpRequest::new(Method::GET, "https://example.com/"))
            .await
            .unwrap();
        assert!(response.is_success());
    }
}
