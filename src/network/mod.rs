//! The resilience pipeline and its building blocks.

pub mod cache;
pub mod client;
pub mod dedup;
pub mod error;
pub mod probe;
pub mod retry;
pub mod throttle;

pub use cache::{CacheConfig, ResponseCache};
pub use client::{ApiRequest, HttpClient, HttpClientBuilder};
pub use dedup::Deduplicator;
pub use error::ClientError;
pub use probe::{
    ConnectivityCheck, ConnectivityTransition, HttpConnectivityCheck, NetworkProbe, ProbeConfig,
    ProbeHandle,
};
pub use retry::{RetryConfig, RetryPolicy};
pub use throttle::{EndpointLimit, ThrottleConfig, Throttler};
