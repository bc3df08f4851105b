//! Client-side network resilience for HTTP APIs.
//!
//! [`HttpClient`] turns an unreliable, rate-limited and occasionally unauthenticated API into
//! classified, retried and deduplicated requests, with a shared [`ErrorStore`] as the single
//! picture of what is currently failing.

pub mod auth;
pub mod cli_messages;
pub mod config;
pub mod consts;
pub mod error_classifier;
pub mod errors;
pub mod events;
pub mod logging;
pub mod network;
pub mod system;
pub mod transport;

pub use auth::{AuthError, Credential, CredentialProvider, NoCredentials};
pub use config::{ClientConfig, ConfigError};
pub use errors::{ErrorId, ErrorKind, ErrorRecord, ErrorStore, NetworkStatus};
pub use events::{ClientEvent, EventBus};
pub use network::{ApiRequest, ClientError, HttpClient, HttpClientBuilder};
pub use transport::{HttpRequest, HttpResponse, Transport, TransportError};
