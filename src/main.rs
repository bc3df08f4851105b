use apiguard::auth::{Credential, CredentialStore, StoredCredentialProvider};
use apiguard::cli_messages::{format_error_record, format_network_status, print_client_error};
use apiguard::config::{ClientConfig, get_config_path, get_credentials_path};
use apiguard::errors::ErrorStore;
use apiguard::events::EventBus;
use apiguard::logging::{init_logging, parse_rust_log_level};
use apiguard::network::{
    ApiRequest, HttpClient, HttpClientBuilder, HttpConnectivityCheck, NetworkProbe, ProbeHandle,
};
use apiguard::transport::{ReqwestTransport, Transport};
use apiguard::{print_cmd_error, print_cmd_info, print_cmd_success};
use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
/// Resilient command-line HTTP client
struct Args {
    /// Config file (defaults to ~/.apiguard/config.json)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log level; overrides RUST_LOG
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send a GET request and print the response body
    Get {
        /// Endpoint path relative to the base URL
        endpoint: String,

        /// Query parameter as KEY=VALUE; may be repeated
        #[arg(long = "query", short = 'q', value_name = "KEY=VALUE")]
        query: Vec<String>,
    },
    /// Send a JSON POST request and print the response body
    Post {
        endpoint: String,

        /// JSON request body
        #[arg(long, value_name = "JSON")]
        data: String,
    },
    /// Check connectivity to the API
    Probe,
    /// Store a credential for subsequent requests
    Login {
        #[arg(long, value_name = "TOKEN")]
        token: String,

        #[arg(long, value_name = "TOKEN")]
        refresh_token: Option<String>,
    },
    /// Delete the stored credential
    Logout,
    /// Show the effective configuration and credential state
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logging(args.log_level.as_deref().map(parse_rust_log_level));

    let config_path = match args.config {
        Some(path) => path,
        None => get_config_path()?,
    };
    let mut config = ClientConfig::load_or_default(&config_path)?;
    config.apply_env_overrides()?;
    let credentials = CredentialStore::new(get_credentials_path()?);

    match args.command {
        Command::Get { endpoint, query } => {
            let mut request = ApiRequest::get(endpoint);
            for pair in query {
                let (key, value) = pair.split_once('=').ok_or_else(|| {
                    format!("Invalid query parameter {:?}; expected KEY=VALUE", pair)
                })?;
                request = request.query(key, value);
            }
            send(&config, &credentials, request).await
        }
        Command::Post { endpoint, data } => {
            let body: serde_json::Value =
                serde_json::from_str(&data).map_err(|e| format!("Invalid JSON body: {}", e))?;
            send(&config, &credentials, ApiRequest::post(endpoint).json(&body)?).await
        }
        Command::Probe => {
            let store = ErrorStore::new(EventBus::new());
            let probe = NetworkProbe::from_config(
                store.clone(),
                connectivity_check(&config)?,
                &config.probe,
            );
            let reachable = probe.probe_once().await;
            let status = format_network_status(&store.network_status());
            if reachable {
                print_cmd_success!("API reachable", "{}", status);
                Ok(())
            } else {
                print_cmd_error!("API unreachable", status.as_str());
                Err(Box::from(format!("{} is unreachable", probe_url(&config))))
            }
        }
        Command::Login {
            token,
            refresh_token,
        } => {
            let mut credential = Credential::new(token);
            credential.refresh_token = refresh_token;
            credentials.save(&credential).await?;
            print_cmd_success!("Credential saved", "{}", credentials.path().display());
            Ok(())
        }
        Command::Logout => {
            println!("Logging out and clearing stored credential...");
            credentials.clear().await?;
            Ok(())
        }
        Command::Status => {
            print_cmd_info!("Config", "{}", config_path.display());
            print_cmd_info!("Base URL", "{}", config.base_url);
            let logged_in = credentials.load().await?.is_some();
            print_cmd_info!(
                "Credential",
                "{}",
                if logged_in { "stored" } else { "none" }
            );
            print_cmd_info!(
                "Retry",
                "{} attempts, {}ms base delay, x{}",
                config.retry.max_attempts,
                config.retry.base_delay_ms,
                config.retry.multiplier
            );
            Ok(())
        }
    }
}

fn probe_url(config: &ClientConfig) -> String {
    config
        .probe
        .url
        .clone()
        .unwrap_or_else(|| config.base_url.clone())
}

fn transport(config: &ClientConfig) -> Result<Arc<dyn Transport>, Box<dyn Error>> {
    Ok(Arc::new(ReqwestTransport::with_timeouts(
        config.connect_timeout(),
        config.request_timeout(),
    )?))
}

fn connectivity_check(
    config: &ClientConfig,
) -> Result<Arc<HttpConnectivityCheck>, Box<dyn Error>> {
    Ok(Arc::new(HttpConnectivityCheck::new(
        transport(config)?,
        probe_url(config),
    )))
}

fn build_client(
    config: &ClientConfig,
    credentials: &CredentialStore,
) -> Result<HttpClient, Box<dyn Error>> {
    let refresh_client = reqwest::Client::builder()
        .timeout(config.request_timeout())
        .build()?;
    let provider = StoredCredentialProvider::new(
        credentials.clone(),
        refresh_client,
        config.refresh_url.clone(),
    );
    Ok(HttpClientBuilder::from_config(transport(config)?, config)
        .credentials(Arc::new(provider))
        .build())
}

async fn send(
    config: &ClientConfig,
    credentials: &CredentialStore,
    request: ApiRequest,
) -> Result<(), Box<dyn Error>> {
    let client = build_client(config, credentials)?;
    let probe: Option<ProbeHandle> = if config.probe.enabled {
        Some(
            NetworkProbe::from_config(
                client.store().clone(),
                connectivity_check(config)?,
                &config.probe,
            )
            .spawn(),
        )
    } else {
        None
    };

    let result = client.request(request).await;
    if let Some(probe) = probe {
        probe.shutdown().await;
    }

    let outcome = match result {
        Ok(response) => {
            println!("{}", response.text());
            Ok(())
        }
        Err(error) => {
            print_client_error(&error);
            for record in client.store().errors() {
                log::debug!("{}", format_error_record(&record));
            }
            Err(Box::new(error) as Box<dyn Error>)
        }
    };
    client.store().dispose();
    outcome
}
