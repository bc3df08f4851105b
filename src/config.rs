//! Application configuration.

use crate::consts::client_consts::{CONFIG_DIR_NAME, transport};
use crate::network::{CacheConfig, ProbeConfig, RetryConfig, ThrottleConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "config.json";
pub const CREDENTIALS_FILE_NAME: &str = "credentials.json";

pub const BASE_URL_ENV: &str = "APIGUARD_BASE_URL";
pub const REQUEST_TIMEOUT_ENV: &str = "APIGUARD_REQUEST_TIMEOUT_MS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not determine the home directory")]
    NoHomeDirectory,

    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value {value:?} for {name}")]
    InvalidEnv { name: &'static str, value: String },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Endpoint that exchanges a refresh token for a new credential.
    pub refresh_url: Option<String>,
    pub retry: RetryConfig,
    pub throttle: ThrottleConfig,
    pub probe: ProbeConfig,
    pub cache: CacheConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: transport::DEFAULT_BASE_URL.to_string(),
            request_timeout_ms: transport::REQUEST_TIMEOUT_MS,
            connect_timeout_ms: transport::CONNECT_TIMEOUT_MS,
            refresh_url: None,
            retry: RetryConfig::default(),
            throttle: ThrottleConfig::default(),
            probe: ProbeConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Loads configuration from a JSON file at the given path. Missing fields take defaults.
    ///
    /// # Errors
    /// Returns a `ConfigError` if reading from file fails or JSON is invalid.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let buf = fs::read(path)?;
        Ok(serde_json::from_slice(&buf)?)
    }

    /// Like [`Self::load_from_file`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Saves the configuration to a JSON file at the given path.
    ///
    /// Directories will be created if they don't exist. This method overwrites existing files.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Apply `APIGUARD_*` environment overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| env::var(name).ok())
    }

    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(base_url) = lookup(BASE_URL_ENV) {
            self.base_url = base_url;
        }
        if let Some(value) = lookup(REQUEST_TIMEOUT_ENV) {
            self.request_timeout_ms =
                value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidEnv {
                        name: REQUEST_TIMEOUT_ENV,
                        value,
                    })?;
        }
        Ok(())
    }
}

fn config_dir() -> Result<PathBuf, ConfigError> {
    let home = home::home_dir().ok_or(ConfigError::NoHomeDirectory)?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// `~/.apiguard/config.json`
pub fn get_config_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// `~/.apiguard/credentials.json`
pub fn get_credentials_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join(CREDENTIALS_FILE_NAME))
}
