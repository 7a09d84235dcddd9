//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

use crate::error::{Result, TurnstileError};
use crate::ratelimit::{AddressSource, Limit, DEFAULT_NAMESPACE, REDIS_URL_ENV};

/// Prefix for environment overrides, e.g. `TURNSTILE__STORE__NAMESPACE`.
pub const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Where client addresses are read from: `peer_address` or
    /// `{ header: <name> }`
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub address_source: AddressSource,

    /// Route limits, in order
    #[serde(default)]
    pub limits: Vec<Limit>,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Redis URL. Falls back to the `REDIS_URL` environment variable.
    #[serde(default)]
    pub url: Option<String>,

    /// First segment of every counting key
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            namespace: default_namespace(),
        }
    }
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl TurnstileConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from an optional YAML file, then apply
    /// `TURNSTILE__*` environment overrides on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Yaml),
            );
        }

        builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| TurnstileError::Config(e.to_string()))
    }

    /// The Redis URL to connect to: `store.url`, else `REDIS_URL`.
    pub fn redis_url(&self) -> Result<String> {
        if let Some(url) = &self.store.url {
            return Ok(url.clone());
        }
        std::env::var(REDIS_URL_ENV).map_err(|_| {
            TurnstileError::Config(format!(
                "no store.url configured and {} is not set",
                REDIS_URL_ENV
            ))
        })
    }
}
