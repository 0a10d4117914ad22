//! Configuration loading.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server identity.
    pub server: ServerConfig,
    /// Network listen configuration.
    pub listen: ListenConfig,
    /// Optional TLS listen configuration.
    pub tls: Option<TlsConfig>,
    /// Remote chat backend endpoints.
    pub backend: BackendConfig,
}

/// Server identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server name (e.g., "gate.example.net").
    pub name: String,
    /// Network name shown when the login has no guild scope.
    pub network: String,
    /// MOTD lines.
    #[serde(default)]
    pub motd: Vec<String>,
}

/// Network listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    /// Address to bind to (e.g., "0.0.0.0:6667").
    pub address: SocketAddr,
}

/// TLS listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    /// Address to bind to for TLS (e.g., "0.0.0.0:6697").
    pub address: SocketAddr,
    /// Path to certificate file (PEM format).
    pub cert_path: String,
    /// Path to private key file (PEM format).
    pub key_path: String,
}

/// Remote backend endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Base URL for REST lookups (e.g., "https://chat.example.com/api").
    pub api_url: String,
    /// WebSocket URL for the event stream.
    pub gateway_url: String,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.name.is_empty() {
            return Err(ConfigError::Invalid("server.name must not be empty".into()));
        }
        if !self.backend.gateway_url.starts_with("ws") {
            return Err(ConfigError::Invalid(
                "backend.gateway_url must be a ws:// or wss:// URL".into(),
            ));
        }
        Ok(())
    }
}
