//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Client secrets live in the gateway store, never in the TOML.

use oauth_client::{ProviderConfig, RevocationAuth};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub provider: ProviderSection,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// OAuth provider endpoints
#[derive(Debug, Deserialize)]
pub struct ProviderSection {
    pub authorize_url: String,
    pub token_url: String,
    pub revoke_url: String,
    pub redirect_uri: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub revocation_auth: RevocationAuth,
}

/// State token settings
#[derive(Debug, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_state_ttl")]
    pub ttl_secs: u64,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_state_ttl(),
        }
    }
}

/// Where records are persisted. Without a data dir everything is in memory.
#[derive(Debug, Default, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

fn default_timeout() -> u64 {
    10
}

fn default_max_connections() -> usize {
    1000
}

fn default_state_ttl() -> u64 {
    60
}

impl ProviderSection {
    /// Client-side view of the provider settings.
    pub fn to_provider_config(&self) -> common::Result<ProviderConfig> {
        let config = ProviderConfig::new(
            &self.authorize_url,
            &self.token_url,
            &self.revoke_url,
            self.redirect_uri.clone(),
        )
        .map_err(|e| common::Error::Config(e.to_string()))?;
        Ok(config
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_revocation_auth(self.revocation_auth))
    }
}

impl StateConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// `DATA_DIR` overrides `storage.data_dir`.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        for (field, url) in [
            ("provider.authorize_url", &config.provider.authorize_url),
            ("provider.token_url", &config.provider.token_url),
            ("provider.revoke_url", &config.provider.revoke_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(common::Error::invalid(
                    field,
                    format!("must start with http:// or https://, got: {url}"),
                ));
            }
        }

        if config.provider.redirect_uri.trim().is_empty() {
            return Err(common::Error::invalid(
                "provider.redirect_uri",
                "must not be empty",
            ));
        }

        if config.provider.timeout_secs == 0 {
            return Err(common::Error::invalid(
                "provider.timeout_secs",
                "must be greater than 0",
            ));
        }

        if config.state.ttl_secs == 0 {
            return Err(common::Error::invalid(
                "state.ttl_secs",
                "must be greater than 0",
            ));
        }

        if config.server.max_connections == 0 {
            return Err(common::Error::invalid(
                "server.max_connections",
                "must be greater than 0",
            ));
        }

        // Catches URLs that pass the prefix check but don't parse
        config.provider.to_provider_config()?;

        if let Ok(dir) = std::env::var("DATA_DIR") {
            if !dir.trim().is_empty() {
                config.storage.data_dir = Some(PathBuf::from(dir));
            }
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("oauth-token-manager.toml")
    }
}
