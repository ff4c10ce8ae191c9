//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! `SESSION_BASE_URL` overrides the upstream base URL so the same file can be
//! pointed at different API deployments.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub listen: ListenConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    pub session: SessionConfig,
}

/// Local HTTP listener
#[derive(Debug, Deserialize)]
pub struct ListenConfig {
    pub addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// The API every request is forwarded to
#[derive(Debug, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Where the credential pair is persisted
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    pub storage_dir: PathBuf,
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000/api".into()
}

fn default_timeout() -> u64 {
    15
}

fn default_max_connections() -> usize {
    1000
}

fn default_storage_key() -> String {
    session_auth::STORAGE_KEY.into()
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(base_url) = std::env::var("SESSION_BASE_URL") {
            config.upstream.base_url = base_url;
        }

        if !config.upstream.base_url.starts_with("http://")
            && !config.upstream.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                config.upstream.base_url
            )));
        }

        if config.upstream.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.listen.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if config.session.storage_key.trim().is_empty() {
            return Err(common::Error::Config("storage_key must not be empty".into()));
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
        PathBuf::from("session-proxy.toml")
    }
}
