//! Configuration for shardpilot components

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Admin daemon config
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin: Option<AdminConfig>,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Admin daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Bind address for the HTTP API
    pub bind_addr: SocketAddr,

    /// RocksDB path for the topology store
    pub db_path: PathBuf,

    /// Default bound on waiting for node outcomes during a reparent
    #[serde(default = "default_wait_timeout")]
    pub default_wait_timeout_secs: u64,
}

fn default_wait_timeout() -> u64 {
    60
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:7000".parse().unwrap(),
            db_path: PathBuf::from("./topo-data"),
            default_wait_timeout_secs: default_wait_timeout(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            admin: None,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Reads `SHARDPILOT_CONFIG` (or `./shardpilot.toml` if unset) when the
    /// file exists, then applies `SHARDPILOT_`-prefixed environment
    /// variables on top. Falls back to defaults when nothing is present.
    pub fn load() -> Self {
        let path = std::env::var("SHARDPILOT_CONFIG")
            .unwrap_or_else(|_| "shardpilot.toml".to_string());

        let builder = config::Config::builder()
            .add_source(config::File::with_name(&path).required(false))
            .add_source(config::Environment::with_prefix("SHARDPILOT").separator("__"));

        match builder.build().and_then(|c| c.try_deserialize()) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config, using defaults: {}", e);
                Config::default()
            }
        }
    }
}
