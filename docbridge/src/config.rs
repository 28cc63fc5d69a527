//! docbridge configuration types and loading

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use docstore::StoreConfig;
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::bus::get_socket_path;
use crate::handlers::DEFAULT_TOPIC_PREFIX;

/// Main docbridge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database connection and queue settings
    pub store: StoreConfig,

    /// Local bus settings
    pub bus: BusConfig,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .docbridge.yml
        let local_config = PathBuf::from(".docbridge.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/docbridge/docbridge.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("docbridge").join("docbridge.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Log level from the config file, read before logging is set up
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load(config_path).ok().and_then(|config| config.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Apply command-line overrides
    pub fn with_overrides(mut self, db: Option<&str>, socket: Option<&Path>) -> Self {
        if let Some(db) = db {
            self.store.address = db.to_string();
        }
        if let Some(socket) = socket {
            self.bus.socket_path = Some(socket.to_path_buf());
        }
        self
    }
}

/// Local bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Unix socket the listener binds; defaults to the runtime directory
    #[serde(rename = "socket-path")]
    pub socket_path: Option<PathBuf>,

    /// Topic prefix of the database processors
    #[serde(rename = "topic-prefix")]
    pub topic_prefix: String,

    /// Client timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
            timeout_ms: 5000,
        }
    }
}

impl BusConfig {
    pub fn socket_path(&self) -> PathBuf {
        self.socket_path.clone().unwrap_or_else(get_socket_path)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
