//! Store configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Address used when none is configured (bare hosts get a `mongodb://` prefix)
pub const DEFAULT_ADDRESS: &str = "localhost";

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database address: a MongoDB URI, a bare host, or `memory://`
    #[serde(default = "default_address")]
    pub address: String,

    /// Outstanding commands the queue holds before callers are suspended
    #[serde(rename = "queue-capacity", default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Documents buffered per find result stream
    #[serde(rename = "result-buffer", default = "default_result_buffer")]
    pub result_buffer: usize,

    /// Delay before the first reconnect attempt
    #[serde(rename = "reconnect-interval-ms", default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    /// Ceiling for the doubling reconnect delay; equal to the base interval means a fixed delay
    #[serde(rename = "max-reconnect-interval-ms", default = "default_reconnect_interval_ms")]
    pub max_reconnect_interval_ms: u64,
}

fn default_address() -> String {
    DEFAULT_ADDRESS.to_string()
}

fn default_queue_capacity() -> usize {
    64
}

fn default_result_buffer() -> usize {
    64
}

fn default_reconnect_interval_ms() -> u64 {
    1000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            queue_capacity: default_queue_capacity(),
            result_buffer: default_result_buffer(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            max_reconnect_interval_ms: default_reconnect_interval_ms(),
        }
    }
}

impl StoreConfig {
    /// Config for the given address with every other setting at its default
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    /// Get the base reconnect delay as a Duration
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// Get the reconnect delay ceiling; never below the base delay
    pub fn max_reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_interval_ms.max(self.reconnect_interval_ms))
    }
}
