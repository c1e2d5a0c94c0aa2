//! Configuration for veilnet-provider.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Keep-alive options for the per-session liveness loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepAliveConfig {
    /// Interval between keep-alive pings, in seconds.
    #[serde(default = "default_send_interval")]
    pub send_interval_secs: u64,

    /// Per-send timeout, in seconds.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,

    /// Number of consecutive send failures tolerated before the
    /// peer-to-peer channel is closed.
    #[serde(default = "default_max_send_err_count")]
    pub max_send_err_count: usize,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            send_interval_secs: default_send_interval(),
            send_timeout_secs: default_send_timeout(),
            max_send_err_count: default_max_send_err_count(),
        }
    }
}

impl KeepAliveConfig {
    /// Interval between keep-alive pings.
    #[must_use]
    pub fn send_interval(&self) -> Duration {
        Duration::from_secs(self.send_interval_secs)
    }

    /// Per-send timeout.
    #[must_use]
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

const fn default_send_interval() -> u64 {
    180 // 3 minutes
}

const fn default_send_timeout() -> u64 {
    5
}

const fn default_max_send_err_count() -> usize {
    5
}

/// Provider node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Keep-alive options.
    #[serde(default)]
    pub keep_alive: KeepAliveConfig,

    /// Window within which the consumer must settle the first invoice,
    /// in seconds. Admission fails and the session is destroyed when
    /// the window elapses.
    #[serde(default = "default_first_invoice_timeout")]
    pub first_invoice_timeout_secs: u64,

    /// Chain id used when fetching settlement fees.
    #[serde(default = "default_chain_id")]
    pub chain_id: i64,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            keep_alive: KeepAliveConfig::default(),
            first_invoice_timeout_secs: default_first_invoice_timeout(),
            chain_id: default_chain_id(),
            log_level: default_log_level(),
        }
    }
}

impl ProviderConfig {
    /// Window within which the consumer must settle the first invoice.
    #[must_use]
    pub fn first_invoice_timeout(&self) -> Duration {
        Duration::from_secs(self.first_invoice_timeout_secs)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &std::path::Path) -> crate::Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

const fn default_first_invoice_timeout() -> u64 {
    30
}

const fn default_chain_id() -> i64 {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}
