//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (BEACON_HOST, BEACON_PORT)
//! - TOML configuration file

use anyhow::{Context, Result};
use beacon_core::{HubConfig, KeepaliveConfig};
use beacon_transport::websocket::WebSocketConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Keepalive configuration.
    #[serde(default)]
    pub keepalive: KeepaliveSettings,

    /// Hub behavior.
    #[serde(default)]
    pub hub: HubSettings,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for the dashboard WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Paths that accept broadcast triggers.
    #[serde(default = "default_broadcast_paths")]
    pub broadcast_paths: Vec<String>,

    /// Frames queued per socket before the socket is dropped.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,

    /// Maximum inbound frame and trigger body size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Keepalive configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepaliveSettings {
    /// Expected client ping cadence in milliseconds.
    #[serde(default = "default_client_ping_interval")]
    pub client_ping_interval_ms: u64,

    /// Silent intervals before a connection is dead.
    #[serde(default = "default_dead_after_intervals")]
    pub dead_after_intervals: u32,

    /// Background sweep period in milliseconds. 0 disables the sweep.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,
}

/// Hub behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSettings {
    /// Relay client `message` frames to every dashboard.
    #[serde(default = "default_true")]
    pub relay_client_messages: bool,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("BEACON_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("BEACON_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_broadcast_paths() -> Vec<String> {
    vec!["/broadcast".to_string(), "/api/broadcast".to_string()]
}

fn default_outbound_queue() -> usize {
    64
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_client_ping_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_dead_after_intervals() -> u32 {
    3
}

fn default_sweep_interval() -> u64 {
    30_000
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            keepalive: KeepaliveSettings::default(),
            hub: HubSettings::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            broadcast_paths: default_broadcast_paths(),
            outbound_queue: default_outbound_queue(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for KeepaliveSettings {
    fn default() -> Self {
        Self {
            client_ping_interval_ms: default_client_ping_interval(),
            dead_after_intervals: default_dead_after_intervals(),
            sweep_interval_ms: default_sweep_interval(),
        }
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            relay_client_messages: true,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "beacon.toml",
            "/etc/beacon/beacon.toml",
            "~/.config/beacon/beacon.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Hub settings derived from this file.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            keepalive: KeepaliveConfig {
                client_ping_interval: Duration::from_millis(self.keepalive.client_ping_interval_ms),
                dead_after_intervals: self.keepalive.dead_after_intervals,
            },
            relay_client_messages: self.hub.relay_client_messages,
        }
    }

    /// Per-socket transport settings.
    #[must_use]
    pub fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig {
            outbound_queue: self.transport.outbound_queue,
        }
    }

    /// Background sweep period, if enabled.
    #[must_use]
    pub fn sweep_interval(&self) -> Option<Duration> {
        match self.keepalive.sweep_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.transport.websocket_path, "/ws");
        assert_eq!(
            config.transport.broadcast_paths,
            vec!["/broadcast", "/api/broadcast"]
        );
        assert!(config.hub.relay_client_messages);
        assert_eq!(config.sweep_interval(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_config_bind_addr() {
        let mut config = Config::default();
        config.host = "127.0.0.1".into();
        config.port = 8080;
        assert_eq!(config.bind_addr().unwrap().port(), 8080);

        config.host = "not a host".into();
        assert!(config.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [keepalive]
            client_ping_interval_ms = 10000
            dead_after_intervals = 2
            sweep_interval_ms = 0

            [hub]
            relay_client_messages = false
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.sweep_interval(), None);
        assert_eq!(config.transport.outbound_queue, 64);

        let hub = config.hub_config();
        assert_eq!(hub.keepalive.dead_after(), Duration::from_secs(20));
        assert!(!hub.relay_client_messages);
    }
}
