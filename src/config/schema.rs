//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the daemon.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the control channel daemon.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Control channel listener settings.
    pub listener: ListenerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// IPv4 or IPv6 literal to bind (e.g., "127.0.0.1", "::1").
    pub address: String,

    /// TCP port.
    pub port: u16,

    /// Time allowed to receive a complete request, in milliseconds.
    pub request_timeout_ms: u64,

    /// Time a persistent connection may stay idle, in milliseconds.
    pub idle_timeout_ms: u64,

    /// Largest accepted request body in bytes.
    pub max_request_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 8000,
            request_timeout_ms: 10_000,
            idle_timeout_ms: 30_000,
            max_request_size: 1024 * 1024, // 1MB
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Include module targets in log lines.
    pub log_targets: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_targets: true,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: DaemonConfig = toml::from_str(
            r#"
            [listener]
            port = 8080
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.port, 8080);
        assert_eq!(config.listener.address, "127.0.0.1");
        assert_eq!(config.listener.idle_timeout_ms, 30_000);
        assert_eq!(config.observability, ObservabilityConfig::default());
    }

    #[test]
    fn empty_file_is_default() {
        let config: DaemonConfig = toml::from_str("").unwrap();
        assert_eq!(config, DaemonConfig::default());
    }
}
