//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::fastcgi::Transport;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Virtual hosts matched by exact host name.
    pub vhosts: Vec<VhostConfig>,

    /// Host used when no alias matches.
    pub default_vhost: VhostConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Request size limits.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// One virtual host.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VhostConfig {
    /// Host names served by this vhost (exact match).
    pub names: Vec<String>,

    /// Document root.
    pub root: PathBuf,

    /// Index files tried in order for `/`.
    pub index: Vec<String>,

    /// Responder for dynamic files. Without one, every file is static.
    pub fastcgi: Option<FastcgiConfig>,
}

impl Default for VhostConfig {
    fn default() -> Self {
        Self {
            names: Vec::new(),
            root: PathBuf::from("./www"),
            index: default_index(),
            fastcgi: None,
        }
    }
}

fn default_index() -> Vec<String> {
    vec!["index.html".to_string()]
}

/// FastCGI responder endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FastcgiConfig {
    /// `tcp` or `unix`.
    #[serde(default)]
    pub network: Transport,

    /// `host:port` for tcp, socket path for unix.
    pub address: String,

    /// File extensions handed to the responder (leading dot optional).
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

fn default_extensions() -> Vec<String> {
    vec!["php".to_string()]
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds (0 = none).
    pub connect_secs: u64,

    /// How long shutdown waits for in-flight connections, in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            shutdown_grace_secs: 30,
        }
    }
}

/// Request size limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum bytes in the request line plus headers.
    pub max_header_bytes: usize,

    /// Maximum declared Content-Length in bytes.
    pub max_body_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_header_bytes: 16 * 1024,
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// `pretty` or `json`.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}
