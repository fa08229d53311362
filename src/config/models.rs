//! Configuration data structures for apigate.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files and to
//! `APIGATE_*` environment variables. Every section carries defaults so that a
//! deployment only has to supply the master key.
use std::{
    net::{AddrParseError, SocketAddr},
    path::PathBuf,
};

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway process.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Overrides the port part of `listen_addr` (the `PORT` variable lands here).
    pub port: Option<u16>,
    /// Opens the admin surface and bypasses rate limiting.
    pub master_api_key: Option<String>,
    /// Used by the status page; bypasses rate limiting but cannot administer.
    pub status_page_api_key: Option<String>,
    pub storage: StorageConfig,
    pub api_keys: ApiKeyConfig,
    pub rate_limit: RateLimitConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
    pub http: HttpConfig,
}

impl ServerConfig {
    /// Resolve the socket address to bind, applying the `port` override.
    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        let mut addr: SocketAddr = self.listen_addr.parse()?;
        if let Some(port) = self.port {
            addr.set_port(port);
        }
        Ok(addr)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
            port: None,
            master_api_key: None,
            status_page_api_key: None,
            storage: StorageConfig::default(),
            api_keys: ApiKeyConfig::default(),
            rate_limit: RateLimitConfig::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

/// Locations of every persisted store.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON array of issued API keys.
    pub api_keys_file: PathBuf,
    /// JSON array of status-monitor targets.
    pub monitored_endpoints_file: PathBuf,
    /// Directory holding `<slug>.json` definitions and `<slug>.handler` sources.
    pub routes_dir: PathBuf,
    /// Static files served after every API route failed to match.
    pub public_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            api_keys_file: PathBuf::from("userApiKeys.json"),
            monitored_endpoints_file: PathBuf::from("public/data/monitoredEndpoints.json"),
            routes_dir: PathBuf::from("public/routes"),
            public_dir: Some(PathBuf::from("public")),
        }
    }
}

/// Shape of generated API keys.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ApiKeyConfig {
    pub prefix: String,
    /// Number of alphanumeric characters appended to the prefix.
    pub random_length: usize,
}

impl Default for ApiKeyConfig {
    fn default() -> Self {
        Self {
            prefix: "matic-".to_string(),
            random_length: 18,
        }
    }
}

fn default_status_code() -> u16 {
    429
}

fn default_message() -> String {
    "Too many requests, please try again after 10 minutes.".to_string()
}

fn default_requests() -> u32 {
    100
}

fn default_period() -> String {
    "10m".to_string()
}

/// Per-identity quota applied to dynamic API routes.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_requests")]
    pub requests: u32,
    #[serde(default = "default_period")]
    pub period: String, // Parsed by humantime, e.g., "30s", "10m", "1h"
    #[serde(default = "default_status_code")]
    pub status_code: u16,
    #[serde(default = "default_message")]
    pub message: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: default_requests(),
            period: default_period(),
            status_code: default_status_code(),
            message: default_message(),
        }
    }
}

/// How `requestsPerSecond` is derived in the metrics snapshot.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ThroughputMode {
    /// Ring of per-second buckets; reads never mutate it.
    #[default]
    Windowed,
    /// Count since the previous read, reset on every read.
    SinceLastRead,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MetricsConfig {
    pub throughput: ThroughputMode,
    pub window_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            throughput: ThroughputMode::Windowed,
            window_secs: 60,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            level: "info".to_string(),
        }
    }
}

/// Cross-cutting HTTP behaviour.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub cors_enabled: bool,
    pub body_limit_bytes: usize,
    /// Number of reverse proxies in front of the gateway whose
    /// `X-Forwarded-For` entries are trusted.
    pub trusted_proxy_hops: usize,
    pub compression: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            cors_enabled: true,
            body_limit_bytes: 5 * 1024 * 1024,
            trusted_proxy_hops: 1,
            compression: true,
        }
    }
}
