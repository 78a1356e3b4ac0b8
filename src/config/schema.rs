//! Configuration schema definitions.
//!
//! This module defines the complete configuration snapshot for the service.
//! All types derive Serde traits for deserialization from config files.
//! Unknown keys are ignored; `app.name` and `server.port` are required.

use serde::{de, Deserialize, Deserializer, Serialize};
use tracing::level_filters::LevelFilter;

/// Root configuration for the service.
///
/// Once loaded a `ServiceConfig` is never mutated; a reload builds a new
/// one and swaps it into the [`ConfigStore`](crate::config::ConfigStore).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Service identity.
    pub app: AppConfig,

    /// Network bind settings.
    pub server: ServerConfig,

    /// Optional TLS credential material.
    #[serde(default)]
    pub tls: Option<TlsConfig>,

    /// Relational storage connection parameters.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Cache connection parameters.
    #[serde(default)]
    pub redis: RedisConfig,

    /// Message queue connection parameters.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Logger settings.
    #[serde(default)]
    pub log: LogConfig,

    /// Panic recovery settings.
    #[serde(default)]
    pub recovery: RecoveryConfig,
}

/// Service identity.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    /// Service name, used in logs and the version endpoint.
    pub name: String,

    /// Deployment environment (e.g., "dev", "prod").
    #[serde(default = "default_env")]
    pub env: String,

    /// Service version string.
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_env() -> String {
    "dev".to_string()
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Network bind settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Bind host (e.g., "0.0.0.0").
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    pub port: u16,

    /// Total time allowed for a request/response in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl ServerConfig {
    /// The `host:port` string to bind to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

/// TLS credential material paths.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Relational storage settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection string. Empty disables the database.
    pub dsn: String,

    /// Maximum open connections in the pool.
    pub max_open_conns: u32,

    /// Maximum idle connections kept in the pool.
    pub max_idle_conns: u32,

    /// Connection lifetime in seconds.
    pub conn_max_lifetime_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dsn: String::new(),
            max_open_conns: 100,
            max_idle_conns: 10,
            conn_max_lifetime_secs: 3600,
        }
    }
}

/// Cache settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Server address (e.g., "127.0.0.1:6379").
    pub addr: String,

    /// Password. Empty means no AUTH.
    pub password: String,

    /// Logical database index (0-15).
    pub db: u8,

    /// Connection pool size.
    pub pool_size: u32,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:6379".to_string(),
            password: String::new(),
            db: 0,
            pool_size: 10,
        }
    }
}

/// Message queue settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct QueueConfig {
    /// Broker addresses.
    pub brokers: Vec<String>,

    /// Topic to produce to / consume from.
    pub topic: String,

    /// Consumer group id.
    pub group: String,
}

/// Logger settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Minimum level emitted.
    pub level: LogLevel,

    /// Log file path. `None` writes to stdout.
    pub filename: Option<String>,

    /// Rotate once the file would exceed this many megabytes.
    pub max_size_mb: u64,

    /// Rotated files to keep (0 keeps all).
    pub max_backups: usize,

    /// Days to keep rotated files (0 keeps all).
    pub max_age_days: u64,

    /// Compress rotated files. Accepted but not acted on.
    pub compress: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            filename: None,
            max_size_mb: 100,
            max_backups: 7,
            max_age_days: 30,
            compress: false,
        }
    }
}

/// Log severity threshold.
///
/// Parsed case-insensitively (`info`, `INFO`, `Info`); `warning` is
/// accepted for `warn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(format!(
                "unknown log level `{other}`, expected one of trace, debug, info, warn, error"
            )),
        }
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

/// Panic recovery settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Capture and log the call stack for recovered panics.
    pub stack: bool,
}
