//! # Configuration Management
//!
//! Centralized configuration for the device link, the virtual node proxy and the
//! traceroute scheduler.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Environment variables via `from_env()`
//! - Direct instantiation with defaults
//!
//! Durations are written as milliseconds in TOML.
//!
//! ## Example
//! ```toml
//! [device]
//! host = "192.168.1.50"
//! port = 4403
//!
//! [proxy]
//! enabled = true
//! port = 4404
//! denylist = ["ADMIN_APP", "REMOTE_HARDWARE_APP", "DISCONNECT"]
//!
//! [traceroute]
//! interval = 180000
//! ```

use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// Default TCP port of the physical device
pub const DEFAULT_DEVICE_PORT: u16 = 4403;

/// Default listen port of the virtual node proxy
pub const DEFAULT_PROXY_PORT: u16 = 4404;

/// Records kept per message and telemetry history
pub const DEFAULT_HISTORY_LIMIT: usize = 10_000;

/// Message types proxy clients may never send to the shared device
pub const DEFAULT_DENYLIST: [&str; 3] = ["ADMIN_APP", "REMOTE_HARDWARE_APP", "DISCONNECT"];

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct MeshLinkConfig {
    /// Physical device connection
    #[serde(default)]
    pub device: DeviceConfig,

    /// Virtual node proxy
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Traceroute scheduler
    #[serde(default)]
    pub traceroute: TracerouteConfig,

    /// In-memory history retention
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl MeshLinkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of the defaults.
    ///
    /// Unparseable numeric values are rejected rather than silently ignored.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply environment-style overrides from any lookup function.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("MESHTASTIC_NODE_IP") {
            self.device.host = host;
        }

        if let Some(port) = lookup("MESHTASTIC_TCP_PORT") {
            self.device.port = parse_env("MESHTASTIC_TCP_PORT", &port)?;
        }

        if let Some(port) = lookup("MESHLINK_PROXY_PORT") {
            self.proxy.port = parse_env("MESHLINK_PROXY_PORT", &port)?;
        }

        if let Some(enabled) = lookup("MESHLINK_PROXY_ENABLED") {
            self.proxy.enabled = parse_env("MESHLINK_PROXY_ENABLED", &enabled)?;
        }

        if let Some(secs) = lookup("MESHLINK_TRACEROUTE_INTERVAL_SECS") {
            let secs: u64 = parse_env("MESHLINK_TRACEROUTE_INTERVAL_SECS", &secs)?;
            self.traceroute.interval = Duration::from_secs(secs);
        }

        if let Some(level) = lookup("MESHLINK_LOG_LEVEL") {
            self.logging.log_level = Level::from_str(&level).map_err(|_| {
                ProtocolError::ConfigError(format!("Invalid MESHLINK_LOG_LEVEL: {level}"))
            })?;
        }

        Ok(())
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.device.validate());
        errors.extend(self.proxy.validate());
        errors.extend(self.traceroute.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.logging.validate());

        if self.proxy.enabled && self.proxy.port == self.device.port && self.device.is_local() {
            errors.push(format!(
                "Proxy port {} collides with the device port on a local device",
                self.proxy.port
            ));
        }

        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ProtocolError::ConfigError(format!("Invalid value for {key}: '{value}'")))
}

/// Physical device connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device hostname or IP address
    pub host: String,

    /// Device TCP port
    pub port: u16,

    /// Timeout for the TCP connect
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Bound on the config handshake
    #[serde(with = "duration_serde")]
    pub config_timeout: Duration,

    /// Silence tolerated while streaming before reconnecting
    #[serde(with = "duration_serde")]
    pub liveness_timeout: Duration,

    /// Interval between heartbeats while streaming
    #[serde(with = "duration_serde")]
    pub heartbeat_interval: Duration,

    /// First reconnect delay
    #[serde(with = "duration_serde")]
    pub backoff_base: Duration,

    /// Reconnect delay cap
    #[serde(with = "duration_serde")]
    pub backoff_max: Duration,

    /// Fractional jitter applied to each reconnect delay (0.0 - 1.0)
    pub backoff_jitter: f64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: String::from("127.0.0.1"),
            port: DEFAULT_DEVICE_PORT,
            connect_timeout: timeout::DEFAULT_TIMEOUT,
            config_timeout: timeout::CONFIG_TIMEOUT,
            liveness_timeout: timeout::LIVENESS_TIMEOUT,
            heartbeat_interval: timeout::KEEPALIVE_INTERVAL,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
            backoff_jitter: 0.2,
        }
    }
}

impl DeviceConfig {
    /// `host:port` as handed to the TCP connector
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn is_local(&self) -> bool {
        matches!(self.host.as_str(), "127.0.0.1" | "localhost" | "::1" | "0.0.0.0")
    }

    /// Validate device configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.host.trim().is_empty() {
            errors.push("Device host cannot be empty".to_string());
        }

        if self.port == 0 {
            errors.push("Device port cannot be 0".to_string());
        }

        if self.connect_timeout.as_millis() < 100 {
            errors.push("Connect timeout too short (minimum: 100ms)".to_string());
        } else if self.connect_timeout.as_secs() > 300 {
            errors.push("Connect timeout too long (maximum: 300s)".to_string());
        }

        if self.config_timeout.as_millis() < 100 {
            errors.push("Config timeout too short (minimum: 100ms)".to_string());
        }

        if self.heartbeat_interval.as_millis() < 100 {
            errors.push("Heartbeat interval too short (minimum: 100ms)".to_string());
        } else if self.heartbeat_interval.as_secs() > 3600 {
            errors.push("Heartbeat interval too long (maximum: 1 hour)".to_string());
        }

        if self.liveness_timeout <= self.heartbeat_interval {
            errors.push(format!(
                "Liveness timeout ({}ms) must exceed the heartbeat interval ({}ms)",
                self.liveness_timeout.as_millis(),
                self.heartbeat_interval.as_millis()
            ));
        }

        if self.backoff_base.is_zero() {
            errors.push("Backoff base must be greater than 0".to_string());
        }

        if self.backoff_max < self.backoff_base {
            errors.push("Backoff max cannot be smaller than backoff base".to_string());
        }

        if !(0.0..=1.0).contains(&self.backoff_jitter) {
            errors.push(format!(
                "Invalid backoff jitter: {} (valid range: 0.0-1.0)",
                self.backoff_jitter
            ));
        }

        errors
    }
}

/// Virtual node proxy settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Whether the proxy listener runs at all
    pub enabled: bool,

    /// Listen address
    pub bind_address: String,

    /// Listen port
    pub port: u16,

    /// Minimum gap between two frames written to the device
    #[serde(with = "duration_serde")]
    pub send_gap: Duration,

    /// Maximum concurrently connected clients
    pub max_clients: usize,

    /// Maximum frames waiting in the shared outbound queue
    pub outbound_queue_limit: usize,

    /// Message types refused from clients (port names such as `ADMIN_APP`, or `DISCONNECT`)
    pub denylist: Vec<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: String::from("0.0.0.0"),
            port: DEFAULT_PROXY_PORT,
            send_gap: Duration::from_millis(100),
            max_clients: 64,
            outbound_queue_limit: 256,
            denylist: DEFAULT_DENYLIST.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ProxyConfig {
    /// `bind_address:port` for the listener
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    /// Validate proxy configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.listen_address().parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid proxy listen address: '{}' (expected format: '0.0.0.0:4404')",
                self.listen_address()
            ));
        }

        if self.max_clients == 0 {
            errors.push("Max clients must be greater than 0".to_string());
        }

        if self.outbound_queue_limit == 0 {
            errors.push("Outbound queue limit must be greater than 0".to_string());
        }

        if self.send_gap.as_secs() > 10 {
            errors.push("Send gap too long (maximum: 10s)".to_string());
        }

        for entry in &self.denylist {
            if entry.trim().is_empty() {
                errors.push("Denylist entries cannot be empty".to_string());
            } else if entry.chars().any(|c| c.is_ascii_lowercase()) {
                errors.push(format!(
                    "Denylist entry '{entry}' should use the upper-case type name"
                ));
            }
        }

        errors
    }
}

/// Traceroute scheduler settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TracerouteConfig {
    /// Whether the scheduler runs at all
    pub enabled: bool,

    /// Period between scheduler ticks
    #[serde(with = "duration_serde")]
    pub interval: Duration,

    /// Only nodes heard within this window are considered
    #[serde(with = "duration_serde")]
    pub active_window: Duration,

    /// A node is traced again once its last traceroute is older than this
    #[serde(with = "duration_serde")]
    pub expiration: Duration,

    /// Pending requests older than this are abandoned
    #[serde(with = "duration_serde")]
    pub response_timeout: Duration,

    /// Hop limit set on outgoing traceroute requests
    pub hop_limit: u32,

    /// Channel used for outgoing traceroute requests
    pub channel: u32,

    /// Candidate filters
    pub filters: TracerouteFilters,
}

impl Default for TracerouteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(180),
            active_window: Duration::from_secs(24 * 3600),
            expiration: Duration::from_secs(24 * 3600),
            response_timeout: Duration::from_secs(120),
            hop_limit: 7,
            channel: 0,
            filters: TracerouteFilters::default(),
        }
    }
}

impl TracerouteConfig {
    /// Validate traceroute configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.interval.as_secs() < 1 {
            errors.push("Traceroute interval too short (minimum: 1s)".to_string());
        }

        if self.active_window.is_zero() {
            errors.push("Active window must be greater than 0".to_string());
        }

        if self.response_timeout.is_zero() {
            errors.push("Traceroute response timeout must be greater than 0".to_string());
        }

        if self.hop_limit == 0 || self.hop_limit > 7 {
            errors.push(format!(
                "Invalid traceroute hop limit: {} (valid range: 1-7)",
                self.hop_limit
            ));
        }

        errors.extend(self.filters.validate());
        errors
    }
}

/// Optional narrowing of traceroute candidates. Empty lists mean "no restriction".
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct TracerouteFilters {
    /// Only nodes last heard on one of these channels
    pub channels: Vec<u32>,

    /// Only nodes with one of these roles (e.g. `ROUTER`, `CLIENT`)
    pub roles: Vec<String>,

    /// Only nodes with one of these hardware model ids
    pub hw_models: Vec<i32>,

    /// Only nodes whose long or short name matches this regex
    pub name_pattern: Option<String>,

    /// Node numbers always considered, regardless of the other filters
    pub include: Vec<u32>,

    /// Node numbers never traced
    pub exclude: Vec<u32>,
}

impl TracerouteFilters {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if let Some(pattern) = &self.name_pattern {
            if let Err(e) = regex::Regex::new(pattern) {
                errors.push(format!("Invalid traceroute name pattern '{pattern}': {e}"));
            }
        }

        for node in &self.include {
            if self.exclude.contains(node) {
                errors.push(format!("Node {node:#010x} is both included and excluded"));
            }
        }

        errors
    }
}

/// Retention of message and telemetry history
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Most records kept per history; the oldest are evicted first
    pub history_limit: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.history_limit == 0 {
            errors.push("History limit must be greater than 0".to_string());
        }
        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("meshlink"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        level.as_str().to_lowercase().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
