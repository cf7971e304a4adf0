//! # Configuration Management
//!
//! Centralized configuration for the chat transport.
//!
//! This module provides structured configuration for the server, the
//! per-connection transport, the processing service and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-specific overrides via `from_env()`
//!
//! ## Security Considerations
//! - The incomplete-data cap bounds memory per connection
//! - The handshake timeout stops silent peers from pinning a connect task
//! - Bounded queues keep fast senders from growing memory without limit

use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Default listen address
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:9000";

/// Max bytes a connection may buffer without completing a message (64 KB)
pub const MAX_INCOMPLETE_SIZE: usize = 64 * 1024;

/// Default capacity of the shared incoming message queue
pub const INCOMING_QUEUE_CAPACITY: usize = 1024;

/// Default capacity of each connection's outbound queue
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ChatConfig {
    /// Acceptor and connection-lifecycle settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Per-connection framing settings
    #[serde(default)]
    pub transport: TransportConfig,

    /// Message processing service settings
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ChatConfig {
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

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("CHAT_TRANSPORT_ADDRESS") {
            config.server.address = addr;
        }

        if let Ok(capacity) = std::env::var("CHAT_TRANSPORT_QUEUE_CAPACITY") {
            if let Ok(val) = capacity.parse::<usize>() {
                config.server.backpressure_limit = val;
            }
        }

        if let Ok(timeout) = std::env::var("CHAT_TRANSPORT_READ_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.transport.read_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(size) = std::env::var("CHAT_TRANSPORT_MAX_INCOMPLETE_SIZE") {
            if let Ok(val) = size.parse::<usize>() {
                config.transport.max_incomplete_size = val;
            }
        }

        if let Ok(timeout) = std::env::var("CHAT_TRANSPORT_HANDSHAKE_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.server.handshake_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(flag) = std::env::var("CHAT_TRANSPORT_REQUIRE_HANDSHAKE") {
            if let Ok(val) = flag.parse::<bool>() {
                config.server.require_handshake = val;
            }
        }

        if let Ok(level) = std::env::var("CHAT_TRANSPORT_LOG_LEVEL") {
            if let Ok(val) = level.parse::<Level>() {
                config.logging.log_level = val;
            }
        }

        Ok(config)
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

        errors.extend(self.server.validate());
        errors.extend(self.transport.validate());
        errors.extend(self.processing.validate());
        errors.extend(self.logging.validate());

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

/// Acceptor and connection-lifecycle configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listen address (e.g., "127.0.0.1:9000"); port 0 picks a free port
    pub address: String,

    /// Capacity of the incoming message queue shared by all connections
    pub backpressure_limit: usize,

    /// Whether connecting clients must send their 16-byte identity first
    pub require_handshake: bool,

    /// Time allowed for a client to complete the identity handshake
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,

    /// Timeout for graceful server shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// Maximum number of concurrently registered clients
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from(DEFAULT_ADDRESS),
            backpressure_limit: INCOMING_QUEUE_CAPACITY,
            require_handshake: true,
            handshake_timeout: timeout::HANDSHAKE_TIMEOUT,
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
            max_connections: 1000,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:9000')",
                self.address
            ));
        }

        if self.backpressure_limit == 0 {
            errors.push("Backpressure limit must be greater than 0".to_string());
        } else if self.backpressure_limit > 1_000_000 {
            errors.push(format!(
                "Backpressure limit too large: {} (max recommended: 1,000,000)",
                self.backpressure_limit
            ));
        }

        if self.handshake_timeout.as_millis() < 100 {
            errors.push("Handshake timeout too short (minimum: 100ms)".to_string());
        } else if self.handshake_timeout.as_secs() > 300 {
            errors.push("Handshake timeout too long (maximum: 300s)".to_string());
        }

        if self.shutdown_timeout.as_secs() < 1 {
            errors.push("Shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 100_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        errors
    }
}

/// Per-connection framing configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Timeout of each listener read; also bounds how long a stop request waits
    #[serde(with = "duration_serde")]
    pub read_timeout: Duration,

    /// Maximum bytes buffered without forming a complete message
    pub max_incomplete_size: usize,

    /// Capacity of each connection's outbound message queue
    pub outbound_buffer: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            read_timeout: timeout::READ_TIMEOUT,
            max_incomplete_size: MAX_INCOMPLETE_SIZE,
            outbound_buffer: OUTBOUND_QUEUE_CAPACITY,
        }
    }
}

impl TransportConfig {
    /// Validate transport configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.read_timeout.as_millis() < 10 {
            errors.push("Read timeout too short (minimum: 10ms)".to_string());
        } else if self.read_timeout.as_secs() > 300 {
            errors.push("Read timeout too long (maximum: 300s)".to_string());
        }

        let min_size = crate::core::codec::TEXT_HEADER_LEN;
        if self.max_incomplete_size < min_size {
            errors.push(format!(
                "Max incomplete size too small: {} bytes (minimum: {min_size})",
                self.max_incomplete_size
            ));
        } else if self.max_incomplete_size > 100 * 1024 * 1024 {
            errors.push(format!(
                "Max incomplete size too large: {} bytes (maximum recommended: 100 MB)",
                self.max_incomplete_size
            ));
        }

        if self.outbound_buffer == 0 {
            errors.push("Outbound buffer must be greater than 0".to_string());
        }

        errors
    }
}

/// Message processing service configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessingConfig {
    /// How long the consumer waits on the queue before re-checking for stop
    #[serde(with = "duration_serde")]
    pub wait_timeout: Duration,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            wait_timeout: timeout::QUEUE_WAIT_TIMEOUT,
        }
    }
}

impl ProcessingConfig {
    /// Validate processing configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.wait_timeout.is_zero() {
            errors.push("Queue wait timeout must be greater than 0".to_string());
        } else if self.wait_timeout.as_secs() > 60 {
            errors.push("Queue wait timeout too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
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
            app_name: String::from("chat-transport"),
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
                if let Some(parent) = std::path::Path::new(path).parent() {
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
        let millis = duration.as_millis() as u64;
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
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
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
