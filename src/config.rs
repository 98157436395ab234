//! # Configuration Management
//!
//! Centralized configuration for the bounce notification client and the
//! reference server.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Environment variables via `from_env()`
//! - Direct instantiation with defaults
//!
//! ## Size Limits
//! The client's body limit must stay in sync with `bounce_size_limit` in the
//! Postfix `main.cf` that pipes bounces into the client. If Postfix hands over
//! more than this the client fails the delivery instead of truncating the
//! MIME part the downstream parser depends on. The receiver's limit must be
//! at least as large as the sender's.

use crate::error::{BounceError, Result};
use crate::transport::resolver::split_host_port;
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Magic bytes identifying a bounce frame ("BNCE")
pub const MAGIC_BYTES: [u8; 4] = *b"BNCE";

/// Acknowledgement literal sent by the receiver after a complete frame
pub const ACK_BYTES: [u8; 3] = *b"OK\n";

/// Fixed prefix: magic(4) + header length(4) + body length(8)
pub const PREFIX_LEN: usize = 16;

/// Sender-side body limit, matches Postfix `bounce_size_limit` (50 KB)
pub const MAX_CLIENT_BODY_BYTES: usize = 50 * 1024;

/// Receiver-side header limit (16 KB)
pub const MAX_HEADER_BYTES: u32 = 16 * 1024;

/// Receiver-side body limit (2 MB)
pub const MAX_SERVER_BODY_BYTES: u64 = 2 * 1024 * 1024;

/// Default listen address of the reference server
pub const DEFAULT_LISTEN: &str = "127.0.0.1:32147";

/// `sysexits.h` usage error
pub const EX_USAGE: i32 = 64;

/// `sysexits.h` temporary failure; the MTA will retry later
pub const EX_TEMPFAIL: i32 = 75;

/// Top-level configuration with one section per role
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct BounceConfig {
    /// Sender configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Reference server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl BounceConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| BounceError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| BounceError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load the client's layered configuration: defaults, then the optional
    /// file at `path`, then `BOUNCE_NOTIFY_*` variables.
    ///
    /// The flag is true when the file or the environment sets the server
    /// address explicitly; the built-in default address does not count.
    pub fn load_layered(path: Option<&Path>) -> Result<(Self, bool)> {
        let (mut config, mut server_set) = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|e| {
                    BounceError::ConfigError(format!("Failed to read config file: {e}"))
                })?;
                (Self::from_toml(&contents)?, declares_server_address(&contents))
            }
            None => (Self::default(), false),
        };

        server_set |= std::env::var_os("BOUNCE_NOTIFY_SERVER").is_some();
        config.apply_env()?;
        Ok((config, server_set))
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| BounceError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from `BOUNCE_NOTIFY_*` environment variables.
    ///
    /// A variable that is set but unparsable is a configuration error.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("BOUNCE_NOTIFY_SERVER") {
            self.client.server_address = addr;
        }

        if let Ok(secs) = std::env::var("BOUNCE_NOTIFY_TIMEOUT_SECS") {
            let secs = secs.parse::<u64>().map_err(|_| {
                BounceError::ConfigError(format!(
                    "BOUNCE_NOTIFY_TIMEOUT_SECS is not a number: {secs}"
                ))
            })?;
            self.client.timeout = Duration::from_secs(secs);
        }

        if let Ok(max) = std::env::var("BOUNCE_NOTIFY_MAX_BODY_BYTES") {
            self.client.max_body_bytes = max.parse::<usize>().map_err(|_| {
                BounceError::ConfigError(format!(
                    "BOUNCE_NOTIFY_MAX_BODY_BYTES is not a number: {max}"
                ))
            })?;
        }

        if let Ok(addr) = std::env::var("BOUNCE_NOTIFY_LISTEN") {
            self.server.listen_address = addr;
        }

        if let Ok(level) = std::env::var("BOUNCE_NOTIFY_LOG_LEVEL") {
            self.logging.log_level = level
                .parse::<Level>()
                .map_err(|_| BounceError::ConfigError(format!("Invalid log level: {level}")))?;
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

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        errors.extend(self.client.validate());
        errors.extend(self.server.validate());

        // A sender allowed to emit bodies the receiver refuses is an
        // interoperability hazard.
        if self.client.max_body_bytes as u64 > self.server.max_body_bytes {
            errors.push(format!(
                "Client body limit ({}) exceeds server body limit ({})",
                self.client.max_body_bytes, self.server.max_body_bytes
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
            Err(BounceError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn declares_server_address(content: &str) -> bool {
    toml::from_str::<toml::Table>(content)
        .ok()
        .and_then(|table| {
            table
                .get("client")
                .and_then(|client| client.get("server_address"))
                .map(|_| ())
        })
        .is_some()
}

/// Sender configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Target receiver address (`host:port`)
    pub server_address: String,

    /// Timeout applied to connect, send and ACK wait individually
    #[serde(with = "duration_serde")]
    pub timeout: Duration,

    /// Largest body the sender will transmit
    pub max_body_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: String::from(DEFAULT_LISTEN),
            timeout: timeout::DEFAULT_TIMEOUT,
            max_body_bytes: MAX_CLIENT_BODY_BYTES,
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.server_address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if split_host_port(&self.server_address).is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: 'host:port')",
                self.server_address
            ));
        }

        if self.timeout.is_zero() {
            errors.push("Timeout must be greater than 0".to_string());
        } else if self.timeout.as_secs() > 300 {
            errors.push("Timeout too long (maximum: 300s)".to_string());
        }

        if self.max_body_bytes == 0 {
            errors.push("Max body size cannot be 0".to_string());
        }

        errors
    }
}

/// Reference server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (`host:port`)
    pub listen_address: String,

    /// Largest header the server accepts
    pub max_header_bytes: u32,

    /// Largest body the server accepts
    pub max_body_bytes: u64,

    /// Per-read timeout once a connection is accepted (None = wait forever)
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "opt_duration_serde"
    )]
    pub read_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: String::from(DEFAULT_LISTEN),
            max_header_bytes: MAX_HEADER_BYTES,
            max_body_bytes: MAX_SERVER_BODY_BYTES,
            read_timeout: None,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.listen_address.is_empty() {
            errors.push("Listen address cannot be empty".to_string());
        } else if split_host_port(&self.listen_address).is_err() {
            errors.push(format!(
                "Invalid listen address format: '{}' (expected format: 'host:port')",
                self.listen_address
            ));
        }

        if self.max_header_bytes == 0 {
            errors.push("Max header size cannot be 0".to_string());
        }

        if let Some(t) = self.read_timeout {
            if t.is_zero() {
                errors.push("Read timeout must be greater than 0".to_string());
            }
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: Level::WARN,
            json_format: false,
        }
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

mod opt_duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
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
