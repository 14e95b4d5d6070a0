//! Gateway configuration.
//!
//! Settings come from an optional TOML file, then command-line flags
//! override individual values:
//!
//! ```toml
//! [device]
//! address = "AA:BB:CC:DD:EE:FF"
//! connect_timeout_secs = 5
//!
//! [server]
//! bind = ":6161"
//! ```

use std::net::Ipv6Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use airbox_types::PeripheralAddress;

/// Default HTTP bind address; a leading `:` means all interfaces.
pub const DEFAULT_BIND: &str = ":6161";

/// Default connect deadline in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Gateway configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The sensor to talk to.
    pub device: DeviceConfig,
    /// HTTP server settings.
    pub server: ServerConfig,
}

/// Values given on the command line. `None` leaves the file value alone.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub address: Option<String>,
    pub bind: Option<String>,
    pub connect_timeout_secs: Option<u64>,
}

impl Config {
    /// Load configuration from the default path, if that file exists.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Apply command-line overrides.
    #[must_use]
    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        if let Some(address) = overrides.address {
            self.device.address = Some(address);
        }
        if let Some(bind) = overrides.bind {
            self.server.bind = bind;
        }
        if let Some(secs) = overrides.connect_timeout_secs {
            self.device.connect_timeout_secs = secs;
        }
        self
    }

    /// Validate the configuration and return any errors.
    ///
    /// This checks:
    /// - The device address, if set, is not blank
    /// - The connect timeout is not zero
    /// - The bind address is `host:port` or `:port`
    ///
    /// A missing address is not a validation error here; it is reported
    /// by [`Config::address`].
    ///
    /// # Example
    ///
    /// ```
    /// use airbox_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.device.validate());
        errors.extend(self.server.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// The configured peripheral address.
    pub fn address(&self) -> Result<PeripheralAddress, ConfigError> {
        let raw = self
            .device
            .address
            .as_deref()
            .ok_or(ConfigError::MissingAddress)?;
        raw.parse().map_err(|_| ConfigError::InvalidAddress(raw.to_string()))
    }

    /// The connect deadline.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.device.connect_timeout_secs)
    }

    /// Addresses to try binding, in order. See [`resolve_bind`].
    pub fn bind_addrs(&self) -> Result<Vec<String>, ConfigError> {
        resolve_bind(&self.server.bind).map_err(|message| {
            ConfigError::Validation(vec![ValidationError {
                field: "server.bind".to_string(),
                message,
            }])
        })
    }
}

/// Device settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// MAC address (Linux/Windows) or CoreBluetooth UUID (macOS).
    pub address: Option<String>,
    /// Deadline for establishing the link.
    pub connect_timeout_secs: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl DeviceConfig {
    /// Validate device configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Some(address) = &self.address
            && address.trim().is_empty()
        {
            errors.push(ValidationError {
                field: "device.address".to_string(),
                message: "device address cannot be empty".to_string(),
            });
        }

        if self.connect_timeout_secs == 0 {
            errors.push(ValidationError {
                field: "device.connect_timeout_secs".to_string(),
                message: "connect timeout must be at least 1 second".to_string(),
            });
        }

        errors
    }
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g. ":6161" or "127.0.0.1:8080").
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        match resolve_bind(&self.bind) {
            Ok(_) => Vec::new(),
            Err(message) => vec![ValidationError {
                field: "server.bind".to_string(),
                message,
            }],
        }
    }
}

/// Check a bind string and turn it into the addresses to try, in order.
///
/// Only the shape is checked here; host names are resolved when binding.
/// `:6161` means all interfaces: the IPv6 wildcard first, which is
/// dual-stack where the OS allows it, then `0.0.0.0:6161`.
pub fn resolve_bind(bind: &str) -> Result<Vec<String>, String> {
    if bind.is_empty() {
        return Err("bind address cannot be empty".to_string());
    }

    let Some((host, port)) = bind.rsplit_once(':') else {
        return Err(format!(
            "invalid bind address '{}': expected format 'host:port' or ':port'",
            bind
        ));
    };

    let port: u16 = port
        .parse()
        .map_err(|_| format!("invalid port '{}' in bind address '{}'", port, bind))?;
    if port == 0 {
        return Err("port cannot be 0".to_string());
    }

    if host.is_empty() {
        return Ok(vec![format!("[::]:{}", port), format!("0.0.0.0:{}", port)]);
    }

    let valid_host = match host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
        Some(v6) => v6.parse::<Ipv6Addr>().is_ok(),
        None => !host.contains(':') && !host.chars().any(char::is_whitespace),
    };
    if !valid_host {
        return Err(format!(
            "invalid host '{}' in bind address '{}' (IPv6 addresses need brackets)",
            host, bind
        ));
    }

    Ok(vec![bind.to_string()])
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("No device address given; pass --addr or set device.address in the config file")]
    MissingAddress,
    #[error("Invalid device address '{0}'")]
    InvalidAddress(String),
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("airbox")
        .join("gateway.toml")
}
