//! Service configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use pdlogger_types::DeviceIdentity;

/// Service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Storage locations.
    pub storage: StorageConfig,
    /// Device identity settings.
    pub device: DeviceConfig,
    /// MQTT connectivity settings.
    pub mqtt: MqttConfig,
    /// Log export settings.
    pub export: ExportConfig,
}

impl Config {
    /// Load configuration from the default path.
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

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return any errors.
    ///
    /// This checks:
    /// - Server bind address is valid (host:port format)
    /// - Storage paths are not empty
    /// - MQTT topic prefixes are usable and intervals are non-zero
    /// - Export chunk size and segment bound are within limits
    ///
    /// # Example
    ///
    /// ```
    /// use pdlogger_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.mqtt.validate());
        errors.extend(self.export.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError::new(
                "server.bind",
                "bind address cannot be empty",
            ));
            return errors;
        }

        match self.bind.rsplit_once(':') {
            None => errors.push(ValidationError::new(
                "server.bind",
                format!(
                    "invalid bind address '{}': expected format 'host:port'",
                    self.bind
                ),
            )),
            Some((_, port)) => match port.parse::<u16>() {
                Ok(0) => errors.push(ValidationError::new("server.bind", "port cannot be 0")),
                Err(_) => errors.push(ValidationError::new(
                    "server.bind",
                    format!("invalid port '{}': must be a number 1-65535", port),
                )),
                Ok(_) => {}
            },
        }

        errors
    }
}

/// Storage locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the rotated log segments.
    pub log_dir: PathBuf,
    /// JSON document holding the broker credentials.
    pub broker_config: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            log_dir: pdlogger_store::default_log_dir(),
            broker_config: default_broker_config_path(),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.log_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.log_dir",
                "log directory cannot be empty",
            ));
        }
        if self.broker_config.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.broker_config",
                "broker config path cannot be empty",
            ));
        }

        errors
    }
}

/// Device identity settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Stable hardware identifier. When unset, `/etc/machine-id` or the
    /// host name is used.
    pub hardware_id: Option<String>,
}

/// Location of the systemd/dbus machine id.
const MACHINE_ID_PATH: &str = "/etc/machine-id";

impl DeviceConfig {
    /// Resolve the hardware identifier this device derives its identity from.
    pub fn hardware_id(&self) -> String {
        if let Some(id) = self.hardware_id.as_deref().map(str::trim)
            && !id.is_empty()
        {
            return id.to_string();
        }

        match std::fs::read_to_string(MACHINE_ID_PATH) {
            Ok(id) if !id.trim().is_empty() => return id.trim().to_string(),
            Ok(_) => debug!("{} is empty", MACHINE_ID_PATH),
            Err(e) => debug!("Cannot read {}: {}", MACHINE_ID_PATH, e),
        }

        hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "pd-logger".to_string())
    }

    /// Device identity derived from [`DeviceConfig::hardware_id`].
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::from_hardware_id(&self.hardware_id())
    }
}

/// MQTT connectivity settings.
///
/// Broker credentials are not part of this file; they live in the broker
/// config document (`storage.broker_config`) and are hot-reloaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Run the connectivity manager at all.
    pub enabled: bool,
    /// Namespace for state and availability topics.
    pub topic_prefix: String,
    /// Home Assistant discovery prefix.
    pub discovery_prefix: String,
    /// Keep-alive interval in seconds.
    pub keep_alive_secs: u64,
    /// Cooperative tick period in milliseconds.
    pub tick_interval_ms: u64,
    /// How often the broker config document is re-read.
    pub config_check_interval_ms: u64,
    /// Minimum spacing between connect attempts.
    pub reconnect_interval_ms: u64,
    /// Consecutive connect failures before backing off.
    pub failure_threshold: u8,
    /// Backoff after repeated failures, in seconds.
    pub backoff_secs: u64,
    /// Upper bound for a single connect attempt.
    pub connect_timeout_ms: u64,
    /// State publish interval in milliseconds.
    pub publish_interval_ms: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            topic_prefix: "pd_logger".to_string(),
            discovery_prefix: "homeassistant".to_string(),
            keep_alive_secs: 15,
            tick_interval_ms: 100,
            config_check_interval_ms: 5000,
            reconnect_interval_ms: 5000,
            failure_threshold: 3,
            backoff_secs: 60,
            connect_timeout_ms: 2000,
            publish_interval_ms: 1000,
        }
    }
}

impl MqttConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Validate MQTT configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        for (field, value) in [
            ("mqtt.topic_prefix", &self.topic_prefix),
            ("mqtt.discovery_prefix", &self.discovery_prefix),
        ] {
            if value.is_empty() {
                errors.push(ValidationError::new(field, "topic prefix cannot be empty"));
            } else if value.contains(['#', '+']) {
                errors.push(ValidationError::new(
                    field,
                    format!("topic prefix '{}' cannot contain MQTT wildcards", value),
                ));
            }
        }

        for (field, value) in [
            ("mqtt.tick_interval_ms", self.tick_interval_ms),
            ("mqtt.publish_interval_ms", self.publish_interval_ms),
            ("mqtt.connect_timeout_ms", self.connect_timeout_ms),
            ("mqtt.keep_alive_secs", self.keep_alive_secs),
        ] {
            if value == 0 {
                errors.push(ValidationError::new(field, "must be greater than 0"));
            }
        }

        if self.failure_threshold == 0 {
            errors.push(ValidationError::new(
                "mqtt.failure_threshold",
                "must be at least 1",
            ));
        }

        errors
    }
}

/// Maximum accepted export chunk size in bytes.
pub const MAX_CHUNK_SIZE: usize = 64 * 1024;
/// Maximum accepted catalog bound.
pub const MAX_SEGMENTS_LIMIT: usize = 1024;

/// Log export settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Size of streamed chunks in bytes.
    pub chunk_size: usize,
    /// Upper bound on cataloged segments per request.
    pub max_segments: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            chunk_size: pdlogger_store::DEFAULT_CHUNK_SIZE,
            max_segments: pdlogger_store::DEFAULT_MAX_SEGMENTS,
        }
    }
}

impl ExportConfig {
    /// Validate export configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            errors.push(ValidationError::new(
                "export.chunk_size",
                format!(
                    "chunk size {} is out of range (1-{})",
                    self.chunk_size, MAX_CHUNK_SIZE
                ),
            ));
        }
        if self.max_segments == 0 || self.max_segments > MAX_SEGMENTS_LIMIT {
            errors.push(ValidationError::new(
                "export.max_segments",
                format!(
                    "segment bound {} is out of range (1-{})",
                    self.max_segments, MAX_SEGMENTS_LIMIT
                ),
            ));
        }

        errors
    }
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
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind` or `mqtt.topic_prefix`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
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
        .join("pd-logger")
        .join("server.toml")
}

/// Default location of the broker config document.
pub fn default_broker_config_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pd-logger")
        .join("mqtt.json")
}
