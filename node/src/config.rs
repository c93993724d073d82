use bandwidth_core::persist::{StorageOptions, DEFAULT_RETENTION, DEFAULT_TREE_NAME};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Default configuration file, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "bandwidth.toml";

#[derive(Debug, Error)]
pub enum ConfigValidationError {
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct RecorderConfig {
    pub capture: CaptureConfig,
    pub metrics: MetricsConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CaptureConfig {
    /// Interface facing the Internet
    pub wan_device: String,
    /// Interface facing the local network; empty disables LAN accounting
    pub lan_device: String,
    pub promiscuous: bool,
    pub read_buffer_size: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MetricsConfig {
    pub listen_addr: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory holding the metrics database
    pub database_path: PathBuf,
    pub tree_name: String,
    pub retention: usize,
    pub autosave: bool,
    #[serde(with = "duration_serde")]
    pub autosave_interval: Duration,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

/// Command-line values that take precedence over every other source
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub wan_device: Option<String>,
    pub lan_device: Option<String>,
    pub listen_addr: Option<String>,
    pub database_path: Option<PathBuf>,
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            wan_device: "eth0".to_string(),
            lan_device: String::new(),
            promiscuous: false,
            read_buffer_size: 65536,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:9180".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("bandwidth.db"),
            tree_name: DEFAULT_TREE_NAME.to_string(),
            retention: DEFAULT_RETENTION,
            autosave: true,
            autosave_interval: Duration::from_secs(60),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CaptureConfig {
    pub fn lan_device(&self) -> Option<&str> {
        let device = self.lan_device.trim();
        (!device.is_empty()).then_some(device)
    }
}

impl StorageConfig {
    pub fn options(&self) -> StorageOptions {
        StorageOptions::default()
            .keep_records(self.retention)
            .autosave(self.autosave, self.autosave_interval)
            .tree_name(self.tree_name.clone())
    }
}

impl RecorderConfig {
    /// Layer defaults, the configuration file, environment variables and
    /// `overrides`, in increasing precedence. Environment variables take the
    /// form `BANDWIDTH_<SECTION>__<KEY>`, e.g. `BANDWIDTH_CAPTURE__WAN_DEVICE`.
    ///
    /// An explicit `path` must exist; otherwise `bandwidth.toml` is used when
    /// present.
    pub fn load(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        builder = match path {
            Some(path) => {
                info!("Loading configuration from: {:?}", path);
                builder.add_source(File::from(path).required(true))
            }
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };

        builder = builder.add_source(
            Environment::with_prefix("BANDWIDTH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: RecorderConfig = builder.build()?.try_deserialize()?;
        config.apply_overrides(overrides);

        if let Err(e) = config.validate() {
            return Err(ConfigError::Message(format!(
                "Configuration validation error: {e}"
            )));
        }
        Ok(config)
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(device) = &overrides.wan_device {
            self.capture.wan_device = device.clone();
        }
        if let Some(device) = &overrides.lan_device {
            self.capture.lan_device = device.clone();
        }
        if let Some(addr) = &overrides.listen_addr {
            self.metrics.listen_addr = addr.clone();
        }
        if let Some(path) = &overrides.database_path {
            self.storage.database_path = path.clone();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.capture.wan_device.trim().is_empty() {
            return Err(ConfigValidationError::MissingField(
                "capture.wan_device".to_string(),
            ));
        }
        if self.capture.lan_device() == Some(self.capture.wan_device.trim()) {
            return Err(ConfigValidationError::InvalidValue(
                "capture.lan_device must differ from capture.wan_device".to_string(),
            ));
        }
        if self.capture.read_buffer_size == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "capture.read_buffer_size must be positive".to_string(),
            ));
        }

        self.metrics.listen_addr.parse::<SocketAddr>().map_err(|e| {
            ConfigValidationError::InvalidValue(format!(
                "metrics.listen_addr '{}' is not a socket address: {e}",
                self.metrics.listen_addr
            ))
        })?;

        if self.storage.database_path.as_os_str().is_empty() {
            return Err(ConfigValidationError::InvalidPath(
                "storage.database_path cannot be empty".to_string(),
            ));
        }
        if self.storage.tree_name.is_empty() {
            return Err(ConfigValidationError::InvalidValue(
                "storage.tree_name cannot be empty".to_string(),
            ));
        }
        if self.storage.retention == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "storage.retention must keep at least one bucket".to_string(),
            ));
        }
        if self.storage.autosave && self.storage.autosave_interval.is_zero() {
            return Err(ConfigValidationError::InvalidValue(
                "storage.autosave_interval must be positive".to_string(),
            ));
        }

        if self.logging.level.trim().is_empty() {
            return Err(ConfigValidationError::MissingField("logging.level".to_string()));
        }
        Ok(())
    }

    /// Effective configuration as TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
