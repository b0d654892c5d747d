//! Telemetry sink configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use super::validation::{ConfigError, expand_env_vars};
use crate::storage::DEFAULT_MEASUREMENT;

/// Default InfluxDB HTTP port.
pub const DEFAULT_INFLUX_PORT: u16 = 8086;

/// Default sink request timeout.
pub const DEFAULT_SINK_TIMEOUT: Duration = Duration::from_secs(10);

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    DEFAULT_INFLUX_PORT
}

fn default_timeout() -> Duration {
    DEFAULT_SINK_TIMEOUT
}

fn default_measurement() -> String {
    DEFAULT_MEASUREMENT.to_string()
}

/// Sink backend.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SinkDriver {
    /// InfluxDB 1.x HTTP write API.
    #[default]
    Influxdb,
    /// Local SQLite file (`dbname` is the file path).
    Sqlite,
}

/// Sink configuration, read once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Backend (default: influxdb).
    #[serde(default)]
    pub driver: SinkDriver,

    /// Server host (default: "localhost").
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port (default: 8086).
    #[serde(default = "default_port")]
    pub port: u16,

    /// User name, forwarded as-is (may be empty).
    #[serde(default)]
    pub user: String,

    /// Password, forwarded as-is (may be empty).
    #[serde(default)]
    pub password: String,

    /// Database name, or file path for SQLite.
    pub dbname: String,

    /// Write request timeout (default: 10s).
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Measurement name for every entry (default: "energy").
    #[serde(default = "default_measurement")]
    pub measurement: String,
}

impl SinkConfig {
    /// Create an InfluxDB sink configuration with defaults.
    pub fn influxdb(host: impl Into<String>, port: u16, dbname: impl Into<String>) -> Self {
        Self {
            driver: SinkDriver::Influxdb,
            host: host.into(),
            port,
            user: String::new(),
            password: String::new(),
            dbname: dbname.into(),
            timeout: DEFAULT_SINK_TIMEOUT,
            measurement: default_measurement(),
        }
    }

    /// Create a SQLite sink configuration.
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            driver: SinkDriver::Sqlite,
            ..Self::influxdb(default_host(), DEFAULT_INFLUX_PORT, path)
        }
    }

    /// Set credentials.
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    /// Load configuration from a YAML file.
    ///
    /// `${VAR}` / `${VAR:-default}` references are expanded before parsing.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::Missing(path.display().to_string()),
            _ => e.into(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from YAML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(&expand_env_vars(content))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dbname.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "sink dbname must not be empty".to_string(),
            ));
        }

        if self.measurement.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "sink measurement must not be empty".to_string(),
            ));
        }

        if self.driver == SinkDriver::Influxdb {
            if self.host.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "sink host must not be empty".to_string(),
                ));
            }
            if self.port == 0 {
                return Err(ConfigError::ValidationError(
                    "sink port must be non-zero".to_string(),
                ));
            }
            if self.timeout.is_zero() {
                return Err(ConfigError::ValidationError(
                    "sink timeout must be positive".to_string(),
                ));
            }
        }

        Ok(())
    }
}
