//! Hot-reloaded device registry.
//!
//! The registry keeps the last successfully parsed meter list together with
//! the [`SourceVersion`] it was parsed from. The list is only re-parsed when
//! the version changes, and a failed re-parse keeps the previous revision in
//! service.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::source::{ConfigSource, FileSource, SourceVersion};
use super::validation::ConfigError;

/// Highest valid Modbus RTU slave address.
pub const MAX_SLAVE_ADDRESS: u8 = 247;

/// Upper bound for a per-device response timeout.
const MAX_BUS_TIMEOUT_SECS: f64 = 60.0;

/// Serial line parameters for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusParams {
    /// Baud rate (e.g. 2400, 9600).
    pub baudrate: u32,
    /// Data bits per character (5-8).
    pub bytesize: u8,
    /// Parity as configured (`none`, `odd`, `even`).
    ///
    /// Kept verbatim: an unsupported value only fails this device's readout.
    pub parity: String,
    /// Stop bits (1 or 2).
    pub stopbits: u8,
    /// Response timeout in seconds.
    pub timeout: f64,
}

impl BusParams {
    /// Response timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout).unwrap_or(Duration::from_secs(1))
    }

    fn validate(&self, meter: &str) -> Result<(), ConfigError> {
        let invalid = |msg: String| ConfigError::ValidationError(format!("meter '{meter}': {msg}"));

        if self.baudrate == 0 {
            return Err(invalid("baudrate must be positive".to_string()));
        }
        if !(5..=8).contains(&self.bytesize) {
            return Err(invalid(format!("bytesize {} not in 5..=8", self.bytesize)));
        }
        if !(1..=2).contains(&self.stopbits) {
            return Err(invalid(format!("stopbits {} not in 1..=2", self.stopbits)));
        }
        if !self.timeout.is_finite() || self.timeout <= 0.0 || self.timeout > MAX_BUS_TIMEOUT_SECS
        {
            return Err(invalid(format!(
                "timeout {} not in (0, {MAX_BUS_TIMEOUT_SECS}] seconds",
                self.timeout
            )));
        }
        Ok(())
    }
}

/// One configured meter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Slave address on the bus; unique across the registry.
    pub id: u8,
    /// Display name, written as the `meter` tag.
    pub name: String,
    /// Path of the model definition file (register map).
    #[serde(rename = "type")]
    pub model_ref: String,
    /// Serial line parameters.
    #[serde(flatten)]
    pub bus: BusParams,
}

/// Top-level layout of the meter list file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeterFile {
    #[serde(default)]
    pub meters: Vec<DeviceDescriptor>,
}

impl MeterFile {
    /// Parse and validate a meter list document.
    pub fn parse(content: &str) -> Result<Vec<DeviceDescriptor>, ConfigError> {
        let file: Self = serde_yaml::from_str(content)?;
        file.validate()?;
        Ok(file.meters)
    }

    /// Validate meter entries.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` on duplicate or out-of-range
    /// ids, empty names, or invalid line parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for meter in &self.meters {
            if meter.id == 0 || meter.id > MAX_SLAVE_ADDRESS {
                return Err(ConfigError::ValidationError(format!(
                    "meter '{}': id {} not in 1..={MAX_SLAVE_ADDRESS}",
                    meter.name, meter.id
                )));
            }
            if !seen.insert(meter.id) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate meter id: {}",
                    meter.id
                )));
            }
            if meter.name.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "meter {}: name must not be empty",
                    meter.id
                )));
            }
            if meter.model_ref.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "meter '{}': type must not be empty",
                    meter.name
                )));
            }
            meter.bus.validate(&meter.name)?;
        }
        Ok(())
    }
}

/// Cached, hot-reloading view of the meter list.
#[derive(Debug)]
pub struct DeviceRegistry<S = FileSource> {
    source: S,
    cached: Option<Arc<Vec<DeviceDescriptor>>>,
    last_seen: Option<SourceVersion>,
}

impl<S: ConfigSource> DeviceRegistry<S> {
    /// Create a registry that has not loaded anything yet.
    pub fn new(source: S) -> Self {
        Self {
            source,
            cached: None,
            last_seen: None,
        }
    }

    /// The backing source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Current meter list, re-parsed only when the source version changed.
    ///
    /// # Errors
    /// Returns `ConfigError::Missing` if the source is gone, and the parse
    /// error itself when nothing has been loaded successfully yet.
    pub fn get_devices(&mut self) -> Result<Arc<Vec<DeviceDescriptor>>, ConfigError> {
        let version = self.source.version()?;

        if let Some(devices) = &self.cached
            && self.last_seen.as_ref() == Some(&version)
        {
            return Ok(Arc::clone(devices));
        }

        tracing::info!(source = %self.source.describe(), "Reloading meter map as source changed");

        match self.load() {
            Ok(devices) => {
                let devices = Arc::new(devices);
                tracing::info!(
                    source = %self.source.describe(),
                    meters = devices.len(),
                    "Meter map loaded"
                );
                self.cached = Some(Arc::clone(&devices));
                self.last_seen = Some(version);
                Ok(devices)
            }
            Err(e) => match &self.cached {
                Some(devices) => {
                    tracing::warn!(
                        source = %self.source.describe(),
                        error = %e,
                        meters = devices.len(),
                        "Failed to reload meter map, going on with the previous one"
                    );
                    Ok(Arc::clone(devices))
                }
                None => Err(e),
            },
        }
    }

    fn load(&self) -> Result<Vec<DeviceDescriptor>, ConfigError> {
        let content = self.source.read_to_string()?;
        MeterFile::parse(&content)
    }
}
