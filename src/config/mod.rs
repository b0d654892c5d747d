//! Configuration module for meterlog.
//!
//! Provides YAML-based configuration loading and validation for:
//! - The meter list (hot-reloaded, see [`DeviceRegistry`])
//! - Device model register maps ([`ProfileStore`])
//! - The telemetry sink ([`SinkConfig`], read once at startup)

mod profile;
mod registry;
mod sink;
mod source;
mod validation;

pub use profile::{ParameterMap, ProfileStore};
pub use registry::{BusParams, DeviceDescriptor, DeviceRegistry, MAX_SLAVE_ADDRESS, MeterFile};
pub use sink::{DEFAULT_INFLUX_PORT, DEFAULT_SINK_TIMEOUT, SinkConfig, SinkDriver};
pub use source::{ConfigSource, FileSource, MemorySource, SourceVersion};
pub use validation::{ConfigError, MAX_INTERVAL, expand_env_vars, parse_interval};
