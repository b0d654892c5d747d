//! Meterlog - Energy Meter Telemetry Library
//!
//! This crate polls a fleet of energy meters sharing one RS-485 serial bus
//! (Modbus RTU) at a fixed interval and writes timestamped, tagged samples to
//! a time-series sink. It can be used as a library, or run as a standalone
//! binary with the `meterlog` executable.
//!
//! # Architecture
//!
//! - **Config**: hot-reloaded meter list, cached model register maps, sink settings
//! - **Bus**: reconfigurable serial transport (Modbus RTU, or scripted fake)
//! - **Collectors**: per-meter readout with retry, collection cycle, scheduler
//! - **Storage**: atomic batch writes to InfluxDB or SQLite
//!
//! # Example
//!
//! ```rust,no_run
//! use meterlog::{
//!     CollectionCycle, DeviceRegistry, FileSource, ProfileStore, RegisterReader, RtuTransport,
//!     Scheduler, SinkConfig,
//! };
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sink = meterlog::storage::connect(&SinkConfig::load("influx_config.yml")?).await?;
//!     let mut cycle = CollectionCycle::new(
//!         DeviceRegistry::new(FileSource::new("meters.yml")),
//!         ProfileStore::new("."),
//!         RegisterReader::new(RtuTransport::open("/dev/ttyAMA0")?),
//!         sink,
//!     );
//!
//!     Scheduler::new(Duration::from_secs(60)).run(&mut cycle).await;
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod collector;
pub mod config;
pub mod storage;

pub use bus::{BusTransport, FakeBus, RtuTransport};
pub use collector::{CollectionCycle, CycleError, RegisterReader, Scheduler, SchedulerStats};
pub use config::{ConfigError, DeviceRegistry, FileSource, ProfileStore, SinkConfig};
pub use storage::{SinkError, TelemetrySink};
