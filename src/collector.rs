//! Collector Layer
//!
//! Acquisition pipeline that polls every configured meter on a shared serial
//! bus and hands one batch per cycle to the telemetry sink.
//!
//! # Architecture
//!
//! - [`RegisterReader`]: reads every parameter of one meter, with retry
//! - [`CollectionCycle`]: one pass over the meter list, one batch write
//! - [`Scheduler`]: runs cycles on a fixed, drift-free cadence
//!
//! # Example
//!
//! ```rust,no_run
//! use meterlog::bus::FakeBus;
//! use meterlog::collector::{CollectionCycle, RegisterReader, Scheduler};
//! use meterlog::config::{DeviceRegistry, FileSource, ProfileStore};
//! use meterlog::storage::SqliteSink;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let sink = SqliteSink::open("/tmp/energy.db").await?;
//! let mut cycle = CollectionCycle::new(
//!     DeviceRegistry::new(FileSource::new("meters.yml")),
//!     ProfileStore::new("."),
//!     RegisterReader::new(FakeBus::new()),
//!     Box::new(sink),
//! );
//! Scheduler::new(Duration::from_secs(60))
//!     .with_max_iterations(Some(1))
//!     .run(&mut cycle)
//!     .await;
//! # Ok(())
//! # }
//! ```

mod cycle;
mod reader;
mod scheduler;

pub use cycle::{CollectionCycle, CycleError, CycleOutcome, DeviceFault};
pub use reader::{DEFAULT_READ_ATTEMPTS, ReadError, RegisterReader};
pub use scheduler::{Cadence, PROGRESS_LOG_EVERY, PollCycle, Scheduler, SchedulerStats};
