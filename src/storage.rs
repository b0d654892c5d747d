//! Storage Layer
//!
//! Telemetry sinks that persist one cycle's batch as a unit.
//!
//! # Components
//!
//! - [`TelemetrySink`]: atomic batch write capability
//! - [`InfluxSink`]: InfluxDB 1.x HTTP line protocol writer
//! - [`SqliteSink`]: transactional SQLite writer
//! - [`CycleBatch`] / [`Sample`]: data handed from the collector to a sink
//! - [`connect`]: builds the sink selected by [`SinkConfig`]

mod error;
pub mod influx;
mod schema;
pub mod sqlite;
mod traits;
mod types;

pub use error::SinkError;
pub use influx::InfluxSink;
pub use sqlite::SqliteSink;
pub use traits::TelemetrySink;
pub use types::{
    BatchEntry, CycleBatch, DEFAULT_MEASUREMENT, DeviceTags, READ_DURATION_FIELD, Sample,
};

use crate::config::{SinkConfig, SinkDriver};

/// Build the sink selected by `config.driver`.
///
/// # Errors
/// Returns `SinkError` if the HTTP client cannot be built or the SQLite
/// database cannot be opened.
pub async fn connect(config: &SinkConfig) -> Result<Box<dyn TelemetrySink>, SinkError> {
    let sink: Box<dyn TelemetrySink> = match config.driver {
        SinkDriver::Influxdb => {
            tracing::info!(
                host = %config.host,
                port = config.port,
                db = %config.dbname,
                "Using InfluxDB sink"
            );
            Box::new(InfluxSink::new(config)?)
        }
        SinkDriver::Sqlite => {
            tracing::info!(path = %config.dbname, "Using SQLite sink");
            Box::new(SqliteSink::open(&config.dbname).await?)
        }
    };
    Ok(sink)
}
