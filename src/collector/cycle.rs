//! One collection cycle: read every meter, write one batch.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::reader::{ReadError, RegisterReader};
use crate::bus::BusTransport;
use crate::config::{ConfigError, ConfigSource, DeviceRegistry, FileSource, ProfileStore};
use crate::storage::{CycleBatch, DEFAULT_MEASUREMENT, SinkError, TelemetrySink};

/// Errors that fail a whole cycle.
#[derive(Debug, Error)]
pub enum CycleError {
    /// Meter list unavailable.
    #[error("meter map unavailable: {0}")]
    Registry(#[from] ConfigError),

    /// Batch write failed.
    #[error("failed to write batch: {0}")]
    Sink(#[from] SinkError),
}

/// Why a device was left out of a cycle.
#[derive(Debug, Error)]
pub enum DeviceFault {
    /// Model file absent or malformed.
    #[error("model unavailable: {0}")]
    Profile(#[from] ConfigError),

    /// Bus readout failed.
    #[error(transparent)]
    Read(#[from] ReadError),
}

/// Summary of one completed cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleOutcome {
    /// Timestamp shared by every entry of the batch.
    pub timestamp: DateTime<Utc>,
    /// Devices in the meter list.
    pub attempted: usize,
    /// Devices written to the sink.
    pub written: usize,
    /// Ids of devices left out, in list order.
    pub skipped: Vec<u8>,
}

/// Reads all configured meters and writes one batch per run.
pub struct CollectionCycle<T, S = FileSource> {
    registry: DeviceRegistry<S>,
    profiles: ProfileStore,
    reader: RegisterReader<T>,
    sink: Box<dyn TelemetrySink>,
    measurement: String,
}

impl<T, S> CollectionCycle<T, S>
where
    T: BusTransport,
    S: ConfigSource,
{
    pub fn new(
        registry: DeviceRegistry<S>,
        profiles: ProfileStore,
        reader: RegisterReader<T>,
        sink: Box<dyn TelemetrySink>,
    ) -> Self {
        Self {
            registry,
            profiles,
            reader,
            sink,
            measurement: DEFAULT_MEASUREMENT.to_string(),
        }
    }

    /// Set the measurement name written for every entry.
    pub fn with_measurement(mut self, measurement: impl Into<String>) -> Self {
        self.measurement = measurement.into();
        self
    }

    pub fn reader(&self) -> &RegisterReader<T> {
        &self.reader
    }

    pub fn reader_mut(&mut self) -> &mut RegisterReader<T> {
        &mut self.reader
    }

    pub fn registry(&self) -> &DeviceRegistry<S> {
        &self.registry
    }

    /// Run one cycle.
    ///
    /// Device-level faults only drop the device. An empty batch is not
    /// written.
    ///
    /// # Errors
    /// - `CycleError::Registry` if the meter list cannot be obtained
    /// - `CycleError::Sink` if the batch write fails
    pub async fn run_once(&mut self) -> Result<CycleOutcome, CycleError> {
        let timestamp = Utc::now();
        let devices = self.registry.get_devices()?;

        let mut batch = CycleBatch::new(timestamp);
        let mut skipped = Vec::new();

        for device in devices.iter() {
            let result = match self.profiles.get_parameter_map(&device.model_ref) {
                Ok(params) => self
                    .reader
                    .read_all(device, &params)
                    .await
                    .map_err(DeviceFault::from),
                Err(e) => Err(DeviceFault::from(e)),
            };

            match result {
                Ok(sample) => batch.push(&self.measurement, device, &sample),
                Err(e) => {
                    tracing::error!(
                        device_id = device.id,
                        meter = %device.name,
                        error = %e,
                        "Meter skipped for this cycle"
                    );
                    skipped.push(device.id);
                }
            }
        }

        if batch.is_empty() {
            tracing::info!(timestamp = %batch.timestamp_str(), "No data sent");
        } else {
            self.sink.write_batch(&batch).await?;
            tracing::info!(
                sink = self.sink.name(),
                timestamp = %batch.timestamp_str(),
                "Data written for {} meters",
                batch.len()
            );
        }

        Ok(CycleOutcome {
            timestamp,
            attempted: devices.len(),
            written: batch.len(),
            skipped,
        })
    }
}

impl<T, S> std::fmt::Debug for CollectionCycle<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionCycle")
            .field("sink", &self.sink.name())
            .field("measurement", &self.measurement)
            .finish_non_exhaustive()
    }
}
