//! Core data types for the storage layer.
//!
//! - [`Sample`]: one meter's readings for one cycle
//! - [`BatchEntry`]: a tagged sample ready for the sink
//! - [`CycleBatch`]: every entry of one cycle, sharing one timestamp

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::config::DeviceDescriptor;

/// Field carrying the time spent reading one meter, in seconds.
pub const READ_DURATION_FIELD: &str = "Time to read";

/// Measurement name written for every entry unless configured otherwise.
pub const DEFAULT_MEASUREMENT: &str = "energy";

/// Readings of one meter in one cycle.
///
/// A sample is all-or-nothing: it only exists once every parameter of the
/// meter's model has been read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sample {
    values: BTreeMap<String, f64>,
    read_duration: Duration,
}

impl Sample {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one parameter reading.
    pub fn insert(&mut self, parameter: impl Into<String>, value: f64) {
        self.values.insert(parameter.into(), value);
    }

    /// Attach the time spent reading the meter.
    pub fn with_read_duration(mut self, duration: Duration) -> Self {
        self.read_duration = duration;
        self
    }

    pub fn get(&self, parameter: &str) -> Option<f64> {
        self.values.get(parameter).copied()
    }

    /// Parameter readings, without the read duration.
    pub fn values(&self) -> &BTreeMap<String, f64> {
        &self.values
    }

    pub fn read_duration(&self) -> Duration {
        self.read_duration
    }

    /// Field set as written to the sink: readings plus [`READ_DURATION_FIELD`].
    pub fn fields(&self) -> BTreeMap<String, f64> {
        let mut fields = self.values.clone();
        fields.insert(
            READ_DURATION_FIELD.to_string(),
            self.read_duration.as_secs_f64(),
        );
        fields
    }
}

/// Identity tags of a batch entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTags {
    /// Meter bus address.
    pub id: u8,
    /// Meter display name.
    pub meter: String,
}

/// One meter's sample, tagged and ready to write.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntry {
    pub measurement: String,
    pub tags: DeviceTags,
    pub fields: BTreeMap<String, f64>,
}

/// All entries produced by one collection cycle.
///
/// Every entry shares the cycle timestamp. The batch is the unit of write:
/// sinks persist all entries or none.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleBatch {
    timestamp: DateTime<Utc>,
    entries: Vec<BatchEntry>,
}

impl CycleBatch {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            entries: Vec::new(),
        }
    }

    /// Append a meter's sample.
    pub fn push(&mut self, measurement: &str, device: &DeviceDescriptor, sample: &Sample) {
        self.entries.push(BatchEntry {
            measurement: measurement.to_string(),
            tags: DeviceTags {
                id: device.id,
                meter: device.name.clone(),
            },
            fields: sample.fields(),
        });
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Timestamp as ISO-8601 with a `Z` suffix.
    pub fn timestamp_str(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
