//! Sink trait.

use std::sync::Arc;

use super::error::SinkError;
use super::types::CycleBatch;

/// Persists one cycle's batch as a unit.
///
/// # Atomicity
///
/// `write_batch` must either persist every entry of the batch or none of
/// them. Callers never split a batch and never retry a failed write within
/// the same cycle.
#[async_trait::async_trait]
pub trait TelemetrySink: Send + Sync + 'static {
    /// Short backend name for logs (e.g. "influxdb").
    fn name(&self) -> &str;

    /// Write every entry of `batch`.
    async fn write_batch(&self, batch: &CycleBatch) -> Result<(), SinkError>;
}

#[async_trait::async_trait]
impl<T: TelemetrySink + ?Sized> TelemetrySink for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn write_batch(&self, batch: &CycleBatch) -> Result<(), SinkError> {
        (**self).write_batch(batch).await
    }
}
