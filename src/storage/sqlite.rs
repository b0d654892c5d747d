//! SQLite sink using sqlx.
//!
//! Each batch is written inside one transaction: a failing row rolls back
//! every row of the batch.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use super::error::SinkError;
use super::schema::init_schema;
use super::traits::TelemetrySink;
use super::types::CycleBatch;

/// Connection acquire timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// SQLite-backed telemetry sink.
///
/// Uses a single pooled connection: the sink is the only writer.
#[derive(Clone)]
pub struct SqliteSink {
    inner: SqlitePool,
}

impl std::fmt::Debug for SqliteSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSink").finish_non_exhaustive()
    }
}

impl SqliteSink {
    /// Connect to a SQLite database and create the schema.
    ///
    /// # Arguments
    ///
    /// * `url` - SQLite connection URL, e.g., `sqlite:data/energy.db`
    ///
    /// # Configuration
    ///
    /// - WAL journal mode
    /// - Normal synchronous mode
    /// - Create database if not exists
    pub async fn connect(url: &str) -> Result<Self, SinkError> {
        let options = SqliteConnectOptions::from_str(url)?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .create_if_missing(true);

        // One long-lived connection, so `sqlite::memory:` keeps its data
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(DEFAULT_CONNECT_TIMEOUT)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        init_schema(&pool).await?;
        Ok(Self { inner: pool })
    }

    /// Open (or create) a database file.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        Self::connect(&format!("sqlite:{}", path.as_ref().display())).await
    }

    /// Get the underlying sqlx pool for direct query execution.
    #[inline]
    pub fn inner(&self) -> &SqlitePool {
        &self.inner
    }

    /// Close the connection pool gracefully.
    pub async fn close(&self) {
        self.inner.close().await;
    }
}

#[async_trait::async_trait]
impl TelemetrySink for SqliteSink {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn write_batch(&self, batch: &CycleBatch) -> Result<(), SinkError> {
        let ts = batch.timestamp_str();
        let mut tx = self.inner.begin().await?;

        for entry in batch.entries() {
            for (field, value) in &entry.fields {
                sqlx::query(
                    "INSERT INTO samples (ts, measurement, device_id, meter, field, value) \
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(&ts)
                .bind(&entry.measurement)
                .bind(i64::from(entry.tags.id))
                .bind(&entry.tags.meter)
                .bind(field)
                .bind(value)
                .execute(&mut *tx)
                .await?;
            }
        }

        // Dropping `tx` on an early return rolls back
        tx.commit().await?;
        tracing::debug!(entries = batch.len(), "Batch written to SQLite");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BusParams, DeviceDescriptor};
    use crate::storage::{READ_DURATION_FIELD, Sample};
    use chrono::{TimeZone, Utc};

    fn device(id: u8, name: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            id,
            name: name.to_string(),
            model_ref: "modelX.yml".to_string(),
            bus: BusParams {
                baudrate: 9600,
                bytesize: 8,
                parity: "none".to_string(),
                stopbits: 1,
                timeout: 0.5,
            },
        }
    }

    fn batch(second: u32, devices: &[DeviceDescriptor]) -> CycleBatch {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, second).unwrap();
        let mut batch = CycleBatch::new(ts);
        for device in devices {
            let mut sample = Sample::new();
            sample.insert("power", f64::from(device.id) * 10.0);
            batch.push("energy", device, &sample);
        }
        batch
    }

    async fn row_count(sink: &SqliteSink) -> i64 {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM samples")
            .fetch_one(sink.inner())
            .await
            .unwrap();
        row.0
    }

    #[tokio::test]
    async fn test_write_batch() {
        let sink = SqliteSink::connect("sqlite::memory:").await.unwrap();
        let batch = batch(0, &[device(1, "A"), device(2, "B")]);
        sink.write_batch(&batch).await.unwrap();

        // power + read duration per meter
        assert_eq!(row_count(&sink).await, 4);

        let row: (String, String, f64) = sqlx::query_as(
            "SELECT ts, meter, value FROM samples WHERE device_id = 2 AND field = 'power'",
        )
        .fetch_one(sink.inner())
        .await
        .unwrap();
        assert_eq!(row.0, "2024-03-01T12:00:00.000000Z");
        assert_eq!(row.1, "B");
        assert_eq!(row.2, 20.0);

        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM samples WHERE field = ?")
            .bind(READ_DURATION_FIELD)
            .fetch_one(sink.inner())
            .await
            .unwrap();
        assert_eq!(row.0, 2);
    }

    #[tokio::test]
    async fn test_failed_batch_rolls_back() {
        let sink = SqliteSink::connect("sqlite::memory:").await.unwrap();
        sink.write_batch(&batch(0, &[device(2, "B")])).await.unwrap();
        assert_eq!(row_count(&sink).await, 2);

        // Meter 1 inserts fine, meter 2 collides with the first batch
        let conflicting = batch(0, &[device(1, "A"), device(2, "B")]);
        let result = sink.write_batch(&conflicting).await;
        assert!(matches!(result, Err(SinkError::Database(_))));
        assert_eq!(row_count(&sink).await, 2);

        sink.write_batch(&batch(1, &[device(1, "A")])).await.unwrap();
        assert_eq!(row_count(&sink).await, 4);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let sink = SqliteSink::connect("sqlite::memory:").await.unwrap();
        sink.write_batch(&batch(0, &[])).await.unwrap();
        assert_eq!(row_count(&sink).await, 0);
    }

    #[tokio::test]
    async fn test_open_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("energy.db");
        let sink = SqliteSink::open(&path).await.unwrap();
        sink.write_batch(&batch(0, &[device(1, "A")])).await.unwrap();
        sink.close().await;
        assert!(path.exists());

        let reopened = SqliteSink::open(&path).await.unwrap();
        assert_eq!(row_count(&reopened).await, 2);
        reopened.close().await;
    }
}
