//! Database schema for the SQLite sink.

use sqlx::SqlitePool;

use crate::storage::SinkError;

/// One row per (cycle, meter, field).
///
/// `ts` is the cycle timestamp in ISO-8601 with a `Z` suffix. A meter cannot
/// report the same field twice in one cycle, so a second write of the same
/// batch fails on the primary key.
pub const SAMPLES_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS samples (
    ts          TEXT NOT NULL,
    measurement TEXT NOT NULL,
    device_id   INTEGER NOT NULL,
    meter       TEXT NOT NULL,
    field       TEXT NOT NULL,
    value       REAL NOT NULL,
    PRIMARY KEY (ts, measurement, device_id, field)
)
"#;

pub const SAMPLES_METER_INDEX_DDL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_samples_meter_ts ON samples (meter, ts)
"#;

/// Create tables and indexes if they don't exist.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), SinkError> {
    sqlx::query(SAMPLES_TABLE_DDL).execute(pool).await?;
    sqlx::query(SAMPLES_METER_INDEX_DDL).execute(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_schema_is_idempotent() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();
        init_schema(&pool).await.unwrap();

        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'samples'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(row.0, 1);
    }
}
