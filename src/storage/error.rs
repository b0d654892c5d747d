//! Sink-specific error types.
//!
//! Every sink write returns [`SinkError`] on failure. A failed write means
//! none of the batch was persisted.

use thiserror::Error;

/// Errors that can occur while writing a batch.
#[derive(Debug, Error)]
pub enum SinkError {
    /// HTTP transport error (connect, timeout, body).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status.
    #[error("write rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Database operation failed (sqlx error).
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Sink could not be built from its configuration.
    #[error("sink config error: {0}")]
    Config(String),
}
