//! InfluxDB 1.x sink.
//!
//! Renders a [`CycleBatch`] as line protocol and sends it in a single
//! `POST /write` request. InfluxDB applies one write request as a unit, so a
//! failed request leaves nothing behind.

use std::fmt::Write as _;

use reqwest::{Client, Url};

use super::error::SinkError;
use super::traits::TelemetrySink;
use super::types::CycleBatch;
use crate::config::SinkConfig;

/// InfluxDB HTTP write client.
pub struct InfluxSink {
    client: Client,
    write_url: Url,
    dbname: String,
}

impl InfluxSink {
    /// Build a sink from configuration.
    ///
    /// # Errors
    /// Returns `SinkError::Config` if the URL or HTTP client cannot be built.
    pub fn new(config: &SinkConfig) -> Result<Self, SinkError> {
        let base = format!("http://{}:{}/write", config.host, config.port);
        let mut params = vec![("db", config.dbname.as_str()), ("precision", "ns")];
        if !config.user.is_empty() {
            params.push(("u", config.user.as_str()));
            params.push(("p", config.password.as_str()));
        }
        let write_url = Url::parse_with_params(&base, &params)
            .map_err(|e| SinkError::Config(format!("invalid influxdb url '{base}': {e}")))?;

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SinkError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            write_url,
            dbname: config.dbname.clone(),
        })
    }
}

impl std::fmt::Debug for InfluxSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // write_url carries the password
        f.debug_struct("InfluxSink")
            .field("host", &self.write_url.host_str())
            .field("port", &self.write_url.port())
            .field("dbname", &self.dbname)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl TelemetrySink for InfluxSink {
    fn name(&self) -> &str {
        "influxdb"
    }

    async fn write_batch(&self, batch: &CycleBatch) -> Result<(), SinkError> {
        let body = render_lines(batch)?;
        let response = self
            .client
            .post(self.write_url.clone())
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                body: rejection_message(&body),
            });
        }

        tracing::debug!(db = %self.dbname, entries = batch.len(), "Batch written to InfluxDB");
        Ok(())
    }
}

/// Render a batch as line protocol, one line per entry.
///
/// # Errors
/// Returns `SinkError::Config` if the timestamp cannot be expressed in
/// nanoseconds.
pub fn render_lines(batch: &CycleBatch) -> Result<String, SinkError> {
    let ts = batch.timestamp().timestamp_nanos_opt().ok_or_else(|| {
        SinkError::Config(format!("timestamp out of range: {}", batch.timestamp_str()))
    })?;

    let mut out = String::new();
    for entry in batch.entries() {
        out.push_str(&escape(&entry.measurement, &[',', ' ']));
        let _ = write!(out, ",id={}", entry.tags.id);
        let _ = write!(out, ",meter={}", escape(&entry.tags.meter, &[',', '=', ' ']));

        for (i, (field, value)) in entry.fields.iter().enumerate() {
            out.push(if i == 0 { ' ' } else { ',' });
            // Debug keeps a decimal point so InfluxDB always types the field as float
            let _ = write!(out, "{}={:?}", escape(field, &[',', '=', ' ']), value);
        }

        let _ = writeln!(out, " {ts}");
    }
    Ok(out)
}

/// InfluxDB reports write errors as `{"error": "..."}`.
fn rejection_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error")?.as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

fn escape(raw: &str, special: &[char]) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == '\\' || special.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
