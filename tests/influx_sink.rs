//! InfluxDB sink tests against a local capture server.

use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::routing::post;
use chrono::{TimeZone, Utc};
use meterlog::config::{BusParams, DeviceDescriptor, SinkConfig};
use meterlog::storage::{CycleBatch, InfluxSink, Sample, SinkError, TelemetrySink};
use tokio::net::TcpListener;

// =============================================================================
// Test Helpers
// =============================================================================

#[derive(Clone, Default)]
struct Captured {
    requests: Arc<Mutex<Vec<(String, String)>>>,
}

impl Captured {
    fn take(&self) -> Vec<(String, String)> {
        std::mem::take(&mut *self.requests.lock().unwrap())
    }
}

async fn accept_write(
    State(captured): State<Captured>,
    RawQuery(query): RawQuery,
    body: String,
) -> StatusCode {
    captured
        .requests
        .lock()
        .unwrap()
        .push((query.unwrap_or_default(), body));
    StatusCode::NO_CONTENT
}

async fn reject_write() -> (StatusCode, &'static str) {
    (
        StatusCode::NOT_FOUND,
        r#"{"error":"database not found: \"energy\""}"#,
    )
}

/// Start a capture server and return its port.
async fn start_server(router: Router) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let port = listener.local_addr().expect("Failed to get local addr").port();

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    port
}

fn device(id: u8, name: &str) -> DeviceDescriptor {
    DeviceDescriptor {
        id,
        name: name.to_string(),
        model_ref: "modelX.yml".to_string(),
        bus: BusParams {
            baudrate: 9600,
            bytesize: 8,
            parity: "even".to_string(),
            stopbits: 1,
            timeout: 0.5,
        },
    }
}

fn batch() -> CycleBatch {
    let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let mut batch = CycleBatch::new(ts);
    for (id, name, power) in [(1, "A", 230.5), (2, "B", 120.0)] {
        let mut sample = Sample::new();
        sample.insert("power", power);
        batch.push("energy", &device(id, name), &sample);
    }
    batch
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_batch_is_one_request() {
    let captured = Captured::default();
    let router = Router::new()
        .route("/write", post(accept_write))
        .with_state(captured.clone());
    let port = start_server(router).await;

    let config = SinkConfig::influxdb("127.0.0.1", port, "energy").with_credentials("logger", "secret");
    let sink = InfluxSink::new(&config).unwrap();
    sink.write_batch(&batch()).await.unwrap();

    let requests = captured.take();
    assert_eq!(requests.len(), 1);

    let (query, body) = &requests[0];
    assert!(query.contains("db=energy"));
    assert!(query.contains("precision=ns"));
    assert!(query.contains("u=logger"));
    assert!(query.contains("p=secret"));

    let lines: Vec<&str> = body.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(
        lines[0],
        "energy,id=1,meter=A Time\\ to\\ read=0.0,power=230.5 1700000000000000000"
    );
    assert!(lines[1].starts_with("energy,id=2,meter=B "));
}

#[tokio::test]
async fn test_rejected_write() {
    let router = Router::new().route("/write", post(reject_write));
    let port = start_server(router).await;

    let sink = InfluxSink::new(&SinkConfig::influxdb("127.0.0.1", port, "energy")).unwrap();
    let err = sink.write_batch(&batch()).await.unwrap_err();
    match err {
        SinkError::Rejected { status, body } => {
            assert_eq!(status, 404);
            assert_eq!(body, "database not found: \"energy\"");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_unreachable_server() {
    // Bind then drop to get a port nobody listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let sink = InfluxSink::new(&SinkConfig::influxdb("127.0.0.1", port, "energy")).unwrap();
    let err = sink.write_batch(&batch()).await.unwrap_err();
    assert!(matches!(err, SinkError::Http(_)));
}
