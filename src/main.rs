//! Meterlog Binary Entry Point
//!
//! Polls the energy meters listed in the meter file over one serial bus and
//! writes a batch per cycle to the configured sink. Core functionality is
//! provided by the `meterlog` library crate.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use clap::Parser;
use meterlog::{
    CollectionCycle, DeviceRegistry, FileSource, ProfileStore, RegisterReader, RtuTransport,
    Scheduler, SinkConfig, config::parse_interval, storage,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Meterlog - Energy Meter Telemetry
#[derive(Parser, Debug)]
#[command(name = "meterlog", version, about, long_about = None)]
struct Cli {
    /// Polling interval, in seconds or as a duration (e.g. 30s, 5m)
    #[arg(
        short,
        long,
        default_value = "60",
        value_parser = parse_interval,
        env = "METERLOG_INTERVAL"
    )]
    interval: Duration,

    /// Path to the meter list
    #[arg(short, long, default_value = "meters.yml", env = "METERLOG_METERS")]
    meters: PathBuf,

    /// Path to the sink configuration
    #[arg(
        short,
        long,
        default_value = "influx_config.yml",
        env = "METERLOG_SINK_CONFIG"
    )]
    sink_config: PathBuf,

    /// Serial device of the RS-485 bus
    #[arg(short, long, default_value = "/dev/ttyAMA0", env = "METERLOG_PORT")]
    port: String,

    /// Log level or filter directive (RUST_LOG takes precedence)
    #[arg(short, long, default_value = "info", env = "METERLOG_LOG")]
    log: String,

    /// Append logs to this file instead of stderr
    #[arg(long, env = "METERLOG_LOGFILE")]
    logfile: Option<PathBuf>,

    /// Stop after this many cycles
    #[arg(long, hide = true, env = "METERLOG_MAX_ITERATIONS")]
    max_iterations: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(&cli.log, cli.logfile.as_deref())?;

    tracing::info!("Meterlog - Energy Meter Telemetry");

    // Sink
    tracing::info!("Loading sink configuration from: {}", cli.sink_config.display());
    let sink_config = SinkConfig::load(&cli.sink_config)?;
    let sink = storage::connect(&sink_config).await?;

    // Meter list, must load on the first try
    tracing::info!("Loading meters from: {}", cli.meters.display());
    let mut registry = DeviceRegistry::new(FileSource::new(&cli.meters));
    let devices = registry.get_devices()?;

    let mut listing: Vec<_> = devices.iter().map(|d| (d.id, d.name.as_str())).collect();
    listing.sort_unstable_by_key(|(id, _)| *id);
    tracing::info!("Meter id <--> name");
    for (id, name) in listing {
        tracing::info!("{:>3} <--> {}", id, name);
    }

    // Model files are resolved next to the meter list
    let base_dir = cli
        .meters
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let profiles = ProfileStore::new(base_dir);

    let transport = RtuTransport::open(cli.port.as_str())?;
    let mut cycle = CollectionCycle::new(registry, profiles, RegisterReader::new(transport), sink)
        .with_measurement(sink_config.measurement.as_str());

    let scheduler = Scheduler::new(cli.interval).with_max_iterations(cli.max_iterations);
    tracing::info!(interval = ?cli.interval, "Polling started, press Ctrl+C to shutdown");

    tokio::select! {
        stats = scheduler.run(&mut cycle) => {
            tracing::info!(
                iterations = stats.iterations,
                failures = stats.failures,
                "Iteration limit reached"
            );
        }
        _ = shutdown_signal() => {}
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Install the tracing subscriber.
///
/// The filter comes from `RUST_LOG` when set, otherwise from `level`.
fn init_tracing(level: &str, logfile: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)?,
    };
    let registry = tracing_subscriber::registry().with(filter);

    match logfile {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            registry
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .init();
        }
        None => registry.with(fmt::layer()).init(),
    }
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_interval() {
        let cli = Cli::try_parse_from(["meterlog", "--interval", "5m"]).unwrap();
        assert_eq!(cli.interval, Duration::from_secs(300));

        let err = Cli::try_parse_from(["meterlog", "--interval", "18446744073709551615"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        assert!(Cli::try_parse_from(["meterlog", "-i", "2days"]).is_err());
    }
}
