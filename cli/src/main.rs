//! `mttrack` CLI: run the tracking service, or replay a recorded
//! measurement log through the pipeline offline.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracker_core::TrackManager;
use tracker_service::config::DEFAULT_CONFIG_FILE;
use tracker_service::ingest::decode_measurement;
use tracker_service::{CycleReport, Service, ServiceConfig, UdpTransport};

#[derive(Parser)]
#[command(name = "mttrack", about = "Multi-target tracking service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the service: UDP transport in, cycle reports out, health endpoint.
    Serve {
        /// Configuration file (created with defaults when missing)
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
    /// Feed a JSON-lines measurement log through the pipeline and print the
    /// per-cycle reports.
    Replay {
        /// Path to a file with one ingest message per line
        input: PathBuf,
        /// Cycle length in milliseconds
        #[arg(long, default_value_t = 100)]
        interval_ms: u64,
        /// Write the final cycle report to a JSON file
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { config } => serve(&config),
        Commands::Replay {
            input,
            interval_ms,
            output,
        } => replay(&input, interval_ms, output.as_deref()),
    }
}

fn serve(config_path: &Path) -> Result<()> {
    let config = ServiceConfig::load_or_init(config_path);

    let listen = SocketAddr::from(([0, 0, 0, 0], config.transport.listen_port));
    let peer: SocketAddr = config
        .transport
        .peer_addr
        .parse()
        .with_context(|| format!("invalid peer address {:?}", config.transport.peer_addr))?;
    let transport = Arc::new(UdpTransport::bind(listen, peer).context("binding transport")?);

    let mut service = Service::start(&config, transport.clone())?;
    let listener = transport
        .spawn_listener(service.ingest(), service.running())
        .context("starting transport receive loop")?;
    service.attach_listener(listener);

    service.run_until_shutdown()
}

fn replay(input: &Path, interval_ms: u64, output: Option<&Path>) -> Result<()> {
    let text = std::fs::read_to_string(input)
        .with_context(|| format!("reading {}", input.display()))?;

    let mut measurements = Vec::new();
    let mut skipped = 0usize;
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        match decode_measurement(line.as_bytes()) {
            Ok(Some(meas)) => measurements.push(meas),
            Ok(None) => skipped += 1,
            Err(err) => {
                skipped += 1;
                info!(%err, "skipping undecodable line");
            }
        }
    }
    measurements.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
    println!(
        "Replaying {} measurements ({} skipped) at {} ms cycles...",
        measurements.len(),
        skipped,
        interval_ms
    );

    let config = ServiceConfig::default();
    let mut manager = TrackManager::new(config.tracker_config());
    let cycle_len = interval_ms as f64 / 1000.0;

    let mut last_report = None;
    let mut cycles = 0usize;
    let mut at = 0usize;
    while at < measurements.len() {
        // One batch per cycle window, mirroring the live worker.
        let window_end = measurements[at].timestamp + cycle_len;
        let mut end = at;
        while end < measurements.len() && measurements[end].timestamp < window_end {
            end += 1;
        }
        let batch = &measurements[at..end];
        at = end;
        cycles += 1;

        if let Some(last) = batch.last() {
            manager.predict_to(last.timestamp);
        }
        manager.process_measurements(batch);

        let report = CycleReport::build(&manager.get_tracks(), Utc::now());
        if !report.is_empty() {
            println!("{}", serde_json::to_string(&report)?);
            last_report = Some(report);
        }
    }

    let confirmed = manager
        .get_tracks()
        .iter()
        .filter(|t| t.is_confirmed())
        .count();
    println!(
        "Done: {} cycles, {} tracks alive ({} confirmed)",
        cycles,
        manager.track_count(),
        confirmed
    );

    if let (Some(path), Some(report)) = (output, last_report) {
        std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
        println!("Final report saved to {}", path.display());
    }

    Ok(())
}
