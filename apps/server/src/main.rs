mod control;
mod hub;
mod pipeline;
mod ws;

use anyhow::Context;
use clap::Parser;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::atomic::AtomicU8;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use analysis::Analyzer;
use pitwall_engineer::Engineer;
use pitwall_ingest_gt7::{frame_channel, GT7Config, GT7Source, TelemetrySource};
use pitwall_io::{ConfigStore, SessionLogger};

use control::Control;
use hub::Hub;

const FRAME_QUEUE_CAP: usize = 64;
const CLIENT_EVENT_QUEUE_CAP: usize = 256;
const LAP_EVENT_QUEUE_CAP: usize = 16;

#[derive(Parser, Debug)]
#[command(name = "pitwall-server", about = "GT7 telemetry relay and race-engineer server")]
struct Args {
    /// Console address; when set, discovery is skipped.
    #[arg(long, env = "PS5_IP")]
    ps5_ip: Option<Ipv4Addr>,

    /// Dashboard WebSocket port.
    #[arg(long, env = "WS_PORT", default_value_t = 4401)]
    ws_port: u16,

    /// Config and session-log directory; defaults to the platform data dir.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Client telemetry rate cap.
    #[arg(long, default_value_t = pipeline::DEFAULT_BROADCAST_HZ)]
    broadcast_hz: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let args = Args::parse();

    let data_dir = args
        .data_dir
        .or_else(|| dirs_next::data_dir().map(|d| d.join("pitwall")))
        .unwrap_or_else(|| PathBuf::from("."));
    info!(dir = %data_dir.display(), "data directory");

    let store = Arc::new(ConfigStore::load(data_dir.join("config.json")));
    store.apply_env_override();

    let logger = SessionLogger::spawn(data_dir.join("sessions"));
    let engineer = Arc::new(Engineer::new());
    let analyzer = Arc::new(parking_lot::Mutex::new(Analyzer::new()));
    let hub = Hub::new();
    let verbosity = Arc::new(AtomicU8::new(model::Verbosity::default().level()));

    // udp -> frames
    let (frame_tx, frame_rx) = frame_channel(FRAME_QUEUE_CAP);
    let source = GT7Source::new(GT7Config { console_ip: args.ps5_ip, ..Default::default() });
    let mut ingest = tokio::spawn(async move { source.run(frame_tx).await });

    // frames -> analyzer/logger/clients, plus the two schedulers
    let (lap_tx, lap_rx) = mpsc::channel(LAP_EVENT_QUEUE_CAP);
    let consumer = pipeline::spawn_consumer(
        frame_rx,
        analyzer.clone(),
        logger.handle(),
        hub.clone(),
        lap_tx,
        args.broadcast_hz,
    );
    let scheduler = pipeline::spawn_scheduler(
        analyzer.clone(),
        engineer.clone(),
        hub.clone(),
        store.clone(),
        lap_rx,
        verbosity.clone(),
    );
    let context = pipeline::spawn_context_ticker(analyzer.clone(), engineer.clone());

    // dashboard transport + control plane
    let listener = TcpListener::bind(("0.0.0.0", args.ws_port))
        .await
        .with_context(|| format!("bind dashboard port {}", args.ws_port))?;
    info!(port = args.ws_port, "dashboard transport up");
    let (event_tx, event_rx) = mpsc::channel(CLIENT_EVENT_QUEUE_CAP);
    let transport = tokio::spawn(ws::run(listener, hub.clone(), event_tx));
    let control = tokio::spawn(
        Control::new(hub.clone(), store.clone(), engineer.clone(), verbosity.clone())
            .run(event_rx),
    );

    let run_error = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            None
        }
        result = &mut ingest => {
            match result {
                Ok(Err(e)) => error!(error = %e, "telemetry source failed"),
                Ok(Ok(())) => error!("telemetry source exited unexpectedly"),
                Err(e) => error!(error = %e, "telemetry task aborted"),
            }
            Some(anyhow::anyhow!("telemetry source is down; exiting"))
        }
    };

    engineer.stop().await;
    for task in [consumer, scheduler, context, transport, control] {
        task.abort();
    }
    ingest.abort();
    logger.shutdown();

    match run_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
