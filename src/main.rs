// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/wattscope

//! WattScope - Non-Intrusive Load Monitoring Engine
//!
//! Ingests a stream of power readings from a single metering point,
//! detects appliance switching events, identifies the appliance behind
//! each event against a learned catalogue, and keeps learning from
//! detections and user corrections.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use wattscope::{Config, VERSION};

/// WattScope - Non-Intrusive Load Monitoring Engine
#[derive(Parser, Debug)]
#[command(name = "wattscope")]
#[command(author = "WattScope Project")]
#[command(version = VERSION)]
#[command(about = "Non-intrusive load monitoring and appliance identification")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable trace-level logging
    #[arg(long)]
    trace: bool,

    /// Demo mode with a simulated meter
    #[arg(long)]
    demo: bool,

    /// WebSocket server port
    #[arg(long, default_value = "5050")]
    ws_port: u16,

    /// MQTT broker address
    #[arg(long)]
    mqtt_broker: Option<String>,

    /// Data output directory
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.trace {
        Level::TRACE
    } else if args.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(args.debug)
        .with_line_number(args.debug)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("WattScope v{} - Non-Intrusive Load Monitoring Engine", VERSION);

    // Load or create configuration
    let config_path = args.config.unwrap_or_else(Config::default_path);
    let mut config = Config::load_or_create(&config_path)?;

    // Override with command line args
    if args.demo {
        config.demo_mode = true;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    config.streaming.websocket_port = args.ws_port;
    if let Some(mqtt) = args.mqtt_broker {
        config.streaming.mqtt_enabled = true;
        config.streaming.mqtt_broker = mqtt;
    }

    info!("Configuration loaded from {:?}", config_path);
    info!("Demo mode: {}", config.demo_mode);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))
}

/// Wire up the collaborators and run until interrupted.
async fn run(config: Config) -> Result<()> {
    use wattscope::{
        core::{EventBus, Monitor, RetentionSweeper},
        db::{Database, EventSink, ProfileRepository},
        streaming::StreamingManager,
    };
    use tokio::sync::broadcast;

    std::fs::create_dir_all(&config.data_dir)?;

    let config = Arc::new(config);
    let (shutdown_tx, _) = broadcast::channel::<()>(4);

    // Persistence
    let db = Arc::new(Database::open(&config.database)?);

    // Notification fan-out
    let bus = Arc::new(EventBus::new(1000));

    // The monitoring core
    let profiles: Arc<dyn ProfileRepository> = db.clone();
    let sink: Arc<dyn EventSink> = db.clone();
    let monitor = Arc::new(Monitor::new(config.clone(), profiles, sink, bus.clone()));

    // Outward-facing surfaces
    let mut streaming = StreamingManager::new(
        config.streaming.clone(),
        monitor.clone(),
        db.clone(),
        bus.clone(),
    )
    .await?;
    streaming.start(shutdown_tx.clone()).await?;

    // Hourly retention sweep, independent of the sample path
    let sweeper = RetentionSweeper::new(db.clone(), config.retention.clone());
    tokio::spawn(sweeper.run(shutdown_tx.subscribe()));

    // Demo meter feed
    if config.demo_mode {
        tokio::spawn(run_demo_feed(
            monitor.clone(),
            config.clone(),
            shutdown_tx.subscribe(),
        ));
    }

    info!("WattScope running - press Ctrl+C to shut down");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, cleaning up...");
    let _ = shutdown_tx.send(());

    info!("WattScope shutdown complete");
    Ok(())
}

/// Feeds simulated readings through the monitor at the configured rate.
async fn run_demo_feed(
    monitor: Arc<wattscope::Monitor>,
    config: Arc<Config>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    use wattscope::meter::{MeterSimulator, MeterSource};

    let mut meter = MeterSimulator::new(&config.meter.source_id, config.meter.sample_rate);
    if let Err(e) = meter.connect().await {
        warn!("Demo meter failed to connect: {}", e);
        return;
    }

    let period = std::time::Duration::from_secs_f64(1.0 / config.meter.sample_rate.max(0.01));
    let mut interval = tokio::time::interval(period);

    info!("Demo meter feeding samples at {} Hz", config.meter.sample_rate);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match meter.read().await {
                    Ok(sample) => {
                        if let Err(e) = monitor.ingest_sample(sample).await {
                            warn!("Demo sample rejected: {}", e);
                        }
                    }
                    Err(e) => warn!("Demo meter read failed: {}", e),
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}
