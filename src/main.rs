//! Bridge service binary
//!
//! Wires configuration, transports, the sync engine and the two
//! schedulers together, then runs until interrupted. The crate ships no
//! S7 or KNXnet/IP wire implementation; deployments embed the library
//! and supply their transports, while `--sim` runs the full bridge
//! against the in-memory transports for smoke testing.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use knxbridge::scheduler::{PollScheduler, QueueDispatcher};
use knxbridge::transport::mock::{MockBusTransport, MockPlcTransport};
use knxbridge::transport::{BusTransport, PlcTransport};
use knxbridge::{BridgeConfig, OutboundQueue, SyncEngine, TypeRegistry};

#[derive(Parser, Debug)]
#[command(name = "knxbridge", about = "S7 PLC to KNX bus synchronization bridge")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "config/knxbridge.yaml", env = "KNXBRIDGE_CONFIG")]
    config: String,

    /// Validate the configuration and exit
    #[arg(long)]
    validate: bool,

    /// Run against in-memory simulation transports
    #[arg(long)]
    sim: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = BridgeConfig::load(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config))?;

    if args.validate {
        println!("{}", serde_json::to_string_pretty(&config)?);
        info!("Configuration is valid");
        return Ok(());
    }

    if !args.sim {
        bail!(
            "no wire transport backend is built into this binary; \
             run with --sim or embed the library with real transports"
        );
    }

    let plc: Arc<MockPlcTransport> = Arc::new(MockPlcTransport::with_image(demo_image()));
    let bus = Arc::new(MockBusTransport::new());
    run_bridge(config, plc, bus).await
}

async fn run_bridge(
    config: BridgeConfig,
    plc: Arc<dyn PlcTransport>,
    bus: Arc<dyn BusTransport>,
) -> anyhow::Result<()> {
    info!(
        "Starting bridge: PLC {} DB {}, KNX gateway {}:{}",
        config.plc.host, config.plc.db_number, config.knx.gateway, config.knx.port
    );

    plc.connect().await?;
    bus.connect().await?;

    let queue = Arc::new(OutboundQueue::new(
        config.queue.capacity,
        config.queue.overflow_policy,
    ));
    let engine = Arc::new(SyncEngine::new(
        TypeRegistry::new(),
        config.plc.start_offset,
        queue.clone(),
        plc.clone(),
        bus.clone(),
        config.plc.db_number,
    ));

    let cancel = CancellationToken::new();
    let scheduler = PollScheduler::new(
        engine.clone(),
        plc.clone(),
        config.plc.db_number,
        Duration::from_millis(config.plc.poll_interval_ms),
        cancel.clone(),
    );
    let dispatcher = QueueDispatcher::new(
        queue,
        bus.clone(),
        Duration::from_millis(config.knx.dispatch_interval_ms),
        cancel.clone(),
    );

    let poll_handle = tokio::spawn(scheduler.run());
    let dispatch_handle = tokio::spawn(dispatcher.run());

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("Shutting down");
    cancel.cancel();
    let _ = poll_handle.await;
    let _ = dispatch_handle.await;

    bus.disconnect().await?;
    plc.disconnect().await?;
    info!("Bridge stopped cleanly");
    Ok(())
}

/// A small data block image for simulation runs: a boolean, a percentage
/// and an RGB point behind the 2-byte size header.
fn demo_image() -> Vec<u8> {
    let mut image = vec![0u8; 2];

    // bool point at 0/17/93, value true
    image.extend_from_slice(&1793u32.to_be_bytes());
    image.extend_from_slice(&1i16.to_be_bytes());
    image.push(0x10);
    image.extend_from_slice(&[0; 7]);

    // percentage point at 0/17/94, value 60
    image.extend_from_slice(&1794u32.to_be_bytes());
    image.extend_from_slice(&5i16.to_be_bytes());
    image.extend_from_slice(&[0, 0]);
    image.extend_from_slice(&60i16.to_be_bytes());
    image.extend_from_slice(&[0; 4]);

    // RGB point at 0/20/1
    image.extend_from_slice(&2001u32.to_be_bytes());
    image.extend_from_slice(&232i16.to_be_bytes());
    image.push(0);
    image.extend_from_slice(&[255, 128, 0]);

    let size = image.len() as u16;
    image[0..2].copy_from_slice(&size.to_be_bytes());
    image
}
