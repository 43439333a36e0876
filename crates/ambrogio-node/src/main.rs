//! Ambrogio Node - BT-serial to MQTT bridge with status server
//!
//! This binary runs the bridge with:
//! - An MQTT client connected to the configured broker
//! - A serial (RFCOMM/USB) or BLE link to the mower
//! - A status page and REST API
//!
//! Saving the configuration file restarts the bridge: every transport is
//! rebuilt from the freshly loaded settings.

mod portal;
mod server;

use ambrogio_bridge::{
    BridgeConfig, BridgeExit, BridgeHandle, BridgeLoop, DeviceLink, MqttBroker, OpaqueProtocol,
};
use anyhow::Context;
use clap::{Parser, ValueEnum};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use portal::FilePortal;

/// Short-range link driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LinkKind {
    /// RFCOMM-bound or USB serial port
    Serial,
    /// Bluetooth LE UART service
    Ble,
}

#[derive(Parser)]
#[command(name = "ambrogio-node")]
#[command(about = "Bridge between a mower's Bluetooth serial link and an MQTT broker")]
struct Args {
    /// Configuration file (JSON)
    #[arg(long, short, default_value = "ambrogio.json")]
    config: PathBuf,

    /// Link driver
    #[arg(long, value_enum, default_value = "serial")]
    link: LinkKind,

    /// Serial device for the serial link
    #[arg(long, default_value = "/dev/rfcomm0")]
    port: PathBuf,

    /// Bluetooth adapter index for the BLE link
    #[arg(long, default_value_t = 0)]
    adapter: usize,

    /// Status HTTP server port (0 = auto-assign)
    #[arg(long, default_value_t = 8080)]
    http_port: u16,

    /// Enable verbose logging
    #[arg(long, short)]
    verbose: bool,
}

/// Application state shared across handlers
pub struct AppState {
    /// Handle of the running bridge; None while it is being rebuilt
    pub bridge: RwLock<Option<BridgeHandle>>,
    /// Number of restarts after configuration saves
    pub restarts: AtomicU64,
    /// Set once Ctrl-C was received
    pub stopping: AtomicBool,
    /// Node start time
    pub start_time: Instant,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Ambrogio Node {}", ambrogio_bridge::VERSION);

    let state = Arc::new(AppState {
        bridge: RwLock::new(None),
        restarts: AtomicU64::new(0),
        stopping: AtomicBool::new(false),
        start_time: Instant::now(),
    });

    // Start HTTP server - bind to requested port (0 = auto-assign)
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.http_port)).await?;
    let actual_http_port = listener.local_addr()?.port();
    info!("═══════════════════════════════════════════════════════════");
    info!("  Status page: http://127.0.0.1:{}/", actual_http_port);
    info!("  REST API:    http://127.0.0.1:{}/api/status", actual_http_port);
    info!("═══════════════════════════════════════════════════════════");

    let app = server::create_router(state.clone());
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Status server error: {}", e);
        }
    });

    // Ctrl-C stops the current bridge and prevents further restarts
    {
        let state = state.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, shutting down");
                state.stopping.store(true, Ordering::SeqCst);
                let handle = state.bridge.read().clone();
                if let Some(handle) = handle {
                    let _ = handle.shutdown().await;
                }
            }
        });
    }

    loop {
        let config = load_config(&args.config)?;
        info!(
            "Bridge '{}' -> broker {} (topics under {})",
            config.thing_name,
            config.broker.address(),
            config.topics().base
        );

        let exit = match args.link {
            LinkKind::Serial => run_serial(config, &args, &state).await?,
            LinkKind::Ble => run_ble(config, &args, &state).await?,
        };
        *state.bridge.write() = None;

        if exit == BridgeExit::Shutdown || state.stopping.load(Ordering::SeqCst) {
            break;
        }
        state.restarts.fetch_add(1, Ordering::Relaxed);
        info!("Rebuilding bridge from {}", args.config.display());
    }

    info!("Ambrogio Node stopped");
    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<BridgeConfig> {
    BridgeConfig::load(path)
        .with_context(|| format!("loading configuration from {}", path.display()))
}

/// Run one bridge lifetime with the given link
async fn run_bridge<L: DeviceLink + 'static>(
    config: BridgeConfig,
    args: &Args,
    link: L,
    state: &AppState,
) -> anyhow::Result<BridgeExit> {
    let portal = FilePortal::new(&args.config, config.device.clone());
    let broker = MqttBroker::new(&config.broker);

    let (bridge, handle) = BridgeLoop::new(config, portal, broker, link, OpaqueProtocol);
    *state.bridge.write() = Some(handle.clone());
    if state.stopping.load(Ordering::SeqCst) {
        // Ctrl-C arrived while the previous bridge was being torn down
        handle.shutdown().await?;
    }

    Ok(bridge.run().await?)
}

#[cfg(feature = "serial")]
async fn run_serial(
    config: BridgeConfig,
    args: &Args,
    state: &AppState,
) -> anyhow::Result<BridgeExit> {
    let link = ambrogio_bridge::SerialLink::new(&args.port);
    run_bridge(config, args, link, state).await
}

#[cfg(not(feature = "serial"))]
async fn run_serial(
    _config: BridgeConfig,
    _args: &Args,
    _state: &AppState,
) -> anyhow::Result<BridgeExit> {
    warn!("Serial link requested but not compiled in");
    anyhow::bail!("this build has no serial link; rebuild with `--features serial`")
}

#[cfg(feature = "ble")]
async fn run_ble(config: BridgeConfig, args: &Args, state: &AppState) -> anyhow::Result<BridgeExit> {
    let link = ambrogio_bridge::BleLink::new(args.adapter);
    run_bridge(config, args, link, state).await
}

#[cfg(not(feature = "ble"))]
async fn run_ble(
    _config: BridgeConfig,
    _args: &Args,
    _state: &AppState,
) -> anyhow::Result<BridgeExit> {
    warn!("BLE link requested but not compiled in");
    anyhow::bail!("this build has no BLE link; rebuild with `--features ble`")
}
