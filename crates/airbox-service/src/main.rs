//! Airbox gateway - stream one sensor to HTTP.
//!
//! Run with: `cargo run -p airbox-service -- --addr AA:BB:CC:DD:EE:FF`

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use airbox_core::{BleTransport, ConnectionConfig, reading_store};
use airbox_service::{
    AppState, Config, Controller, Overrides, bind_listener, serve, shutdown_signal,
};

const EXIT_FATAL: u8 = 1;

/// Airbox gateway - BLE sensor readings over HTTP.
#[derive(Parser, Debug)]
#[command(name = "airbox-service")]
#[command(version, about, long_about = None)]
struct Args {
    /// Device address: MAC on Linux/Windows, CoreBluetooth UUID on macOS.
    #[arg(short, long)]
    addr: Option<String>,

    /// Bind address for the HTTP server (default ":6161").
    #[arg(short, long)]
    bind: Option<String>,

    /// Send the CO2 calibration command and exit.
    #[arg(long)]
    calibrate: bool,

    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Connect timeout in seconds (default 5).
    #[arg(long, value_name = "SECS")]
    connect_timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging() {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::from(EXIT_FATAL);
    }

    match run(args).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

fn init_logging() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("airbox_service=info".parse()?)
                .add_directive("airbox_core=info".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .init();
    Ok(())
}

async fn run(args: Args) -> anyhow::Result<u8> {
    // Load configuration
    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    // Override config with CLI args
    let config = config.with_overrides(Overrides {
        address: args.addr,
        bind: args.bind,
        connect_timeout_secs: args.connect_timeout,
    });
    config.validate()?;
    let address = config.address()?;

    let connect_timeout = config.connect_timeout();
    let transport = BleTransport::with_config(ConnectionConfig::within(connect_timeout));
    let mut controller = Controller::new(transport, address, connect_timeout);

    if args.calibrate {
        info!("Sending calibration command");
        controller.calibrate().await.context("Calibration failed")?;
        return Ok(0);
    }

    let listener = bind_listener(&config.bind_addrs()?)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;

    let (updater, readings) = reading_store();
    controller
        .start_streaming(updater)
        .await
        .context("Failed to start streaming")?;

    let shutdown = CancellationToken::new();
    let server = tokio::spawn(serve(listener, AppState::new(readings), shutdown.clone()));

    let outcome = controller.run_until_shutdown(shutdown_signal()).await?;

    shutdown.cancel();
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "HTTP server failed"),
        Err(e) => error!(error = %e, "HTTP server task panicked"),
    }

    info!(?outcome, "Gateway stopped");
    Ok(outcome.exit_code())
}
