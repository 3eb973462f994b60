//! Adalight ambient lighting daemon
//!
//! Samples the edges of the configured displays and streams the colors to an
//! Adalight serial strand and any configured Open Pixel Control servers.
//!
//! ## Architecture
//! - **Driver thread** (std::thread): owns capture and transports, ticks at `fpsMax`
//! - **HTTP server** (tokio/axum, feature `api`): status, LED preview, session control
//!
//! ## Usage
//! ```sh
//! RUST_LOG=debug ./target/release/adalight-rs --config AdaLight.config.json --port 8080
//! ```

use adalight_rs::config::Settings;
use adalight_rs::driver::{self, DriverCommand, DriverStatus, SharedStatus};
use adalight_rs::pipeline::AmbientPipeline;
use adalight_rs::{is_running, setup_signal_handler};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// How often shutdown waits check the Ctrl+C flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

/// Adalight ambient lighting driver
#[derive(Parser)]
#[command(name = "adalight-rs")]
#[command(about = "Stream screen-edge colors to Adalight and OPC LED strips")]
#[command(version)]
struct Args {
    /// JSON configuration file; written with defaults if it does not exist
    #[arg(long, default_value = "AdaLight.config.json")]
    config: PathBuf,

    /// Port for the HTTP control API
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Run without the HTTP control API
    #[arg(long)]
    no_api: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_ansi(false) // Disable ANSI color codes for systemd/journald
        .compact()
        .init();

    let args = Args::parse();

    let settings = match Settings::load_or_init(&args.config) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!("Adalight driver v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Config: {}", args.config.display());
    tracing::info!(
        "{} display(s), {} LEDs, {} OPC server(s), {} fps max",
        settings.displays.len(),
        settings.total_led_count(),
        settings.servers.len(),
        settings.fps_max
    );

    let running = match setup_signal_handler() {
        Ok(running) => running,
        Err(e) => {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Driver writes, HTTP handlers read.
    let status = Arc::new(Mutex::new(DriverStatus::new(settings.total_led_count())));

    let pipeline = AmbientPipeline::from_settings(settings);
    let (command_tx, driver_handle) = match driver::spawn(pipeline, status.clone()) {
        Ok(spawned) => spawned,
        Err(e) => {
            tracing::error!("Failed to start driver thread: {e}");
            return ExitCode::FAILURE;
        }
    };

    let served = if args.no_api {
        wait_for_shutdown(&running);
        Ok(())
    } else {
        serve(args.port, command_tx.clone(), status, running.clone())
    };

    // Blank the LEDs and release everything before exiting.
    let _ = command_tx.send(DriverCommand::Shutdown);
    if driver_handle.join().is_err() {
        tracing::error!("Driver thread panicked");
        return ExitCode::FAILURE;
    }

    match served {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Server error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn wait_for_shutdown(running: &AtomicBool) {
    while is_running(running) {
        std::thread::sleep(SHUTDOWN_POLL);
    }
    tracing::info!("Shutting down");
}

#[cfg(feature = "api")]
#[tokio::main(flavor = "current_thread")]
async fn serve(
    port: u16,
    command_tx: Sender<DriverCommand>,
    status: SharedStatus,
    running: Arc<AtomicBool>,
) -> std::io::Result<()> {
    use adalight_rs::server::{self, AppState};

    let app = server::create_router(AppState { command_tx, status });

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);
    tracing::info!("API Documentation: http://localhost:{}/docs", port);
    tracing::info!("Try: curl http://localhost:{}/api/v1/status", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while is_running(&running) {
                tokio::time::sleep(SHUTDOWN_POLL).await;
            }
            tracing::info!("Shutting down");
        })
        .await
}

#[cfg(not(feature = "api"))]
fn serve(
    _port: u16,
    _command_tx: Sender<DriverCommand>,
    _status: SharedStatus,
    running: Arc<AtomicBool>,
) -> std::io::Result<()> {
    tracing::warn!("Built without the `api` feature, running without the HTTP API");
    wait_for_shutdown(&running);
    Ok(())
}
