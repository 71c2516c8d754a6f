use std::path::PathBuf;

use clap::Parser;
use rigsync_sim::{DeviceHandle, config::Config, run_telemetry, serve};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "rigsync-sim")]
#[command(about = "Simulated rig device server")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "rigsync-sim.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "tracing=info,rigsync_sim=info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        info!(path = ?cli.config, "Loading configuration");
        Config::load(&cli.config)?
    } else {
        info!("No configuration file found, using defaults");
        Config::default()
    };

    let device = DeviceHandle::from_config(&config.device, &config.telemetry)?;
    let cancel = CancellationToken::new();

    let telemetry = tokio::spawn(run_telemetry(
        device.clone(),
        config.telemetry.clone(),
        cancel.clone(),
    ));

    let listener = TcpListener::bind(config.server.addr).await?;
    info!(addr = %config.server.addr, "device server listening");

    tokio::select! {
        result = serve(listener, device, cancel.clone()) => {
            if let Err(e) = result {
                error!(error = ?e, "HTTP server error");
            }
            info!("HTTP server shut down");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }

    cancel.cancel();
    if let Err(e) = telemetry.await {
        error!(error = ?e, "telemetry task failed");
    }

    Ok(())
}
