use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use jiff::Timestamp;
use rigsync_client::transport::WsTransport;
use rigsync_client::{CancellationToken, Session, SessionHandle};
use rigsync_core::{DeviceSnapshot, MotorSpeed};
use rigsync_ctl::config::Config;
use rigsync_ctl::{Outcome, propose, render, wait_for_sync};
use tracing::info;

#[derive(Parser)]
#[command(name = "rigsync-ctl")]
#[command(about = "Operator console for a rig device server")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "rigsync-ctl.toml")]
    config: PathBuf,

    /// Override the device server URL from the configuration
    #[arg(long)]
    url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print every change of the device mirror
    Watch {
        /// One JSON object per line instead of text
        #[arg(long)]
        json: bool,
    },
    /// Propose a new valve position and motor speed
    Set {
        #[arg(long, value_enum)]
        valve: Valve,
        /// Motor speed in RPM (0 to 5000)
        #[arg(long, value_parser = clap::value_parser!(i64).range(0..=5000))]
        motor: i64,
    },
    /// Flip the valve, leaving the motor as it is
    ToggleValve,
}

#[derive(Clone, Copy, ValueEnum)]
enum Valve {
    Open,
    Closed,
}

#[tokio::main]
async fn main() -> color_eyre::Result<ExitCode> {
    color_eyre::install()?;

    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "tracing=warn,rigsync_ctl=info,rigsync_client=warn".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = if cli.config.exists() {
        info!(path = ?cli.config, "Loading configuration");
        Config::load(&cli.config)?
    } else {
        info!("No configuration file found, using defaults");
        Config::default()
    };
    if let Some(url) = cli.url {
        config.server.url = url;
    }

    let cancel = CancellationToken::new();
    let (transport, events) = WsTransport::connect(config.ws_config(), cancel.clone());
    let (handle, task) = Session::spawn(transport, events, cancel.clone());
    let timeout = config.session.reply_timeout();

    let code = match cli.command {
        Command::Watch { json } => {
            watch(&handle, json).await?;
            ExitCode::SUCCESS
        }
        Command::Set { valve, motor } => {
            let state = wait_for_sync(&handle, timeout).await?;
            let proposed = DeviceSnapshot {
                valve_open: matches!(valve, Valve::Open),
                motor_speed_rpm: MotorSpeed::new(motor)?,
                ..state.snapshot()
            };
            report(propose(&handle, proposed, timeout).await?)
        }
        Command::ToggleValve => {
            let state = wait_for_sync(&handle, timeout).await?;
            report(propose(&handle, state.snapshot().toggled_valve(), timeout).await?)
        }
    };

    cancel.cancel();
    let _ = task.await;
    Ok(code)
}

async fn watch(handle: &SessionHandle, json: bool) -> color_eyre::Result<()> {
    let mut views = handle.subscribe();
    print_view(&views.borrow_and_update(), json)?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                return Ok(());
            }
            changed = views.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let view = views.borrow_and_update().clone();
                print_view(&view, json)?;
            }
        }
    }
}

fn print_view(view: &rigsync_core::SyncView, json: bool) -> color_eyre::Result<()> {
    if json {
        println!("{}", serde_json::to_string(view)?);
    } else {
        println!("{}", render(view, Timestamp::now()));
    }
    Ok(())
}

fn report(outcome: Outcome) -> ExitCode {
    match outcome {
        Outcome::Applied(state) => {
            println!(
                "applied: valve={} motor={}rpm temperature={:.1}C",
                if state.valve_open { "open" } else { "closed" },
                state.motor_speed_rpm.rpm(),
                state.temperature.celsius(),
            );
            ExitCode::SUCCESS
        }
        Outcome::Rejected(error) => {
            eprintln!("rejected: {}", error.message);
            ExitCode::FAILURE
        }
    }
}
