//! Print the device mirror as it changes.
//!
//! Run a device server first (`cargo run -p rigsync-sim`), then
//! `cargo run -p rigsync-client --example client -- ws://127.0.0.1:8000/ws`.

use rigsync_client::transport::{WsConfig, WsTransport};
use rigsync_client::{CancellationToken, Session};
use tracing::info;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter("tracing=info,client=info,rigsync_client=info")
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://127.0.0.1:8000/ws".to_string());

    info!(%url, "connecting to device server");

    let cancel = CancellationToken::new();
    let (transport, events) = WsTransport::connect(WsConfig::new(url), cancel.clone());
    let (handle, task) = Session::spawn(transport, events, cancel.clone());

    let mut views = handle.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                break;
            }
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                match &view.state {
                    Some(state) => info!(
                        status = %view.connection_status,
                        phase = ?view.phase,
                        temperature = state.temperature.celsius(),
                        valve_open = state.valve_open,
                        motor_speed = state.motor_speed_rpm.rpm(),
                        "device state"
                    ),
                    None => info!(status = %view.connection_status, phase = ?view.phase, "no device state"),
                }
                if let Some(error) = &view.error {
                    info!(message = %error.message, "last error");
                }
            }
        }
    }

    let _ = task.await;
}
