use axum::{
    Json, Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use rigsync_core::wire::{ClientMessage, ServerMessage};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use ulid::Ulid;

use crate::device::{DeviceHandle, SimError};

#[derive(Clone)]
pub struct AppState {
    pub device: DeviceHandle,
    pub cancel: CancellationToken,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/state", get(state_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

/// Serve until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    device: DeviceHandle,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let app = router(AppState {
        device,
        cancel: cancel.clone(),
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
        .await
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn state_handler(State(state): State<AppState>) -> Json<ServerMessage> {
    Json(state.device.current().await)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let connection_id = Ulid::new();
    ws.on_upgrade(move |socket| {
        handle_socket(socket, state).instrument(info_span!("connection", %connection_id))
    })
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let AppState { device, cancel } = state;
    // Subscribe before reading the current state so no change slips between.
    let mut updates = device.subscribe();
    let (mut sender, mut receiver) = socket.split();

    info!("client connected");

    if send_message(&mut sender, &device.current().await)
        .await
        .is_err()
    {
        warn!("client went away before the initial state was sent");
        return;
    }

    loop {
        // Pending broadcasts go out before the next client frame is handled,
        // so a client sees the state its earlier frames produced before any
        // reply to a later one.
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
            update = updates.recv() => {
                let message = match update {
                    Ok(message) => message,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "client lagged behind, resending current state");
                        device.current().await
                    }
                    Err(RecvError::Closed) => break,
                };
                if send_message(&mut sender, &message).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = handle_frame(&device, text.as_str()).await
                        && send_message(&mut sender, &reply).await.is_err()
                    {
                        break;
                    }
                }
                Some(Ok(Message::Binary(_))) => {
                    warn!("ignoring binary frame");
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "websocket receive failed");
                    break;
                }
            },
        }
    }

    info!("client disconnected");
}

/// Apply one client frame. Returns the reply meant for this client only;
/// accepted updates reach it through the broadcast instead.
pub async fn handle_frame(device: &DeviceHandle, frame: &str) -> Option<ServerMessage> {
    let result = match ClientMessage::decode(frame).and_then(ClientMessage::into_intent) {
        Ok(intent) => device.apply(intent).await,
        Err(e) => Err(SimError::from(e)),
    };

    match result {
        Ok(()) => None,
        Err(e) => {
            debug!(error = %e, "rejecting client frame");
            Some(ServerMessage::error(e.to_string()))
        }
    }
}

async fn send_message<S>(sender: &mut S, message: &ServerMessage) -> Result<(), axum::Error>
where
    S: futures::Sink<Message, Error = axum::Error> + Unpin,
{
    let frame = match message.encode() {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "failed to encode server message");
            return Ok(());
        }
    };

    sender.send(Message::Text(frame.into())).await.inspect_err(|e| {
        debug!(error = %e, "websocket send failed");
    })
}
