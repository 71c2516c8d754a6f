use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rigsync_core::ConnectionStatus;
use rigsync_core::wire::ClientMessage;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ChannelEvent, Transport, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const DEFAULT_EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub struct WsConfig {
    /// `ws://` or `wss://` endpoint of the device server.
    pub url: String,
    /// Re-dial after the connection drops or fails to come up.
    pub reconnect: bool,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Give up after this many consecutive failed dials. `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Capacity of the inbound event queue.
    pub event_buffer: usize,
}

impl WsConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: true,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            max_attempts: None,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    pub fn without_reconnect(mut self) -> Self {
        self.reconnect = false;
        self
    }
}

/// WebSocket channel to a device server.
///
/// A background task owns the socket. While it is re-dialing the status is
/// `Connecting`; `Closed` and `Errored` are only reported once it has given up,
/// so they are final.
pub struct WsTransport {
    outgoing: mpsc::UnboundedSender<String>,
    status: watch::Receiver<ConnectionStatus>,
    cancel: CancellationToken,
}

impl WsTransport {
    /// Spawn the connection task. Must be called inside a tokio runtime.
    ///
    /// Cancelling `cancel` (or calling [`Transport::close`]) stops the task.
    pub fn connect(
        config: WsConfig,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<ChannelEvent>) {
        let cancel = cancel.child_token();
        let (events_tx, events_rx) = mpsc::channel(config.event_buffer.max(1));
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Uninstantiated);

        let task = ConnectionTask {
            config,
            status: status_tx,
            events: events_tx,
            outgoing: outgoing_rx,
            cancel: cancel.clone(),
        };
        tokio::spawn(task.run());

        (
            Self {
                outgoing: outgoing_tx,
                status: status_rx,
                cancel,
            },
            events_rx,
        )
    }
}

impl Transport for WsTransport {
    fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    fn send(&self, message: &ClientMessage) -> Result<(), TransportError> {
        let status = self.status();
        if !status.is_open() {
            return Err(TransportError::NotOpen(status));
        }

        let frame = message.encode()?;
        self.outgoing
            .send(frame)
            .map_err(|_| TransportError::ChannelClosed)
    }

    fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum Disconnect {
    /// We were asked to stop.
    Shutdown,
    /// The server closed the socket.
    Remote,
    /// The socket failed.
    Failed(TransportError),
}

struct ConnectionTask {
    config: WsConfig,
    status: watch::Sender<ConnectionStatus>,
    events: mpsc::Sender<ChannelEvent>,
    outgoing: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
}

impl ConnectionTask {
    async fn run(mut self) {
        let mut backoff = self.config.initial_backoff;
        let mut failed_attempts = 0u32;

        loop {
            if !self.set_status(ConnectionStatus::Connecting).await {
                return;
            }

            let dialed = tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.set_status(ConnectionStatus::Closed).await;
                    return;
                }
                dialed = connect_async(self.config.url.as_str()) => dialed,
            };

            let outcome = match dialed {
                Ok((stream, _response)) => {
                    info!(url = %self.config.url, "websocket connected");
                    failed_attempts = 0;
                    backoff = self.config.initial_backoff;

                    // Anything queued before this connection was meant for a
                    // previous one.
                    while self.outgoing.try_recv().is_ok() {}

                    if !self.set_status(ConnectionStatus::Open).await {
                        return;
                    }
                    self.pump(stream).await
                }
                Err(e) => {
                    failed_attempts += 1;
                    Disconnect::Failed(e.into())
                }
            };

            let final_status = match outcome {
                Disconnect::Shutdown => {
                    self.set_status(ConnectionStatus::Closed).await;
                    return;
                }
                Disconnect::Remote => {
                    info!(url = %self.config.url, "websocket closed by server");
                    ConnectionStatus::Closed
                }
                Disconnect::Failed(e) => {
                    warn!(url = %self.config.url, error = %e, failed_attempts, "websocket failed");
                    ConnectionStatus::Errored
                }
            };

            let exhausted = self
                .config
                .max_attempts
                .is_some_and(|max| failed_attempts >= max);
            if !self.config.reconnect || exhausted {
                self.set_status(final_status).await;
                return;
            }

            debug!(backoff_ms = backoff.as_millis() as u64, "waiting before reconnect");
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.set_status(ConnectionStatus::Closed).await;
                    return;
                }
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(self.config.max_backoff);
        }
    }

    async fn pump(&mut self, stream: WsStream) -> Disconnect {
        let (mut sink, mut source) = stream.split();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Disconnect::Shutdown;
                }
                outgoing = self.outgoing.recv() => {
                    let Some(frame) = outgoing else {
                        let _ = sink.send(Message::Close(None)).await;
                        return Disconnect::Shutdown;
                    };
                    debug!(frame = %frame, "sending frame");
                    if let Err(e) = sink.send(Message::text(frame)).await {
                        return Disconnect::Failed(e.into());
                    }
                }
                incoming = source.next() => {
                    let frame = match incoming {
                        Some(Ok(Message::Text(text))) => text.to_string(),
                        Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!(error = %e, "dropping non-UTF-8 binary frame");
                                continue;
                            }
                        },
                        Some(Ok(Message::Close(_))) | None => return Disconnect::Remote,
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Disconnect::Failed(e.into()),
                    };

                    if self.events.send(ChannelEvent::Frame(frame)).await.is_err() {
                        debug!("event receiver dropped");
                        let _ = sink.send(Message::Close(None)).await;
                        return Disconnect::Shutdown;
                    }
                }
            }
        }
    }

    /// Publish a status change. Returns `false` once nobody is listening.
    async fn set_status(&self, status: ConnectionStatus) -> bool {
        let previous = self.status.send_replace(status);
        if previous == status {
            return true;
        }

        debug!(%previous, %status, "connection status changed");
        self.events.send(ChannelEvent::Status(status)).await.is_ok()
    }
}
