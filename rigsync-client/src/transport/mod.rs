pub mod mock;
pub mod ws;

pub use mock::{MockRemote, MockTransport};
pub use ws::{WsConfig, WsTransport};

use rigsync_core::ConnectionStatus;
use rigsync_core::wire::{ClientMessage, ProtocolError};
use thiserror::Error;

/// Something the channel reports to whoever consumes it. Events are
/// delivered one at a time, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The channel moved to a new status. `Transport::status` already
    /// reflects it when the event is received.
    Status(ConnectionStatus),
    /// One inbound text frame, not yet parsed.
    Frame(String),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("channel is not open (status: {0})")]
    NotOpen(ConnectionStatus),
    #[error("failed to encode frame: {0}")]
    Encode(#[from] ProtocolError),
    #[error("channel task has stopped")]
    ChannelClosed,
    #[error("websocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        TransportError::WebSocket(Box::new(err))
    }
}

/// Outbound half of a duplex, message-framed connection to one server.
///
/// Inbound traffic is not part of this trait: each implementation hands out
/// an `mpsc::Receiver<ChannelEvent>` when it is created.
pub trait Transport: Send + 'static {
    /// Current connection status.
    fn status(&self) -> ConnectionStatus;

    /// Queue one message for sending.
    ///
    /// Nothing is buffered while the channel is not open: the call fails
    /// with [`TransportError::NotOpen`] and the message is gone.
    fn send(&self, message: &ClientMessage) -> Result<(), TransportError>;

    /// Shut the channel down. Further sends fail.
    fn close(&self);
}
