use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rigsync_core::ConnectionStatus;
use rigsync_core::wire::{ClientMessage, ServerMessage};
use tokio::sync::mpsc;
use tracing::debug;

use super::{ChannelEvent, Transport, TransportError};

#[derive(Debug, Default)]
struct Shared {
    status: ConnectionStatus,
    sent: Vec<ClientMessage>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory transport. Records everything sent through it.
#[derive(Debug, Clone)]
pub struct MockTransport {
    shared: Arc<Mutex<Shared>>,
}

/// The far end of a [`MockTransport`]: plays the server in tests.
#[derive(Debug, Clone)]
pub struct MockRemote {
    shared: Arc<Mutex<Shared>>,
    events: mpsc::Sender<ChannelEvent>,
}

impl MockTransport {
    /// A detached transport with the given status and no event stream.
    pub fn with_status(status: ConnectionStatus) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                status,
                sent: Vec::new(),
            })),
        }
    }

    /// A transport, the remote that drives it, and the event stream the
    /// remote feeds.
    pub fn pair(buffer: usize) -> (Self, MockRemote, mpsc::Receiver<ChannelEvent>) {
        let transport = Self::with_status(ConnectionStatus::Uninstantiated);
        let (tx, rx) = mpsc::channel(buffer);
        let remote = MockRemote {
            shared: Arc::clone(&transport.shared),
            events: tx,
        };

        (transport, remote, rx)
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        lock(&self.shared).status = status;
    }

    /// Everything sent so far, oldest first.
    pub fn sent(&self) -> Vec<ClientMessage> {
        lock(&self.shared).sent.clone()
    }
}

impl Transport for MockTransport {
    fn status(&self) -> ConnectionStatus {
        lock(&self.shared).status
    }

    fn send(&self, message: &ClientMessage) -> Result<(), TransportError> {
        let mut shared = lock(&self.shared);
        if !shared.status.is_open() {
            return Err(TransportError::NotOpen(shared.status));
        }

        shared.sent.push(message.clone());
        Ok(())
    }

    fn close(&self) {
        lock(&self.shared).status = ConnectionStatus::Closed;
    }
}

impl MockRemote {
    /// Change the status and announce it, as a real channel would.
    pub async fn set_status(&self, status: ConnectionStatus) -> Result<(), TransportError> {
        lock(&self.shared).status = status;
        self.emit(ChannelEvent::Status(status)).await
    }

    /// Deliver a raw frame, well-formed or not.
    pub async fn deliver(&self, frame: impl Into<String>) -> Result<(), TransportError> {
        self.emit(ChannelEvent::Frame(frame.into())).await
    }

    pub async fn deliver_message(&self, message: &ServerMessage) -> Result<(), TransportError> {
        self.deliver(message.encode()?).await
    }

    /// Everything the client side has sent, oldest first.
    pub fn sent(&self) -> Vec<ClientMessage> {
        lock(&self.shared).sent.clone()
    }

    async fn emit(&self, event: ChannelEvent) -> Result<(), TransportError> {
        debug!(?event, "mock remote emitting");
        self.events
            .send(event)
            .await
            .map_err(|_| TransportError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use rigsync_core::wire::StateFields;
    use rigsync_core::wire::UpdateBody;

    use super::*;

    fn message() -> ClientMessage {
        let fields = StateFields {
            motor_speed: 0,
            valve_state: false,
            temperature: 20.0,
        };
        ClientMessage::Update {
            data: UpdateBody {
                original_state: fields,
                new_state: fields,
            },
        }
    }

    #[test]
    fn refuses_to_send_unless_open() {
        let transport = MockTransport::with_status(ConnectionStatus::Connecting);
        assert!(matches!(
            transport.send(&message()),
            Err(TransportError::NotOpen(ConnectionStatus::Connecting))
        ));
        assert!(transport.sent().is_empty());

        transport.set_status(ConnectionStatus::Open);
        transport.send(&message()).unwrap();
        assert_eq!(transport.sent(), vec![message()]);
    }

    #[test]
    fn close_is_terminal() {
        let transport = MockTransport::with_status(ConnectionStatus::Open);
        transport.close();
        assert_eq!(transport.status(), ConnectionStatus::Closed);
        assert!(transport.send(&message()).is_err());
    }

    #[tokio::test]
    async fn remote_status_is_visible_before_event() {
        let (transport, remote, mut events) = MockTransport::pair(4);
        remote.set_status(ConnectionStatus::Open).await.unwrap();

        assert_eq!(transport.status(), ConnectionStatus::Open);
        assert_eq!(
            events.recv().await,
            Some(ChannelEvent::Status(ConnectionStatus::Open))
        );

        remote.deliver("hello").await.unwrap();
        assert_eq!(
            events.recv().await,
            Some(ChannelEvent::Frame("hello".to_string()))
        );
    }
}
