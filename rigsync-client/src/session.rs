use rigsync_core::{ConnectionStatus, DeviceSnapshot, SyncView};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::SyncEngine;
use crate::transport::{ChannelEvent, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    RequestUpdate(DeviceSnapshot),
}

/// Drives a [`SyncEngine`] from one task.
///
/// Channel events and operator commands are pulled through a single
/// `select!`, so the engine never sees two of them at once. After each one a
/// fresh [`SyncView`] is published.
pub struct Session<T: Transport> {
    engine: SyncEngine<T>,
    events: mpsc::Receiver<ChannelEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    view: watch::Sender<SyncView>,
    cancel: CancellationToken,
}

/// Cheap, cloneable access to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<SyncView>,
    cancel: CancellationToken,
}

impl<T: Transport> Session<T> {
    pub fn new(
        transport: T,
        events: mpsc::Receiver<ChannelEvent>,
        cancel: CancellationToken,
    ) -> (Self, SessionHandle) {
        let engine = SyncEngine::new(transport);
        let (view_tx, view_rx) = watch::channel(engine.view());
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let session = Self {
            engine,
            events,
            commands: command_rx,
            view: view_tx,
            cancel: cancel.clone(),
        };
        let handle = SessionHandle {
            commands: command_tx,
            view: view_rx,
            cancel,
        };

        (session, handle)
    }

    /// Build a session and run it on the current runtime.
    pub fn spawn(
        transport: T,
        events: mpsc::Receiver<ChannelEvent>,
        cancel: CancellationToken,
    ) -> (SessionHandle, JoinHandle<T>) {
        let (session, handle) = Self::new(transport, events, cancel);
        (handle, tokio::spawn(session.run()))
    }

    /// Run until cancelled or until the channel's event stream ends. Returns
    /// the closed transport.
    ///
    /// Stopping counts as the channel closing: a session that never received
    /// state finishes `NeverSynced`.
    pub async fn run(mut self) -> T {
        info!("sync session started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("sync session shutting down");
                    break;
                }
                event = self.events.recv() => match event {
                    Some(ChannelEvent::Status(status)) => {
                        debug!(%status, "channel status event");
                        self.engine.observe_status(status);
                    }
                    Some(ChannelEvent::Frame(frame)) => {
                        self.engine.handle_frame(&frame);
                    }
                    None => {
                        info!("channel event stream ended");
                        break;
                    }
                },
                Some(command) = self.commands.recv() => match command {
                    Command::RequestUpdate(proposed) => self.engine.request_update(proposed),
                },
            }

            self.publish();
        }

        self.engine.close();
        let mut last = self.engine.view();
        // The transport may wind down asynchronously; the session is closed
        // either way.
        if !last.connection_status.is_terminal() {
            last.connection_status = ConnectionStatus::Closed;
        }
        self.view.send_replace(last);

        info!("sync session stopped");
        self.engine.into_transport()
    }

    fn publish(&self) {
        let next = self.engine.view();
        self.view.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

impl SessionHandle {
    /// Queue a proposal. Never blocks; dropped silently if the session has
    /// stopped.
    pub fn request_update(&self, proposed: DeviceSnapshot) {
        if self.commands.send(Command::RequestUpdate(proposed)).is_err() {
            debug!("sync session is gone, dropping update request");
        }
    }

    /// The most recently published view.
    pub fn view(&self) -> SyncView {
        self.view.borrow().clone()
    }

    /// A receiver that is notified on every view change.
    pub fn subscribe(&self) -> watch::Receiver<SyncView> {
        self.view.clone()
    }

    /// Wait until the published view satisfies `predicate`. Returns `None` if
    /// the session stops first.
    pub async fn wait_for(&self, predicate: impl FnMut(&SyncView) -> bool) -> Option<SyncView> {
        let mut view = self.view.clone();
        view.wait_for(predicate).await.ok().map(|view| view.clone())
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}
