//! Client-side reconciliation of the device mirror.
//!
//! The engine never changes the mirror because of something the operator
//! asked for. The only source of state is a server `update`; proposals go
//! out carrying the mirror as `original_state` and the server decides.

use jiff::Timestamp;
use rigsync_core::wire::{ClientMessage, InboundMessage, StateReport};
use rigsync_core::{
    ConnectionStatus, DeviceSnapshot, DeviceState, SyncError, SyncPhase, SyncView, UpdateIntent,
};
use tracing::{debug, info, warn};

use crate::transport::Transport;

/// Owns the mirror of one device and the transport it is synced over.
///
/// All methods take `&mut self` and return immediately; the caller is
/// expected to invoke them from a single task.
pub struct SyncEngine<T: Transport> {
    transport: T,
    current_state: Option<DeviceState>,
    last_error: Option<SyncError>,
    phase: SyncPhase,
    // Proposals sent since the last server report. The protocol has no
    // correlation ids, so this only feeds diagnostics.
    pending_updates: u32,
}

impl<T: Transport> SyncEngine<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            current_state: None,
            last_error: None,
            phase: SyncPhase::NoStateYet,
            pending_updates: 0,
        }
    }

    pub fn state(&self) -> Option<&DeviceState> {
        self.current_state.as_ref()
    }

    pub fn last_error(&self) -> Option<&SyncError> {
        self.last_error.as_ref()
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    /// Read straight from the transport.
    pub fn connection_status(&self) -> ConnectionStatus {
        self.transport.status()
    }

    pub fn pending_updates(&self) -> u32 {
        self.pending_updates
    }

    pub fn view(&self) -> SyncView {
        SyncView {
            state: self.current_state.clone(),
            error: self.last_error.clone(),
            connection_status: self.connection_status(),
            phase: self.phase,
        }
    }

    /// Propose a new device state.
    ///
    /// Ignored until the first server report has arrived. The mirror is left
    /// alone; a send failure is logged and otherwise only shows up as a
    /// connection status change.
    pub fn request_update(&mut self, proposed: DeviceSnapshot) {
        let Some(current) = &self.current_state else {
            debug!("no device state yet, ignoring update request");
            return;
        };

        let intent = UpdateIntent {
            original: current.snapshot(),
            proposed,
        };

        match self.transport.send(&ClientMessage::from(intent)) {
            Ok(()) => {
                self.pending_updates = self.pending_updates.saturating_add(1);
                info!(
                    valve_open = proposed.valve_open,
                    motor_speed = proposed.motor_speed_rpm.rpm(),
                    pending = self.pending_updates,
                    "update requested"
                );
            }
            Err(e) => {
                warn!(error = %e, "update request was not sent");
            }
        }
    }

    /// Parse and apply one inbound frame. Malformed frames are logged and
    /// dropped without touching any state.
    pub fn handle_frame(&mut self, frame: &str) {
        match InboundMessage::parse(frame) {
            Ok(message) => self.handle_message(message),
            Err(e) => {
                warn!(error = %e, frame, "dropping malformed message");
            }
        }
    }

    pub fn handle_message(&mut self, message: InboundMessage) {
        if self.phase == SyncPhase::NeverSynced {
            warn!("channel already gave up before syncing, ignoring message");
            return;
        }

        match message {
            InboundMessage::Update(report) => self.apply_report(report),
            InboundMessage::Error { message } => self.record_rejection(message),
        }
    }

    /// Apply a status change reported by the channel.
    ///
    /// `status` is the one carried by the event, not the transport's live
    /// status: events are ordered with frames, so a frame queued before a
    /// close is still applied before the close is seen.
    pub fn observe_status(&mut self, status: ConnectionStatus) {
        if self.phase == SyncPhase::NoStateYet && status.is_terminal() {
            warn!(%status, "channel went away before any state arrived");
            self.phase = SyncPhase::NeverSynced;
        }
    }

    /// Close the transport. A local close counts as the channel closing, so
    /// an engine that never synced ends up `NeverSynced`.
    pub fn close(&mut self) {
        self.transport.close();
        self.observe_status(ConnectionStatus::Closed);
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    fn apply_report(&mut self, report: StateReport) {
        let state = DeviceState::from_report(report.snapshot, report.telemetry_at, Timestamp::now());

        debug!(
            temperature = state.temperature.celsius(),
            valve_open = state.valve_open,
            motor_speed = state.motor_speed_rpm.rpm(),
            "applied server state"
        );

        self.current_state = Some(state);
        self.last_error = None;
        self.phase = SyncPhase::Synced;
        self.pending_updates = 0;
    }

    fn record_rejection(&mut self, message: Box<str>) {
        if self.pending_updates > 1 {
            warn!(
                pending = self.pending_updates,
                "rejection cannot be tied to a single outstanding proposal"
            );
        }
        self.pending_updates = self.pending_updates.saturating_sub(1);

        warn!(message = %message, "server reported an error");
        self.last_error = Some(SyncError {
            message,
            occurred_at: Timestamp::now(),
        });
    }
}
