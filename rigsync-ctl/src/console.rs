use std::fmt::Write as _;
use std::time::Duration;

use jiff::Timestamp;
use rigsync_client::SessionHandle;
use rigsync_core::{DeviceSnapshot, DeviceState, SyncError, SyncPhase, SyncView};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    #[error("connection ended before the device state was received")]
    NeverSynced,
    #[error("sync session stopped")]
    SessionStopped,
    #[error("no reply from the device server within {0:?}")]
    Timeout(Duration),
}

/// How the server answered a proposal.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Applied(DeviceState),
    Rejected(SyncError),
}

/// Wait until the first `update` lands.
pub async fn wait_for_sync(
    handle: &SessionHandle,
    timeout: Duration,
) -> Result<DeviceState, ConsoleError> {
    let view = tokio::time::timeout(
        timeout,
        handle.wait_for(|view| view.phase != SyncPhase::NoStateYet),
    )
    .await
    .map_err(|_| ConsoleError::Timeout(timeout))?
    .ok_or(ConsoleError::SessionStopped)?;

    match (view.phase, view.state) {
        (SyncPhase::Synced, Some(state)) => Ok(state),
        _ => Err(ConsoleError::NeverSynced),
    }
}

/// Send `proposed` and wait for the server's verdict on it.
///
/// An update counts as the answer once its valve and motor match the
/// proposal; telemetry-only updates in between are skipped. Any new error
/// counts as a rejection.
pub async fn propose(
    handle: &SessionHandle,
    proposed: DeviceSnapshot,
    timeout: Duration,
) -> Result<Outcome, ConsoleError> {
    let before = handle.view();
    let synced_before = before.state.as_ref().map(|state| state.last_synced_at);
    let error_before = before.error.clone();

    debug!(?proposed, "sending proposal");
    handle.request_update(proposed);

    let view = tokio::time::timeout(
        timeout,
        handle.wait_for(|view| {
            let rejected = view.error.is_some() && view.error != error_before;
            let applied = view.state.as_ref().is_some_and(|state| {
                Some(state.last_synced_at) != synced_before
                    && state.valve_open == proposed.valve_open
                    && state.motor_speed_rpm == proposed.motor_speed_rpm
            });
            rejected || applied || view.connection_status.is_terminal()
        }),
    )
    .await
    .map_err(|_| ConsoleError::Timeout(timeout))?
    .ok_or(ConsoleError::SessionStopped)?;

    if let Some(error) = view.error.filter(|error| Some(error) != error_before.as_ref()) {
        info!(message = %error.message, "proposal rejected");
        return Ok(Outcome::Rejected(error));
    }

    match view.state {
        Some(state) if !view.connection_status.is_terminal() => {
            info!(
                valve_open = state.valve_open,
                motor_speed = state.motor_speed_rpm.rpm(),
                "proposal applied"
            );
            Ok(Outcome::Applied(state))
        }
        _ => Err(ConsoleError::SessionStopped),
    }
}

/// One human-readable line per view. `age` is how long ago, relative to
/// `now`, the mirror was last confirmed by the server.
pub fn render(view: &SyncView, now: Timestamp) -> String {
    let mut line = format!("[{}] ", view.connection_status);

    match (&view.state, view.phase) {
        (Some(state), _) => {
            let _ = write!(
                line,
                "temperature={:.1}C valve={} motor={}rpm telemetry_at={} age={:.1}s",
                state.temperature.celsius(),
                if state.valve_open { "open" } else { "closed" },
                state.motor_speed_rpm.rpm(),
                state.last_telemetry_at,
                state.staleness(now).as_secs_f64(),
            );
        }
        (None, SyncPhase::NeverSynced) => line.push_str("connection ended before any device state"),
        (None, _) => line.push_str("waiting for device state"),
    }

    if let Some(error) = &view.error {
        let _ = write!(line, " error=\"{}\"", error.message);
    }

    line
}

#[cfg(test)]
mod tests {
    use rigsync_core::{ConnectionStatus, MotorSpeed, Temperature};

    use super::*;

    fn state() -> DeviceState {
        DeviceState::from_report(
            DeviceSnapshot {
                temperature: Temperature::new(21.5).unwrap(),
                valve_open: true,
                motor_speed_rpm: MotorSpeed::new(1200).unwrap(),
            },
            Timestamp::from_second(1_700_000_000).unwrap(),
            Timestamp::from_second(1_700_000_001).unwrap(),
        )
    }

    fn now() -> Timestamp {
        Timestamp::from_second(1_700_000_004).unwrap()
    }

    #[test]
    fn renders_waiting_view() {
        let view = SyncView {
            connection_status: ConnectionStatus::Connecting,
            ..SyncView::default()
        };
        assert_eq!(render(&view, now()), "[connecting] waiting for device state");
    }

    #[test]
    fn renders_state_and_error() {
        let view = SyncView {
            state: Some(state()),
            error: Some(SyncError {
                message: "stale original_state".into(),
                occurred_at: Timestamp::from_second(1_700_000_002).unwrap(),
            }),
            connection_status: ConnectionStatus::Open,
            phase: SyncPhase::Synced,
        };

        let line = render(&view, now());
        assert!(line.starts_with("[open] temperature=21.5C valve=open motor=1200rpm"));
        assert!(line.contains(" age=3.0s "));
        assert!(line.ends_with("error=\"stale original_state\""));
    }

    #[test]
    fn renders_never_synced() {
        let view = SyncView {
            connection_status: ConnectionStatus::Errored,
            phase: SyncPhase::NeverSynced,
            ..SyncView::default()
        };
        assert_eq!(
            render(&view, now()),
            "[errored] connection ended before any device state"
        );
    }
}
