use std::time::Duration;

use rigsync_client::transport::mock::MockTransport;
use rigsync_client::{CancellationToken, Session, SessionHandle};
use rigsync_core::{ConnectionStatus, MotorSpeed, SyncPhase, SyncView};
use serde_json::json;

const INITIAL_STATE: &str = r#"{"type":"update","data":{"motor_speed":0,"valve_state":false,"temperature":21.5},"last_temp_update":1700000000}"#;

async fn wait(handle: &SessionHandle, predicate: impl FnMut(&SyncView) -> bool) -> SyncView {
    tokio::time::timeout(Duration::from_secs(5), handle.wait_for(predicate))
        .await
        .expect("timed out waiting for the view")
        .expect("session stopped")
}

#[tokio::test]
async fn first_update_synchronizes_the_mirror() {
    let (transport, remote, events) = MockTransport::pair(16);
    let (handle, task) = Session::spawn(transport, events, CancellationToken::new());

    assert_eq!(handle.view().phase, SyncPhase::NoStateYet);

    remote.set_status(ConnectionStatus::Open).await.unwrap();
    remote.deliver(INITIAL_STATE).await.unwrap();

    let view = wait(&handle, |view| view.phase == SyncPhase::Synced).await;
    let state = view.state.expect("state after sync");
    assert_eq!(state.motor_speed_rpm.rpm(), 0);
    assert!(!state.valve_open);
    assert_eq!(state.temperature.celsius(), 21.5);
    assert_eq!(state.last_telemetry_at.as_millisecond(), 1_700_000_000_000);
    assert_eq!(view.connection_status, ConnectionStatus::Open);

    handle.shutdown();
    task.await.unwrap();
}

#[tokio::test]
async fn proposal_is_sent_and_rejection_keeps_the_mirror() {
    let (transport, remote, events) = MockTransport::pair(16);
    let (handle, task) = Session::spawn(transport, events, CancellationToken::new());

    remote.set_status(ConnectionStatus::Open).await.unwrap();
    remote.deliver(INITIAL_STATE).await.unwrap();
    let synced = wait(&handle, |view| view.phase == SyncPhase::Synced).await;
    let mirror = synced.state.unwrap();

    let proposed = mirror
        .snapshot()
        .with_motor_speed(MotorSpeed::new(1200).unwrap());
    handle.request_update(proposed);

    // The proposal goes out on the session task; poll until it lands.
    let sent = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let sent = remote.sent();
            if !sent.is_empty() {
                return sent;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    let outbound: serde_json::Value = serde_json::from_str(&sent[0].encode().unwrap()).unwrap();
    assert_eq!(
        outbound,
        json!({
            "type": "update",
            "data": {
                "original_state": {"motor_speed": 0, "valve_state": false, "temperature": 21.5},
                "new_state": {"motor_speed": 1200, "valve_state": false, "temperature": 21.5}
            }
        })
    );
    assert_eq!(handle.view().state, Some(mirror.clone()));

    remote
        .deliver(r#"{"type":"error","data":{"message":"stale original_state"}}"#)
        .await
        .unwrap();

    let view = wait(&handle, |view| view.error.is_some()).await;
    assert_eq!(view.error.unwrap().message.as_ref(), "stale original_state");
    assert_eq!(view.state, Some(mirror));
    assert_eq!(view.phase, SyncPhase::Synced);

    handle.shutdown();
    task.await.unwrap();
}

#[tokio::test]
async fn closing_before_any_update_is_never_synced() {
    let (transport, remote, events) = MockTransport::pair(16);
    let (handle, task) = Session::spawn(transport, events, CancellationToken::new());

    remote.set_status(ConnectionStatus::Connecting).await.unwrap();
    remote.set_status(ConnectionStatus::Closed).await.unwrap();

    let view = wait(&handle, |view| view.phase == SyncPhase::NeverSynced).await;
    assert!(view.state.is_none());
    assert_eq!(view.connection_status, ConnectionStatus::Closed);

    // A late update does not revive the session.
    remote.deliver(INITIAL_STATE).await.unwrap();
    handle.shutdown();
    task.await.unwrap();
    assert!(handle.view().state.is_none());
    assert_eq!(handle.view().phase, SyncPhase::NeverSynced);
}

#[tokio::test]
async fn update_queued_ahead_of_close_is_applied() {
    let (transport, remote, events) = MockTransport::pair(16);

    // The whole exchange is queued before the session looks at it, so the
    // transport already reads `Closed` when `Open` is handled.
    remote.set_status(ConnectionStatus::Open).await.unwrap();
    remote.deliver(INITIAL_STATE).await.unwrap();
    remote.set_status(ConnectionStatus::Closed).await.unwrap();
    drop(remote);

    let (handle, task) = Session::spawn(transport, events, CancellationToken::new());
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();

    let view = handle.view();
    assert_eq!(view.phase, SyncPhase::Synced);
    assert_eq!(view.state.unwrap().temperature.celsius(), 21.5);
    assert_eq!(view.connection_status, ConnectionStatus::Closed);
}

#[tokio::test]
async fn local_shutdown_before_any_update_is_never_synced() {
    let (transport, remote, events) = MockTransport::pair(16);
    let (handle, task) = Session::spawn(transport, events, CancellationToken::new());

    remote.set_status(ConnectionStatus::Open).await.unwrap();
    wait(&handle, |view| view.connection_status == ConnectionStatus::Open).await;

    handle.shutdown();
    task.await.unwrap();

    let view = handle.view();
    assert_eq!(view.phase, SyncPhase::NeverSynced);
    assert_eq!(view.connection_status, ConnectionStatus::Closed);
    assert!(view.state.is_none());
}

#[tokio::test]
async fn malformed_frames_do_not_disturb_the_session() {
    let (transport, remote, events) = MockTransport::pair(16);
    let (handle, task) = Session::spawn(transport, events, CancellationToken::new());

    remote.set_status(ConnectionStatus::Open).await.unwrap();
    remote.deliver("{not json").await.unwrap();
    remote.deliver(r#"{"type":"reboot"}"#).await.unwrap();
    remote.deliver(INITIAL_STATE).await.unwrap();

    let view = wait(&handle, |view| view.phase == SyncPhase::Synced).await;
    assert!(view.error.is_none());
    assert_eq!(view.state.unwrap().temperature.celsius(), 21.5);

    handle.shutdown();
    task.await.unwrap();
}

#[tokio::test]
async fn ending_event_stream_stops_the_session() {
    let (transport, remote, events) = MockTransport::pair(16);
    let (handle, task) = Session::spawn(transport, events, CancellationToken::new());

    remote.set_status(ConnectionStatus::Open).await.unwrap();
    drop(remote);

    let transport = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(transport.sent().len(), 0);
    assert_eq!(handle.view().connection_status, ConnectionStatus::Closed);
    assert_eq!(handle.view().phase, SyncPhase::NeverSynced);
}
