//! Coordination scenarios across the wired application state.

use std::sync::Arc;
use std::time::Duration;

use robohub_audio::UploadRequest;
use robohub_core::{AckStatus, CommandStatus, ConnectionEventKind, PayloadMap, ServerFrame};
use robohub_fleet::{HeartbeatReaper, OfflineReason, SendOutcome};
use robohub_config::Settings;
use robohub_persistence::AuditStore;
use robohub_server::{AppState, LogBuffer};

fn app_state() -> AppState {
    let store = AuditStore::open_in_memory().unwrap();
    AppState::new(Settings::default(), store, LogBuffer::new(100))
}

#[tokio::test]
async fn happy_path_command_lifecycle() {
    let state = app_state();
    let mut wheel = state.sessions.accept("wheelcontroller").unwrap();
    wheel.session.set_device_type("wheel");

    let mut payload = PayloadMap::new();
    payload.insert("speed".into(), serde_json::Value::from(200));

    let record = state
        .router
        .dispatch("wheel", "forward", payload, None)
        .await
        .unwrap();
    assert_eq!(record.status, CommandStatus::Sent);
    assert_eq!(record.target_device_count, 1);

    // The session receives the command frame verbatim.
    let frame = wheel.outbound_rx.recv().await.unwrap();
    let command_id = match frame {
        ServerFrame::Command {
            command_id,
            command_name,
            payload,
        } => {
            assert_eq!(command_name, "forward");
            assert_eq!(payload.get("speed").unwrap(), 200);
            command_id
        }
        other => panic!("unexpected frame: {other:?}"),
    };
    assert_eq!(command_id, record.command_id);

    // Device acks, the record completes.
    state
        .router
        .handle_ack("wheelcontroller", &command_id, AckStatus::Success, None)
        .await;
    let stored = state.store.get_command(command_id).await.unwrap().unwrap();
    assert_eq!(stored.status, CommandStatus::AckSuccess);
    assert_eq!(stored.success_count, 1);
    assert!(stored.target_device_count >= stored.success_count);
}

#[tokio::test]
async fn no_targets_terminates_without_sending() {
    let state = app_state();

    let record = state
        .router
        .dispatch("servo", "handsup", PayloadMap::new(), None)
        .await
        .unwrap();
    assert_eq!(record.status, CommandStatus::NoTargets);
    assert_eq!(record.target_device_count, 0);
    assert!(record.executed_at.is_none());

    let stored = state
        .store
        .get_command(record.command_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, CommandStatus::NoTargets);
}

#[tokio::test]
async fn heartbeat_timeout_reaps_device_but_keeps_pending_acks() {
    let state = app_state();
    let reaper = Arc::new(HeartbeatReaper::new(
        Arc::clone(&state.registry),
        Arc::clone(&state.sessions),
        Arc::clone(&state.router),
        Duration::from_secs(10),
        Duration::ZERO,
    ));

    state
        .registry
        .register("wheelcontroller", "wheel", PayloadMap::new())
        .await;
    let accepted = state.sessions.accept("wheelcontroller").unwrap();
    accepted.session.set_device_type("wheel");

    // An in-flight command whose deadline is still far away.
    let record = state
        .router
        .dispatch("wheel", "forward", PayloadMap::new(), None)
        .await
        .unwrap();
    assert_eq!(record.status, CommandStatus::Sent);
    assert_eq!(state.router.pending_count(), 1);

    reaper.run_once().await;

    // Device is offline and the session is gone.
    assert!(!state.registry.get("wheelcontroller").unwrap().is_online);
    assert!(state.sessions.get("wheelcontroller").is_none());
    assert!(*accepted.closed_rx.borrow());

    // The timeout event is on record.
    let events = state
        .store
        .connection_history("wheelcontroller".into(), 10)
        .await
        .unwrap();
    assert_eq!(events[0].kind, ConnectionEventKind::Timeout);

    // The pending ack survives until its own deadline.
    assert_eq!(state.router.pending_count(), 1);
    let stored = state
        .store
        .get_command(record.command_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, CommandStatus::Sent);
}

#[tokio::test]
async fn reregistration_keeps_one_session_and_device_online() {
    let state = app_state();

    state
        .registry
        .register("d", "wheel", PayloadMap::new())
        .await;
    let first = state.sessions.accept("d").unwrap();
    first.session.set_device_type("wheel");

    // A new channel arrives for the same id.
    let second = state.sessions.accept("d").unwrap();
    assert!(second.replaced);
    assert!(*first.closed_rx.borrow());
    assert_eq!(state.sessions.count(), 1);

    // The displaced session's end hook must not offline the device.
    assert!(!state.sessions.finish_if_current(&first.session));
    assert!(state.registry.get("d").unwrap().is_online);

    // The repeat registration on the new session records reregistered.
    state
        .registry
        .register("d", "wheel", PayloadMap::new())
        .await;
    let events = state.store.connection_history("d".into(), 10).await.unwrap();
    assert_eq!(events[0].kind, ConnectionEventKind::Reregistered);
    let reregistered = events
        .iter()
        .filter(|e| e.kind == ConnectionEventKind::Reregistered)
        .count();
    assert_eq!(reregistered, 1);
}

#[tokio::test]
async fn connection_events_alternate_per_device() {
    let state = app_state();

    state.registry.register("d", "wheel", PayloadMap::new()).await;
    state
        .registry
        .mark_offline("d", OfflineReason::Disconnected)
        .await;
    state.registry.register("d", "wheel", PayloadMap::new()).await;
    state.registry.mark_offline("d", OfflineReason::Timeout).await;

    let events = state.store.connection_history("d".into(), 10).await.unwrap();
    let kinds: Vec<ConnectionEventKind> = events.iter().rev().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ConnectionEventKind::Connected,
            ConnectionEventKind::Disconnected,
            ConnectionEventKind::Connected,
            ConnectionEventKind::Timeout,
        ]
    );
}

#[tokio::test]
async fn queue_overflow_leaves_session_alive() {
    let store = AuditStore::open_in_memory().unwrap();
    let mut settings = Settings::default();
    settings.fleet.outbound_queue_capacity = 2;
    let state = AppState::new(settings, store, LogBuffer::new(100));

    let accepted = state.sessions.accept("wheelcontroller").unwrap();
    accepted.session.set_device_type("wheel");

    let frame = |n: &str| ServerFrame::Command {
        command_id: n.into(),
        command_name: n.into(),
        payload: PayloadMap::new(),
    };
    assert_eq!(state.sessions.send("wheelcontroller", frame("a")), SendOutcome::Sent);
    assert_eq!(state.sessions.send("wheelcontroller", frame("b")), SendOutcome::Sent);
    assert_eq!(
        state.sessions.send("wheelcontroller", frame("c")),
        SendOutcome::QueueFull
    );

    assert!(state.sessions.get("wheelcontroller").is_some());
    assert!(!*accepted.closed_rx.borrow());
}

#[tokio::test]
async fn upload_without_engines_fails_soft() {
    // Default settings configure no STT sidecar; the upload degrades
    // to a structured reason and still persists its transcript row.
    let state = app_state();

    let summary = state
        .pipeline
        .process_upload(UploadRequest {
            device_id: "camcontroller".into(),
            manual: false,
            level: None,
            threshold: None,
            pcm: vec![0u8; 640],
        })
        .await;

    assert!(!summary.matched);
    assert_eq!(summary.reason, Some("stt_failed"));

    let transcripts = state.store.transcripts(10).await.unwrap();
    assert_eq!(transcripts.len(), 1);
}

#[tokio::test]
async fn dispatching_twice_yields_distinct_records() {
    let state = app_state();
    let accepted = state.sessions.accept("wheelcontroller").unwrap();
    accepted.session.set_device_type("wheel");

    let first = state
        .router
        .dispatch("wheel", "forward", PayloadMap::new(), None)
        .await
        .unwrap();
    let second = state
        .router
        .dispatch("wheel", "forward", PayloadMap::new(), None)
        .await
        .unwrap();

    assert_ne!(first.command_id, second.command_id);
    let logs = state.store.command_logs(None, None, 10).await.unwrap();
    assert_eq!(logs.len(), 2);
}
