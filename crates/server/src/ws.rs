//! Device WebSocket endpoint
//!
//! One persistent JSON-frame channel per device. The inbound
//! dispatcher routes frames by `message_type` and counts every frame
//! as liveness; the outbound pump is the only writer on the socket.

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};

use robohub_core::DeviceFrame;
use robohub_fleet::OfflineReason;

use crate::state::AppState;

/// Handle the upgrade at `/ws/{device_id}`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, device_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, device_id: String) {
    let accepted = match state.sessions.accept(&device_id) {
        Ok(accepted) => accepted,
        Err(e) => {
            // Browsers and dashboards share this endpoint; role-word
            // ids must not impersonate a device.
            tracing::info!(device_id = %device_id, error = %e, "rejecting reserved websocket id");
            let mut socket = socket;
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: "reserved device id".into(),
                })))
                .await;
            return;
        }
    };

    if accepted.replaced {
        tracing::info!(device_id = %device_id, "displaced prior session for device");
    }
    tracing::info!(device_id = %device_id, "websocket accepted");

    let (mut sink, mut stream) = socket.split();
    let session = accepted.session;
    let mut outbound_rx = accepted.outbound_rx;
    let mut closed_rx = accepted.closed_rx;

    // Outbound pump: drains the session queue in FIFO order.
    let mut pump_closed = closed_rx.clone();
    let pump_device = device_id.clone();
    let pump = tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = outbound_rx.recv() => {
                    let Some(frame) = frame else { break };
                    let json = match serde_json::to_string(&frame) {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::error!(device_id = %pump_device, error = %e, "frame serialization failed");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(json)).await.is_err() {
                        tracing::debug!(device_id = %pump_device, "outbound write failed");
                        break;
                    }
                }
                _ = pump_closed.changed() => {
                    if *pump_closed.borrow() {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        }
    });

    // Inbound dispatcher.
    let mut registered = false;
    loop {
        tokio::select! {
            message = stream.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&state, &session, &device_id, &mut registered, &text).await;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        tracing::warn!(device_id = %device_id, "binary frame dropped, channel is JSON only");
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(device_id = %device_id, error = %e, "websocket read error");
                        break;
                    }
                }
            }
            _ = closed_rx.changed() => {
                if *closed_rx.borrow() {
                    break;
                }
            }
        }
    }

    // Session-ended hook: only the currently-installed session drives
    // the offline transition. A session displaced by re-registration
    // or already reaped does nothing here.
    if state.sessions.finish_if_current(&session) {
        state
            .registry
            .mark_offline(&device_id, OfflineReason::Disconnected)
            .await;
    }
    pump.abort();

    tracing::info!(device_id = %device_id, "websocket closed");
}

/// Route one inbound frame by its discriminator.
async fn handle_frame(
    state: &AppState,
    session: &std::sync::Arc<robohub_fleet::Session>,
    device_id: &str,
    registered: &mut bool,
    text: &str,
) {
    // Any inbound frame counts as liveness, well-formed or not.
    state.registry.touch(device_id);

    let frame: DeviceFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(device_id, error = %e, "dropping malformed frame");
            return;
        }
    };

    match frame {
        DeviceFrame::Registration {
            device_type,
            metadata,
        } => {
            session.set_device_type(&device_type);
            if *registered {
                state
                    .registry
                    .refresh_metadata(device_id, &device_type, metadata)
                    .await;
            } else {
                state.registry.register(device_id, &device_type, metadata).await;
                *registered = true;
            }
        }
        DeviceFrame::Heartbeat { .. } => {}
        DeviceFrame::Status {
            device_type,
            payload,
        } => {
            state
                .ingestor
                .handle_status(device_id, &device_type, payload)
                .await;
        }
        DeviceFrame::CommandAck {
            command_id,
            status,
            response,
            ..
        } => {
            state
                .router
                .handle_ack(device_id, &command_id, status, response)
                .await;
        }
    }
}
