//! HTTP endpoints
//!
//! Operator command dispatch, the audio ingest surface, and the
//! read-side projections polled by the dashboard.

use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use robohub_audio::UploadRequest;
use robohub_core::{CommandStatus, PayloadMap};

use crate::state::AppState;
use crate::ws::ws_handler;
use crate::ServerError;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new()
        // Operator surface
        .route("/command", post(dispatch_command))
        // Audio ingest
        .route("/audio/upload", post(upload_audio))
        .route("/audio/notify", get(notify_device))
        .route("/audio/transcripts", get(list_transcripts))
        // Read-side projections
        .route("/devices", get(list_devices))
        .route("/devices/:device_id", get(get_device))
        .route("/state-history/:device_id", get(state_history))
        .route("/command-logs", get(command_logs))
        .route("/device-connection-history/:device_id", get(connection_history))
        .route("/system/logs", get(system_logs))
        // Health
        .route("/health", get(health))
        // Device channel
        .route("/ws/:device_id", get(ws_handler))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(
            state.config.server.request_timeout_seconds,
        )));

    if state.config.server.cors_enabled {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router.with_state(state)
}

fn default_limit() -> usize {
    100
}

fn default_log_limit() -> usize {
    200
}

// ----- operator surface ---------------------------------------------------

#[derive(Debug, Deserialize)]
struct CommandParams {
    device_type: String,
    command_name: String,
}

/// Dispatch a command to every online device of a type.
async fn dispatch_command(
    State(state): State<AppState>,
    Query(params): Query<CommandParams>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ServerError> {
    let payload: PayloadMap = if body.is_empty() {
        PayloadMap::new()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ServerError::InvalidRequest(format!("malformed payload: {e}")))?
    };

    let record = state
        .router
        .dispatch(&params.device_type, &params.command_name, payload, None)
        .await
        .map_err(|e| ServerError::Internal(e.to_string()))?;

    Ok(Json(json!({
        "command_id": record.command_id,
        "device_type": record.device_type,
        "command_name": record.command_name,
        "status": record.status,
        "target_device_count": record.target_device_count,
        "created_at": record.created_at.to_rfc3339(),
    })))
}

// ----- audio surface ------------------------------------------------------

#[derive(Debug, Deserialize)]
struct UploadParams {
    device_id: String,
    #[serde(default)]
    manual: bool,
    level: Option<i64>,
    threshold: Option<i64>,
}

/// Raw PCM upload from a device microphone.
async fn upload_audio(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> impl IntoResponse {
    let summary = state
        .pipeline
        .process_upload(UploadRequest {
            device_id: params.device_id,
            manual: params.manual,
            level: params.level,
            threshold: params.threshold,
            pcm: body.to_vec(),
        })
        .await;
    Json(summary)
}

#[derive(Debug, Deserialize)]
struct NotifyParams {
    device_id: String,
    text: String,
}

/// Speak `text` to a named device over its session channel.
async fn notify_device(
    State(state): State<AppState>,
    Query(params): Query<NotifyParams>,
) -> Json<serde_json::Value> {
    let sent = state.pipeline.notify(&params.device_id, &params.text).await;
    Json(json!({ "ok": sent }))
}

#[derive(Debug, Deserialize)]
struct LimitParams {
    #[serde(default = "default_limit")]
    limit: usize,
}

async fn list_transcripts(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Json<serde_json::Value> {
    match state.store.transcripts(params.limit).await {
        Ok(rows) => Json(json!({ "total": rows.len(), "transcripts": rows })),
        Err(e) => {
            tracing::error!(error = %e, "transcript query failed");
            Json(json!({ "total": 0, "transcripts": [], "error": true }))
        }
    }
}

// ----- read-side projections ----------------------------------------------

/// Live device list from the registry.
async fn list_devices(State(state): State<AppState>) -> Json<serde_json::Value> {
    let devices: Vec<serde_json::Value> = state
        .registry
        .list()
        .into_iter()
        .map(|d| {
            json!({
                "device_id": d.device_id,
                "device_type": d.device_type,
                "is_online": d.is_online,
                "last_heartbeat": d.last_heartbeat.to_rfc3339(),
                "connected_at": d.connected_at.to_rfc3339(),
                "disconnected_at": d.disconnected_at.map(|t| t.to_rfc3339()),
                "metadata": d.metadata,
            })
        })
        .collect();

    Json(json!({ "total": devices.len(), "devices": devices }))
}

async fn get_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let device = state
        .registry
        .get(&device_id)
        .ok_or_else(|| ServerError::NotFound(device_id))?;

    Ok(Json(json!({
        "device_id": device.device_id,
        "device_type": device.device_type,
        "is_online": device.is_online,
        "last_heartbeat": device.last_heartbeat.to_rfc3339(),
        "connected_at": device.connected_at.to_rfc3339(),
        "disconnected_at": device.disconnected_at.map(|t| t.to_rfc3339()),
        "metadata": device.metadata,
    })))
}

async fn state_history(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(params): Query<LimitParams>,
) -> Json<serde_json::Value> {
    match state.store.state_history(device_id.clone(), params.limit).await {
        Ok(states) => Json(json!({
            "device_id": device_id,
            "total": states.len(),
            "states": states,
        })),
        Err(e) => {
            tracing::error!(device_id = %device_id, error = %e, "state history query failed");
            Json(json!({ "device_id": device_id, "total": 0, "states": [], "error": true }))
        }
    }
}

#[derive(Debug, Deserialize)]
struct CommandLogParams {
    #[serde(default = "default_limit")]
    limit: usize,
    status: Option<String>,
    device_type: Option<String>,
}

async fn command_logs(
    State(state): State<AppState>,
    Query(params): Query<CommandLogParams>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let status = match &params.status {
        Some(raw) => Some(CommandStatus::parse(raw).ok_or_else(|| {
            ServerError::InvalidRequest(format!("unknown command status: {raw}"))
        })?),
        None => None,
    };

    match state
        .store
        .command_logs(status, params.device_type.clone(), params.limit)
        .await
    {
        Ok(logs) => Ok(Json(json!({ "total": logs.len(), "logs": logs }))),
        Err(e) => {
            tracing::error!(error = %e, "command log query failed");
            Ok(Json(json!({ "total": 0, "logs": [], "error": true })))
        }
    }
}

async fn connection_history(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(params): Query<LimitParams>,
) -> Json<serde_json::Value> {
    match state
        .store
        .connection_history(device_id.clone(), params.limit)
        .await
    {
        Ok(events) => Json(json!({
            "device_id": device_id,
            "total": events.len(),
            "events": events,
        })),
        Err(e) => {
            tracing::error!(device_id = %device_id, error = %e, "connection history query failed");
            Json(json!({ "device_id": device_id, "total": 0, "events": [], "error": true }))
        }
    }
}

#[derive(Debug, Deserialize)]
struct SystemLogParams {
    #[serde(default = "default_log_limit")]
    limit: usize,
    level: Option<String>,
}

async fn system_logs(
    State(state): State<AppState>,
    Query(params): Query<SystemLogParams>,
) -> Json<serde_json::Value> {
    let logs = state.logs.tail(params.limit, params.level.as_deref());
    Json(json!({ "total": logs.len(), "logs": logs }))
}

// ----- health -------------------------------------------------------------

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
        "app": "robohub",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
