//! API Handlers
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use evidence_core::{AlarmReference, EvidenceError};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct VideoRequest {
    pub device_id: String,
    pub alarm_time: String,
}

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "in_flight": state.service.in_flight(),
            "retry_sweep_running": state.sweeper.is_running(),
        })),
    )
}

pub async fn retry_stats(State(state): State<AppState>) -> Response {
    Json(state.sweeper.tracker().stats().await).into_response()
}

/// Start a sweep in the background.
pub async fn retry_run(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    if state.sweeper.is_running() {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "started": false, "reason": "sweep already running" })),
        );
    }
    let sweeper = state.sweeper.clone();
    tokio::spawn(async move {
        if let Err(e) = sweeper.sweep().await {
            error!(kind = e.kind(), error = %e, "manual retry sweep failed");
        }
    });
    (StatusCode::ACCEPTED, Json(json!({ "started": true })))
}

/// Forget the retry count of one alarm so the next sweep picks it up again.
pub async fn retry_reset(
    State(state): State<AppState>,
    Path(guid): Path<String>,
) -> (StatusCode, Json<Value>) {
    if state.sweeper.tracker().clear(&guid).await {
        info!(guid = %guid, "retry count reset");
        (StatusCode::OK, Json(json!({ "guid": guid, "reset": true })))
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "guid": guid, "reset": false })),
        )
    }
}

/// Run one pipeline for `guid` in the background.
pub async fn request_video(
    State(state): State<AppState>,
    Path(guid): Path<String>,
    Json(request): Json<VideoRequest>,
) -> (StatusCode, Json<Value>) {
    let alarm = match AlarmReference::parse(&request.device_id, &request.alarm_time, &guid) {
        Ok(alarm) => alarm,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e),
    };
    let claim = match state.service.claim(&alarm) {
        Ok(Some(claim)) => claim,
        Ok(None) => {
            return (
                StatusCode::CONFLICT,
                Json(json!({ "guid": alarm.guid, "status": "in_flight" })),
            )
        }
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e),
    };

    let service = state.service.clone();
    let accepted = json!({ "guid": alarm.guid, "status": "accepted" });
    tokio::spawn(async move {
        // outcome is logged and counted by the service
        let _ = service.run_claimed(&alarm, claim).await;
    });
    (StatusCode::ACCEPTED, Json(accepted))
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.service.metrics().encode() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

fn error_response(status: StatusCode, e: &EvidenceError) -> (StatusCode, Json<Value>) {
    (
        status,
        Json(json!({ "error": e.kind(), "message": e.to_string() })),
    )
}
