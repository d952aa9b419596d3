//! Session lifecycle routes — POST /start_session, GET/DELETE /session/{id}.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use docent_sessions::{EndReason, Session};

use crate::app::AppState;
use crate::auth;
use crate::http::ApiError;

#[derive(Deserialize)]
pub struct StartSessionRequest {
    pub kiosk_id: String,
}

#[derive(Serialize)]
pub struct StartSessionReply {
    pub session_id: String,
    pub token: String,
    pub livekit_url: String,
    pub room_name: String,
    pub duration_seconds: u64,
}

/// POST /start_session — mint a session, its room, and a capability token.
pub async fn start_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartSessionRequest>,
) -> Result<Json<StartSessionReply>, (StatusCode, Json<ApiError>)> {
    if req.kiosk_id.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiError::new("kiosk_id cannot be empty", "BAD_REQUEST")),
        ));
    }

    let entry = state.registry.create(&req.kiosk_id);
    state.history.init(&entry.id);
    let token = auth::mint_token(&state.config.gateway.secret, &entry.id, &entry.room_id);

    Ok(Json(StartSessionReply {
        session_id: entry.id.clone(),
        token,
        livekit_url: state.config.gateway.livekit_url.clone(),
        room_name: entry.room_id.clone(),
        duration_seconds: entry.duration_s,
    }))
}

/// GET /session/{id} — the session record, or 404.
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Session>, (StatusCode, Json<ApiError>)> {
    state
        .registry
        .lookup(&id)
        .map(Json)
        .ok_or_else(|| session_not_found(&id))
}

#[derive(Serialize)]
pub struct DeleteSessionReply {
    pub ended: bool,
}

/// DELETE /session/{id}?reason=… — idempotent explicit termination.
///
/// Operators force-terminate with `reason=operator_terminated`; everything
/// else counts as a manual end from the kiosk client.
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<DeleteSessionReply>, (StatusCode, Json<ApiError>)> {
    let reason = match params.get("reason").map(String::as_str) {
        Some("operator_terminated") => EndReason::OperatorTerminated,
        _ => EndReason::Manual,
    };

    match state.registry.end(&id, reason) {
        Ok(transitioned) => {
            if transitioned {
                info!(session_id = %id, ?reason, "session ended via DELETE");
            }
            Ok(Json(DeleteSessionReply { ended: true }))
        }
        Err(_) => Err(session_not_found(&id)),
    }
}

fn session_not_found(id: &str) -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::NOT_FOUND,
        Json(ApiError::new(
            format!("session not found: {id}"),
            "SESSION_NOT_FOUND",
        )),
    )
}
