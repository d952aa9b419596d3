//! The conversation turn endpoint — POST /converse.
//!
//! Request:  `{"session_id": "...", "message": "..."}` with the session's
//! capability token as `Authorization: Bearer <token>`.
//! Response: `{"assistant_response", "audio_base64", "images_scheduled",
//! "end_chat", "tts_error"?}` — visuals arrive asynchronously over the
//! room datachannel, each carrying its server-timeline `playout_ts`.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::warn;

use docent_agent::{converse, TurnError};

use crate::app::AppState;
use crate::auth;
use crate::http::ApiError;

#[derive(Deserialize)]
pub struct ConverseRequest {
    pub session_id: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct ConverseReply {
    pub assistant_response: String,
    /// Empty when the turn degraded to silence.
    pub audio_base64: String,
    pub images_scheduled: usize,
    pub end_chat: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_error: Option<bool>,
}

pub async fn converse_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ConverseRequest>,
) -> Result<Json<ConverseReply>, (StatusCode, Json<ApiError>)> {
    if req.message.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiError::new("message cannot be empty", "BAD_REQUEST")),
        ));
    }

    let entry = state.registry.get_entry(&req.session_id).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(ApiError::new(
                format!("session not found: {}", req.session_id),
                "SESSION_NOT_FOUND",
            )),
        )
    })?;

    let authorised = extract_bearer(&headers)
        .map(|token| {
            auth::verify_token(
                &state.config.gateway.secret,
                &entry.id,
                &entry.room_id,
                token,
            )
        })
        .unwrap_or(false);
    if !authorised {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(ApiError::new(
                "missing or invalid capability token",
                "AUTH_FAILED",
            )),
        ));
    }

    match converse(state.as_ref(), &req.session_id, &req.message).await {
        Ok(outcome) => Ok(Json(ConverseReply {
            assistant_response: outcome.assistant_text,
            audio_base64: outcome
                .audio
                .map(|a| BASE64.encode(&a.bytes))
                .unwrap_or_default(),
            images_scheduled: outcome.images_scheduled,
            end_chat: outcome.end_chat,
            tts_error: outcome.tts_error.then_some(true),
        })),
        Err(TurnError::SessionNotFound { id }) => Err((
            StatusCode::NOT_FOUND,
            Json(ApiError::new(
                format!("session not found: {id}"),
                "SESSION_NOT_FOUND",
            )),
        )),
        Err(e @ TurnError::UpstreamLlm(_)) => {
            warn!(session_id = %req.session_id, error = %e, "turn failed upstream");
            Err((
                StatusCode::BAD_GATEWAY,
                Json(ApiError::new(e.to_string(), "UPSTREAM_LLM")),
            ))
        }
    }
}

pub(crate) fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}
