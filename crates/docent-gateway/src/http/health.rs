use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::app::AppState;

#[derive(Serialize)]
pub struct HealthReply {
    pub status: &'static str,
    pub active_sessions: usize,
    pub total_sessions: u64,
    pub tts_cache_entries: usize,
}

/// GET /health — liveness plus the counters operators watch.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthReply> {
    Json(HealthReply {
        status: "ok",
        active_sessions: state.registry.active_count(),
        total_sessions: state.registry.total_count(),
        tts_cache_entries: state.tts.entry_count(),
    })
}
