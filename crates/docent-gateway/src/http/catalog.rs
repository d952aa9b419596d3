use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use tracing::error;

use crate::app::AppState;
use crate::http::ApiError;

#[derive(Serialize)]
pub struct ReloadReply {
    pub entries: usize,
}

/// POST /catalog/reload — atomically swap in a re-read catalogue generation.
/// In-flight resolutions keep the generation they started with.
pub async fn reload_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReloadReply>, (StatusCode, Json<ApiError>)> {
    match state.resolver.reload() {
        Ok(entries) => Ok(Json(ReloadReply { entries })),
        Err(e) => {
            error!(error = %e, "catalogue reload failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError::new(e.to_string(), "INTERNAL_ERROR")),
            ))
        }
    }
}
