use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use docent_agent::{ConversationStore, LlmProvider, TurnContext};
use docent_catalog::ImageResolver;
use docent_core::config::{DocentConfig, PipelineConfig};
use docent_rooms::RoomRouter;
use docent_sessions::SessionRegistry;
use docent_tts::TtsCache;

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
///
/// Every process-wide collaborator lives here and is handed to the pipeline
/// explicitly through the `TurnContext` impl; there are no ambient
/// singletons, which keeps the test harness trivial.
pub struct AppState {
    pub config: DocentConfig,
    pub registry: Arc<SessionRegistry>,
    pub rooms: Arc<RoomRouter>,
    pub tts: TtsCache,
    pub resolver: ImageResolver,
    pub llm: Box<dyn LlmProvider>,
    pub history: ConversationStore,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: DocentConfig,
        registry: Arc<SessionRegistry>,
        rooms: Arc<RoomRouter>,
        tts: TtsCache,
        resolver: ImageResolver,
        llm: Box<dyn LlmProvider>,
        history: ConversationStore,
    ) -> Self {
        Self {
            config,
            registry,
            rooms,
            tts,
            resolver,
            llm,
            history,
        }
    }
}

impl TurnContext for AppState {
    fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    fn router(&self) -> &Arc<RoomRouter> {
        &self.rooms
    }

    fn tts(&self) -> &TtsCache {
        &self.tts
    }

    fn resolver(&self) -> &ImageResolver {
        &self.resolver
    }

    fn llm(&self) -> &dyn LlmProvider {
        self.llm.as_ref()
    }

    fn history(&self) -> &ConversationStore {
        &self.history
    }

    fn pipeline_config(&self) -> &PipelineConfig {
        &self.config.pipeline
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/start_session", post(crate::http::session::start_session))
        .route("/converse", post(crate::http::converse::converse_handler))
        .route(
            "/session/{id}",
            get(crate::http::session::get_session).delete(crate::http::session::delete_session),
        )
        .route("/health", get(crate::http::health::health_handler))
        .route("/catalog/reload", post(crate::http::catalog::reload_handler))
        .route("/rooms/{room_id}/events", get(crate::ws::room_events_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
}
