use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use docent_agent::{ConversationStore, HttpLlmProvider};
use docent_catalog::{Catalog, ImageResolver};
use docent_core::config::{DocentConfig, OPERATOR_ROOM};
use docent_rooms::RoomRouter;
use docent_sessions::{SessionEvent, SessionRegistry};
use docent_tts::{HttpSynthesizer, SineSynthesizer, Synthesizer, TieredSynthesizer, TtsCache};

mod app;
mod auth;
mod http;
mod ws;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docent=info,docent_gateway=info,tower_http=debug".into()),
        )
        .init();

    // load config: explicit path > DOCENT_CONFIG env > ~/.docent/docent.toml
    let config_path = std::env::var("DOCENT_CONFIG").ok();
    let config = DocentConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        DocentConfig::default()
    });

    // Synthesiser tiers in declared order, placeholder last so the kiosk
    // keeps its timeline anchor even with every voice down.
    let mut tiers: Vec<Box<dyn Synthesizer>> = config
        .tts
        .endpoints
        .iter()
        .enumerate()
        .map(|(i, url)| {
            Box::new(HttpSynthesizer::new(url.clone(), format!("voice-{i}"))) as Box<dyn Synthesizer>
        })
        .collect();
    tiers.push(Box::new(SineSynthesizer));
    let synth = Arc::new(TieredSynthesizer::new(tiers));

    let tts = TtsCache::new(
        config.tts.cache_dir.clone(),
        config.tts.cache_enabled,
        synth,
    )?;

    let resolver = ImageResolver::load(&config.catalog.path, config.catalog.fallback_sample)
        .unwrap_or_else(|e| {
            warn!(path = %config.catalog.path, error = %e, "catalogue load failed, starting empty");
            ImageResolver::from_catalog(Catalog::default(), config.catalog.fallback_sample)
        });

    let rooms = Arc::new(RoomRouter::new());
    rooms.create(OPERATOR_ROOM);
    let registry = SessionRegistry::new(rooms.clone(), &config.session);

    let llm = Box::new(HttpLlmProvider::new(config.llm.base_url.clone()));
    let history = ConversationStore::new(config.llm.persona.clone());

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let operator_token = auth::mint_operator_token(&config.gateway.secret);

    let state = Arc::new(app::AppState::new(
        config,
        registry.clone(),
        rooms,
        tts,
        resolver,
        llm,
        history,
    ));
    let router = app::build_router(state.clone());

    // Background loops: inactivity sweep, remaining-time broadcaster, and
    // history cleanup on session end.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(registry.clone().run_sweeper(shutdown_rx.clone()));
    tokio::spawn(docent_sessions::ticker::run_ticker(
        registry.clone(),
        shutdown_rx.clone(),
    ));
    tokio::spawn(discard_history_on_end(state.clone()));

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!(%addr, operator_token = %operator_token, "docent gateway listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await?;

    Ok(())
}

/// Conversation history is discarded the moment its session ends, whichever
/// path ended it (manual, idle timeout, hard duration, operator).
async fn discard_history_on_end(state: Arc<app::AppState>) {
    let mut events = state.registry.subscribe_events();
    loop {
        match events.recv().await {
            Ok(SessionEvent::Ended { session_id, .. }) => {
                state.history.discard(&session_id);
            }
            Ok(SessionEvent::Tick { .. }) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
}
