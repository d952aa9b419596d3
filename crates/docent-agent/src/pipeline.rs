use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use docent_catalog::ImageResolver;
use docent_core::config::PipelineConfig;
use docent_core::types::server_now_ms;
use docent_rooms::{ControlMessage, RoomRouter};
use docent_sessions::SessionRegistry;
use docent_tts::{CachedAudio, TtsCache};

use crate::history::ConversationStore;
use crate::provider::LlmProvider;
use crate::reply::{Reply, TimelineAction};

/// Rough speaking pace for estimating speech length when no audio artifact
/// is available (TTS degraded turns still schedule the end-chat marker).
const ESTIMATE_MS_PER_WORD: u64 = 400;

/// Collaborators of one conversation turn. The gateway's AppState implements
/// this; tests implement it with stub providers.
pub trait TurnContext: Send + Sync {
    fn registry(&self) -> &Arc<SessionRegistry>;
    fn router(&self) -> &Arc<RoomRouter>;
    fn tts(&self) -> &TtsCache;
    fn resolver(&self) -> &ImageResolver;
    fn llm(&self) -> &dyn LlmProvider;
    fn history(&self) -> &ConversationStore;
    fn pipeline_config(&self) -> &PipelineConfig;
}

/// Result of a completed conversation turn.
#[derive(Debug)]
pub struct TurnOutcome {
    pub assistant_text: String,
    /// None when every synthesiser tier failed or timed out; the client
    /// renders silently and visuals still run on schedule.
    pub audio: Option<Arc<CachedAudio>>,
    pub images_scheduled: usize,
    pub end_chat: bool,
    pub tts_error: bool,
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("Session not found: {id}")]
    SessionNotFound { id: String },

    #[error("Upstream LLM failure: {0}")]
    UpstreamLlm(String),
}

/// Run one conversation turn: LLM → parse → TTS → anchor → schedule visuals.
///
/// Turns on one session are serialised by the session's turn gate; a second
/// call queues behind the first and never interleaves history mutations.
/// A single transient failure never ends the session — the LLM path fails
/// the turn, the TTS path degrades it, the resolver path downgrades the
/// event to a fallback descriptor.
pub async fn converse<C: TurnContext>(
    ctx: &C,
    session_id: &str,
    user_text: &str,
) -> Result<TurnOutcome, TurnError> {
    let entry = ctx
        .registry()
        .get_entry(session_id)
        .filter(|e| e.is_active())
        .ok_or_else(|| TurnError::SessionNotFound {
            id: session_id.to_string(),
        })?;

    ctx.registry().refresh(session_id);
    let _turn = entry.turn_gate.lock().await;

    let cfg = ctx.pipeline_config();

    // LLM call. The user turn is appended before the call and stays in the
    // history even when the turn fails — retries are new turns, not replays.
    ctx.history().record_user(session_id, user_text);
    let history = ctx.history().history(session_id);

    let raw = match tokio::time::timeout(
        Duration::from_millis(cfg.llm_timeout_ms),
        ctx.llm().send(session_id, &history),
    )
    .await
    {
        Ok(Ok(raw)) => raw,
        Ok(Err(e)) => return Err(TurnError::UpstreamLlm(e.to_string())),
        Err(_) => {
            return Err(TurnError::UpstreamLlm(format!(
                "timeout after {}ms",
                cfg.llm_timeout_ms
            )))
        }
    };

    let reply = Reply::parse(&raw);
    let speech = reply.speech().to_string();
    ctx.history().record_assistant(session_id, &speech);

    // TTS synth or cache hit. Complete bytes, not a stream, so the client
    // can start playback at a well-defined instant.
    let mut tts_error = false;
    let audio = match tokio::time::timeout(
        Duration::from_millis(cfg.tts_timeout_ms),
        ctx.tts().get_or_synth(&speech),
    )
    .await
    {
        Ok(Ok(audio)) => Some(audio),
        Ok(Err(e)) => {
            warn!(session_id, error = %e, "tts failed, returning silent turn");
            tts_error = true;
            None
        }
        Err(_) => {
            warn!(session_id, timeout_ms = cfg.tts_timeout_ms, "tts timed out");
            tts_error = true;
            None
        }
    };

    // Anchor the timeline: the pre-roll absorbs the HTTP round-trip, audio
    // decode, and client scheduling cost.
    let anchor_wall = server_now_ms() + cfg.anchor_lead_ms as i64;
    let anchor = Instant::now() + Duration::from_millis(cfg.anchor_lead_ms);

    let mut scheduled = 0usize;
    for event in reply.timeline() {
        let TimelineAction::PreloadImage(image_ref) = &event.action;
        let resolution = match ctx.resolver().resolve(&image_ref.query()) {
            Ok(r) => r,
            Err(e) => {
                warn!(session_id, image = %image_ref.id, error = %e, "image resolution failed, event dropped");
                continue;
            }
        };
        if resolution.fallback {
            warn!(session_id, image = %image_ref.id, served = %resolution.descriptor.id,
                  "image unresolved, dispatching fallback descriptor");
        }
        let descriptor = resolution.descriptor;

        let show_wall = anchor_wall + event.time_offset_ms as i64;
        let show_at = anchor + Duration::from_millis(event.time_offset_ms);
        let preload_at = show_at
            .checked_sub(Duration::from_millis(cfg.preload_lead_ms))
            .unwrap_or_else(Instant::now);

        let preload = ControlMessage::ImgPreload {
            id: descriptor.id.clone(),
            cdn_url: descriptor.cdn_url.clone(),
            playout_ts: show_wall,
            ttl_ms: cfg.preload_ttl_ms,
        };
        let show = ControlMessage::ImgShow {
            id: descriptor.id.clone(),
            playout_ts: show_wall,
            transition: "crossfade".to_string(),
            duration_ms: cfg.show_crossfade_ms,
            caption: Some(descriptor.title.clone()),
        };

        let dispatched = ctx
            .router()
            .schedule(&entry.room_id, preload, preload_at)
            .and_then(|_| ctx.router().schedule(&entry.room_id, show, show_at));
        match dispatched {
            Ok(()) => scheduled += 1,
            Err(e) => {
                // Non-fatal: a session ending mid-turn just drops visuals.
                debug!(session_id, error = %e, "visual dispatch skipped");
            }
        }
    }

    // End-chat marker lands at the end of the speech.
    if reply.end_chat() {
        let speech_ms = audio
            .as_ref()
            .map(|a| a.duration_ms)
            .unwrap_or_else(|| estimate_speech_ms(&speech));
        if let Err(e) = ctx.router().schedule(
            &entry.room_id,
            ControlMessage::EndChat,
            anchor + Duration::from_millis(speech_ms),
        ) {
            debug!(session_id, error = %e, "end_chat dispatch skipped");
        }
    }

    info!(
        session_id,
        images = scheduled,
        end_chat = reply.end_chat(),
        tts_error,
        "turn complete"
    );

    Ok(TurnOutcome {
        assistant_text: speech,
        audio,
        images_scheduled: scheduled,
        end_chat: reply.end_chat(),
        tts_error,
    })
}

fn estimate_speech_ms(text: &str) -> u64 {
    text.split_whitespace().count().max(1) as u64 * ESTIMATE_MS_PER_WORD
}
