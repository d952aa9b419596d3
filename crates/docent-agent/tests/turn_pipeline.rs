//! End-to-end turns through the conversation pipeline with stub upstreams:
//! scripted LLM, counting synthesiser, real registry/router/cache/resolver.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use docent_agent::{converse, ConversationStore, LlmProvider, ProviderError, TurnContext, TurnError};
use docent_catalog::{Catalog, ImageResolver};
use docent_core::config::{PipelineConfig, SessionConfig};
use docent_core::types::{server_now_ms, Role, Turn};
use docent_rooms::{ControlMessage, RoomRouter};
use docent_sessions::SessionRegistry;
use docent_tts::{SynthAudio, Synthesizer, TtsCache, TtsError};

struct ScriptedLlm {
    response: String,
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn name(&self) -> &str {
        "scripted"
    }
    async fn send(&self, _session_id: &str, _history: &[Turn]) -> Result<String, ProviderError> {
        Ok(self.response.clone())
    }
}

struct FailingLlm;

#[async_trait]
impl LlmProvider for FailingLlm {
    fn name(&self) -> &str {
        "failing"
    }
    async fn send(&self, _session_id: &str, _history: &[Turn]) -> Result<String, ProviderError> {
        Err(ProviderError::Unavailable("connection refused".into()))
    }
}

struct CountingSynth {
    calls: AtomicU32,
    fail: bool,
}

impl CountingSynth {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            fail,
        })
    }
}

#[async_trait]
impl Synthesizer for CountingSynth {
    fn name(&self) -> &str {
        "counting"
    }
    async fn synthesize(&self, text: &str) -> Result<SynthAudio, TtsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        if self.fail {
            return Err(TtsError::AllTiersFailed);
        }
        Ok(SynthAudio {
            bytes: format!("audio:{text}").into_bytes(),
            content_type: "audio/mpeg".into(),
        })
    }
}

struct TestContext {
    registry: Arc<SessionRegistry>,
    router: Arc<RoomRouter>,
    tts: TtsCache,
    resolver: ImageResolver,
    llm: Box<dyn LlmProvider>,
    history: ConversationStore,
    cfg: PipelineConfig,
}

impl TurnContext for TestContext {
    fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }
    fn router(&self) -> &Arc<RoomRouter> {
        &self.router
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
        &self.cfg
    }
}

fn test_catalog() -> Catalog {
    Catalog::parse(
        r#"{
        "collections": {
            "temples": [
                {"id": "parthenon", "title": "The Parthenon", "cdn_url": "https://cdn/parthenon.jpg",
                 "keywords": ["athens", "acropolis"]}
            ]
        }
    }"#,
    )
    .unwrap()
}

fn context(
    llm: Box<dyn LlmProvider>,
    synth: Arc<dyn Synthesizer>,
    cache_dir: &std::path::Path,
) -> TestContext {
    let router = Arc::new(RoomRouter::new());
    let registry = SessionRegistry::new(
        router.clone(),
        &SessionConfig {
            idle_timeout_ms: 600_000,
            duration_s: 300,
            sweep_interval_ms: 60_000,
        },
    );
    TestContext {
        registry,
        router,
        tts: TtsCache::new(cache_dir, true, synth).unwrap(),
        resolver: ImageResolver::from_catalog(test_catalog(), 3),
        llm,
        history: ConversationStore::new("you are a docent"),
        cfg: PipelineConfig::default(),
    }
}

const PARTHENON_REPLY: &str = r#"{
    "speech_response": "The Parthenon crowns the Acropolis of Athens.",
    "timeline_events": [
        {"time_offset_ms": 2000,
         "action": {"type": "PRELOAD_IMAGE", "payload": {"id": "parthenon"}}}
    ],
    "end_chat": false
}"#;

#[tokio::test(start_paused = true)]
async fn cold_turn_schedules_preload_and_show() {
    let dir = tempfile::tempdir().unwrap();
    let synth = CountingSynth::new(false);
    let ctx = context(
        Box::new(ScriptedLlm {
            response: PARTHENON_REPLY.into(),
        }),
        synth.clone(),
        dir.path(),
    );
    let entry = ctx.registry.create("kiosk-1");
    let mut rx = ctx.router.subscribe(&entry.room_id).unwrap();

    let before = server_now_ms();
    let outcome = converse(&ctx, &entry.id, "Tell me about the Parthenon")
        .await
        .unwrap();

    assert!(!outcome.assistant_text.is_empty());
    let audio = outcome.audio.expect("audio bytes");
    assert!(!audio.bytes.is_empty());
    assert_eq!(outcome.images_scheduled, 1);
    assert!(!outcome.end_chat);
    assert_eq!(ctx.tts.entry_count(), 1);

    // Preload fires at show − preload_lead, show at anchor + offset.
    tokio::time::sleep(Duration::from_millis(3_500)).await;
    let preload: ControlMessage = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
    let show: ControlMessage = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();

    match &preload {
        ControlMessage::ImgPreload { id, cdn_url, .. } => {
            assert_eq!(id, "parthenon");
            assert_eq!(cdn_url, "https://cdn/parthenon.jpg");
        }
        other => panic!("expected img_preload, got {other:?}"),
    }
    match &show {
        ControlMessage::ImgShow { id, playout_ts, .. } => {
            assert_eq!(id, "parthenon");
            // anchor_lead (1000) + offset (2000) from the turn instant.
            assert!(*playout_ts >= before + 3_000);
            assert!(*playout_ts <= before + 3_500);
        }
        other => panic!("expected img_show, got {other:?}"),
    }
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn warm_turn_reuses_cached_audio() {
    let dir = tempfile::tempdir().unwrap();
    let synth = CountingSynth::new(false);
    let ctx = context(
        Box::new(ScriptedLlm {
            response: PARTHENON_REPLY.into(),
        }),
        synth.clone(),
        dir.path(),
    );
    let entry = ctx.registry.create("kiosk-1");

    let first = converse(&ctx, &entry.id, "Tell me about the Parthenon")
        .await
        .unwrap();
    let second = converse(&ctx, &entry.id, "Tell me again")
        .await
        .unwrap();

    assert_eq!(synth.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        first.audio.unwrap().bytes,
        second.audio.unwrap().bytes
    );
    assert_eq!(ctx.tts.entry_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn fenced_reply_parses_and_dispatches_end_chat() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(
        Box::new(ScriptedLlm {
            response: "```json\n{\"speech_response\":\"Hi\",\"timeline_events\":[],\"end_chat\":true}\n```"
                .into(),
        }),
        CountingSynth::new(false),
        dir.path(),
    );
    let entry = ctx.registry.create("kiosk-1");
    let mut rx = ctx.router.subscribe(&entry.room_id).unwrap();

    let outcome = converse(&ctx, &entry.id, "bye").await.unwrap();
    assert!(outcome.end_chat);
    assert_eq!(outcome.assistant_text, "Hi");

    tokio::time::sleep(Duration::from_millis(5_000)).await;
    let mut end_chats = 0;
    while let Ok(payload) = rx.try_recv() {
        if let ControlMessage::EndChat = serde_json::from_str(&payload).unwrap() {
            end_chats += 1;
        }
    }
    assert_eq!(end_chats, 1);
}

#[tokio::test(start_paused = true)]
async fn turn_appends_exactly_user_and_assistant() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(
        Box::new(ScriptedLlm {
            response: PARTHENON_REPLY.into(),
        }),
        CountingSynth::new(false),
        dir.path(),
    );
    let entry = ctx.registry.create("kiosk-1");
    ctx.history.init(&entry.id);
    let before = ctx.history.history(&entry.id);

    converse(&ctx, &entry.id, "Tell me about the Parthenon")
        .await
        .unwrap();

    let after = ctx.history.history(&entry.id);
    assert_eq!(after.len(), before.len() + 2);
    assert_eq!(after[before.len()].role, Role::User);
    assert_eq!(after[before.len()].content, "Tell me about the Parthenon");
    assert_eq!(after[before.len() + 1].role, Role::Assistant);
}

#[tokio::test(start_paused = true)]
async fn llm_failure_drops_turn_but_keeps_session() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(Box::new(FailingLlm), CountingSynth::new(false), dir.path());
    let entry = ctx.registry.create("kiosk-1");

    let err = converse(&ctx, &entry.id, "hello").await.unwrap_err();
    assert!(matches!(err, TurnError::UpstreamLlm(_)));
    assert!(entry.is_active());
    assert_eq!(ctx.router.pending_count(&entry.room_id), 0);
}

#[tokio::test(start_paused = true)]
async fn tts_failure_degrades_but_still_schedules_visuals() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(
        Box::new(ScriptedLlm {
            response: PARTHENON_REPLY.into(),
        }),
        CountingSynth::new(true),
        dir.path(),
    );
    let entry = ctx.registry.create("kiosk-1");

    let outcome = converse(&ctx, &entry.id, "Tell me about the Parthenon")
        .await
        .unwrap();
    assert!(outcome.tts_error);
    assert!(outcome.audio.is_none());
    assert_eq!(outcome.images_scheduled, 1);
    assert!(!outcome.assistant_text.is_empty());
}

#[tokio::test(start_paused = true)]
async fn unknown_session_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(
        Box::new(ScriptedLlm {
            response: PARTHENON_REPLY.into(),
        }),
        CountingSynth::new(false),
        dir.path(),
    );
    let err = converse(&ctx, "no-such-session", "hi").await.unwrap_err();
    assert!(matches!(err, TurnError::SessionNotFound { .. }));
}

#[tokio::test(start_paused = true)]
async fn concurrent_identical_speech_synthesises_once() {
    let dir = tempfile::tempdir().unwrap();
    let synth = CountingSynth::new(false);
    let ctx = Arc::new(context(
        Box::new(ScriptedLlm {
            response: PARTHENON_REPLY.into(),
        }),
        synth.clone(),
        dir.path(),
    ));

    let mut handles = Vec::new();
    for i in 0..5 {
        let entry = ctx.registry.create(&format!("kiosk-{i}"));
        let ctx = ctx.clone();
        handles.push(tokio::spawn(async move {
            converse(ctx.as_ref(), &entry.id, "Tell me about the Parthenon")
                .await
                .unwrap()
        }));
    }

    let mut audio = Vec::new();
    for h in handles {
        audio.push(h.await.unwrap().audio.unwrap());
    }

    assert_eq!(synth.calls.load(Ordering::SeqCst), 1);
    for pair in audio.windows(2) {
        assert_eq!(pair[0].bytes, pair[1].bytes);
    }
}
