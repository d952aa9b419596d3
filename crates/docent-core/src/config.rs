use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8877;
pub const DEFAULT_BIND: &str = "0.0.0.0";
/// Cadence of the remaining-time broadcaster.
pub const TICK_INTERVAL_MS: u64 = 1_000;
/// Ended sessions are kept this long before the sweep deletes them.
pub const SESSION_GRACE_SECS: i64 = 3_600;
/// Room the remaining-time broadcaster publishes into.
pub const OPERATOR_ROOM: &str = "operator";

/// Top-level config (docent.toml + DOCENT_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocentConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub playout: PlayoutConfig,
}

impl Default for DocentConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            session: SessionConfig::default(),
            pipeline: PipelineConfig::default(),
            llm: LlmConfig::default(),
            tts: TtsConfig::default(),
            catalog: CatalogConfig::default(),
            playout: PlayoutConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// HMAC secret for per-session capability tokens.
    #[serde(default = "default_secret")]
    pub secret: String,
    /// SFU URL handed to clients in the start_session response.
    #[serde(default = "default_livekit_url")]
    pub livekit_url: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            secret: default_secret(),
            livekit_url: default_livekit_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Inactivity window before a session is ended with reason `timeout`.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Hard session duration from creation, independent of activity.
    #[serde(default = "default_duration_s")]
    pub duration_s: u64,
    /// How often the background sweep prunes old ended sessions.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: default_idle_timeout_ms(),
            duration_s: default_duration_s(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pre-roll between scheduling and speech start; absorbs the HTTP
    /// round-trip, audio decode, and client scheduling cost.
    #[serde(default = "default_anchor_lead_ms")]
    pub anchor_lead_ms: u64,
    /// How far ahead of its show instant an image preload is dispatched.
    #[serde(default = "default_preload_lead_ms")]
    pub preload_lead_ms: u64,
    /// TTL stamped on img_preload messages.
    #[serde(default = "default_preload_ttl_ms")]
    pub preload_ttl_ms: u64,
    /// Crossfade duration stamped on img_show messages.
    #[serde(default = "default_show_crossfade_ms")]
    pub show_crossfade_ms: u64,
    #[serde(default = "default_llm_timeout_ms")]
    pub llm_timeout_ms: u64,
    #[serde(default = "default_tts_timeout_ms")]
    pub tts_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            anchor_lead_ms: default_anchor_lead_ms(),
            preload_lead_ms: default_preload_lead_ms(),
            preload_ttl_ms: default_preload_ttl_ms(),
            show_crossfade_ms: default_show_crossfade_ms(),
            llm_timeout_ms: default_llm_timeout_ms(),
            tts_timeout_ms: default_tts_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    /// Persona prompt inserted once at the head of every conversation.
    #[serde(default = "default_persona")]
    pub persona: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            persona: default_persona(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default = "bool_true")]
    pub cache_enabled: bool,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
    /// Synthesiser tiers, tried in order. Each entry is a base URL exposing
    /// POST /synthesize. The constant-tone placeholder is always appended last.
    #[serde(default = "default_tts_endpoints")]
    pub endpoints: Vec<String>,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_dir: default_cache_dir(),
            endpoints: default_tts_endpoints(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_path")]
    pub path: String,
    /// Max entries drawn when keyword scoring finds nothing.
    #[serde(default = "default_fallback_sample")]
    pub fallback_sample: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: default_catalog_path(),
            fallback_sample: default_fallback_sample(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayoutConfig {
    /// A show arriving later than this is dropped rather than rendered.
    #[serde(default = "default_late_show_tolerance_ms")]
    pub late_show_tolerance_ms: u64,
    /// Frame cadence of the crossfade animation.
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
}

impl Default for PlayoutConfig {
    fn default() -> Self {
        Self {
            late_show_tolerance_ms: default_late_show_tolerance_ms(),
            frame_interval_ms: default_frame_interval_ms(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_secret() -> String {
    "change-me".to_string()
}
fn default_livekit_url() -> String {
    "ws://localhost:7880".to_string()
}
fn default_idle_timeout_ms() -> u64 {
    600_000
}
fn default_duration_s() -> u64 {
    300
}
fn default_sweep_interval_ms() -> u64 {
    60_000
}
fn default_anchor_lead_ms() -> u64 {
    1_000
}
fn default_preload_lead_ms() -> u64 {
    1_500
}
fn default_preload_ttl_ms() -> u64 {
    30_000
}
fn default_show_crossfade_ms() -> u64 {
    400
}
fn default_llm_timeout_ms() -> u64 {
    15_000
}
fn default_tts_timeout_ms() -> u64 {
    10_000
}
fn default_llm_base_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_persona() -> String {
    "You are a friendly museum docent. Reply as JSON with fields \
     speech_response, timeline_events and end_chat."
        .to_string()
}
fn default_cache_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.docent/tts-cache", home)
}
fn default_tts_endpoints() -> Vec<String> {
    vec!["http://localhost:5002".to_string()]
}
fn default_catalog_path() -> String {
    "assets/catalog.json".to_string()
}
fn default_fallback_sample() -> usize {
    3
}
fn default_late_show_tolerance_ms() -> u64 {
    100
}
fn default_frame_interval_ms() -> u64 {
    16
}

impl DocentConfig {
    /// Load config from a TOML file with DOCENT_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.docent/docent.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: DocentConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("DOCENT_").split("_"))
            .extract()
            .map_err(|e| crate::error::DocentError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.docent/docent.toml", home)
}
