use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session not found: {id}")]
    SessionNotFound { id: String },

    #[error("Upstream LLM failure: {0}")]
    UpstreamLlm(String),

    #[error("TTS failure: {0}")]
    Tts(String),

    #[error("No catalogue entry matched: {query}")]
    ImageUnresolved { query: String },

    #[error("Room is gone: {room_id}")]
    RoomGone { room_id: String },

    #[error("Reply parse failure: {0}")]
    ParseFailure(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DocentError {
    /// Short error code string surfaced to HTTP and datachannel clients.
    pub fn code(&self) -> &'static str {
        match self {
            DocentError::Config(_) => "CONFIG_ERROR",
            DocentError::SessionNotFound { .. } => "SESSION_NOT_FOUND",
            DocentError::UpstreamLlm(_) => "UPSTREAM_LLM",
            DocentError::Tts(_) => "TTS_ERROR",
            DocentError::ImageUnresolved { .. } => "IMAGE_UNRESOLVED",
            DocentError::RoomGone { .. } => "ROOM_GONE",
            DocentError::ParseFailure(_) => "PARSE_FAILURE",
            DocentError::Serialization(_) => "SERIALIZATION_ERROR",
            DocentError::Io(_) => "IO_ERROR",
            DocentError::Timeout { .. } => "TIMEOUT",
            DocentError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, DocentError>;
