use thiserror::Error;

#[derive(Debug, Error)]
pub enum TtsError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Synthesiser error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("All synthesiser tiers failed")]
    AllTiersFailed,

    #[error("Audio encode error: {0}")]
    Encode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TtsError>;
