use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlayoutError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image fetch failed ({url}): {message}")]
    Fetch { url: String, message: String },
}

pub type Result<T> = std::result::Result<T, PlayoutError>;
