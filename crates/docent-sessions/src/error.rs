use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not found: {id}")]
    NotFound { id: String },
}

pub type Result<T> = std::result::Result<T, SessionError>;
