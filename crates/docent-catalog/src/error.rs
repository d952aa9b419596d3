use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Catalogue parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Malformed catalogue document: {0}")]
    Malformed(String),

    #[error("Catalogue is empty")]
    Empty,
}

pub type Result<T> = std::result::Result<T, CatalogError>;
