use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Rejected at construction time, before any query is served.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),
    /// A persisted index is missing, truncated or inconsistent.
    #[error("Failed to load index from {}: {reason}", path.display())]
    IndexLoad { path: PathBuf, reason: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to encode index: {0}")]
    Encode(String),
}

pub type Result<T> = std::result::Result<T, RetrievalError>;
