//! Error types for subject storage

/// Errors from the subject store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("subject store I/O error: {0}")]
    Io(String),

    #[error("subject store parse error: {0}")]
    Parse(String),
}

/// Result alias for admission operations.
pub type Result<T> = std::result::Result<T, Error>;
