//! Error types for learning stores.

/// Errors produced by learning store operations.
#[derive(Debug, thiserror::Error)]
pub enum LearningError {
    #[error("learning store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid pattern record: {0}")]
    InvalidRecord(String),
}

/// Result type for learning store operations.
pub type LearningResult<T> = std::result::Result<T, LearningError>;
