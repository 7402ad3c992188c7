//! Errors raised by external verification collaborators.

/// Errors a verification executor may return for a single invocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MethodologyError {
    #[error("verification failed: {reason}")]
    Failed { reason: String },

    #[error("invalid subject: {0}")]
    InvalidSubject(String),

    #[error("verification backend unavailable: {0}")]
    Unavailable(String),
}

impl MethodologyError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

/// Result type for verification executors.
pub type MethodologyResult<T> = std::result::Result<T, MethodologyError>;
