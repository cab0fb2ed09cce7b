#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// Remote or local snapshot could not be fetched.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot payload has a shape that cannot be read or upgraded.
    #[error("schema error: {0}")]
    Schema(String),

    /// Two vectors of different length were compared.
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("snapshot fetch timed out after {0}s")]
    Timeout(u64),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, MemoryError>;

impl MemoryError {
    /// Whether the failure came from reaching the snapshot rather than from
    /// its contents. Only these may degrade to an empty corpus.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Http(_) | Self::Io(_) | Self::Timeout(_)
        )
    }
}
