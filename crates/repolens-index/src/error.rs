//! Error types for repolens-index.

/// Errors that can occur while chunking, merging, or retrieving.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// IO error reading sources or writing snapshots.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Corpus loading, schema, or similarity error.
    #[error(transparent)]
    Memory(#[from] repolens_memory::MemoryError),

    /// Embedding provider error.
    #[error("embedding error: {0}")]
    Llm(#[from] repolens_llm::LlmError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic catch-all error.
    #[error("{0}")]
    Other(String),
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;
