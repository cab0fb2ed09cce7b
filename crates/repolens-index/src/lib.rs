//! Structural chunking, corpus building, and retrieval over code and history.
//!
//! Source files are split into bounded chunks along language-specific unit
//! boundaries, embedded, and merged with the previous snapshot into a new
//! corpus. Queries are answered from the code corpus, the history corpus, or
//! a score-ordered blend of both.

pub mod chunker;
pub mod context;
pub mod error;
pub mod languages;
pub mod pipeline;
pub mod retriever;
pub mod watermark;

#[cfg(test)]
pub(crate) mod test_utils;

pub use chunker::{ChunkDescriptor, ChunkerConfig, chunk_file};
pub use error::{IndexError, Result};
pub use pipeline::{CollectedItem, MergePipeline, MergeReport, PipelineConfig, export};
pub use retriever::{RankedResult, RetrievalConfig, RetrievalEngine, RetrievalMode};
pub use watermark::WatermarkStore;
