//! In-memory corpus snapshots with exact cosine search, cached loading, and retention.

pub mod clock;
pub mod codec;
pub mod error;
pub mod filter;
pub mod index;
pub mod loader;
pub mod retention;
pub mod similarity;
pub mod snapshot;
pub mod topk;
pub mod types;

pub use error::MemoryError;
pub use filter::{FieldCondition, FieldValue, RecordFilter};
pub use index::{ScoredRecord, SimilarityIndex};
pub use loader::{CorpusLoader, CorpusLocation, LoaderConfig, SnapshotCache};
pub use retention::{PruneReport, RetentionManager, RetentionPolicy, RetentionStrategy};
pub use snapshot::{CorpusSnapshot, SCHEMA_VERSION};
pub use types::{EmbeddingRecord, RecordAttributes, RecordKind};
