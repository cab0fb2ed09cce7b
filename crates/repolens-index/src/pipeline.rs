//! Corpus build: collect → embed → merge with the previous snapshot → clean → export.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::chunker::{ChunkerConfig, chunk_file};
use crate::context::contextualize_for_embedding;
use crate::error::{IndexError, Result};
use crate::languages::detect_language;
use crate::watermark::{WatermarkStore, write_atomic};
use repolens_llm::provider::EmbedProvider;
use repolens_memory::clock::Clock;
use repolens_memory::codec;
use repolens_memory::types::{FileChunkAttributes, RecordAttributes, RecordKind};
use repolens_memory::{
    CorpusSnapshot, EmbeddingRecord, MemoryError, PruneReport, RetentionManager, RetentionPolicy,
    RetentionStrategy,
};

/// A unit of raw knowledge handed to the pipeline, possibly without a vector.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawCollectedItem")]
pub struct CollectedItem {
    pub id: String,
    pub text: String,
    pub attributes: RecordAttributes,
    pub vector: Option<Vec<f32>>,
    pub category: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    /// Sent to the embedder instead of `text` when present.
    pub embed_text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCollectedItem {
    id: String,
    kind: RecordKind,
    #[serde(default)]
    text: String,
    #[serde(default)]
    attributes: serde_json::Value,
    #[serde(default)]
    vector: Option<Vec<f32>>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    embed_text: Option<String>,
}

impl TryFrom<RawCollectedItem> for CollectedItem {
    type Error = repolens_memory::MemoryError;

    fn try_from(raw: RawCollectedItem) -> std::result::Result<Self, Self::Error> {
        let attributes = RecordAttributes::from_wire(raw.kind, raw.attributes)?;
        Ok(Self {
            id: raw.id,
            text: raw.text,
            attributes,
            vector: raw.vector.filter(|v| !v.is_empty()),
            category: raw.category,
            created_at: raw.created_at,
            embed_text: raw.embed_text,
        })
    }
}

impl CollectedItem {
    #[must_use]
    pub fn new(id: impl Into<String>, text: impl Into<String>, attributes: RecordAttributes) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            attributes,
            vector: None,
            category: None,
            created_at: None,
            embed_text: None,
        }
    }

    #[must_use]
    pub fn with_vector(mut self, vector: Vec<f32>) -> Self {
        self.vector = Some(vector);
        self
    }

    fn into_record(self, vector: Vec<f32>, now: DateTime<Utc>) -> EmbeddingRecord {
        let created_at = self
            .created_at
            .or_else(|| self.attributes.natural_timestamp())
            .unwrap_or(now);
        let mut record = EmbeddingRecord::new(self.id, self.text, vector, self.attributes, created_at);
        if let Some(category) = self.category {
            record.category = category;
        }
        record
    }
}

impl From<EmbeddingRecord> for CollectedItem {
    fn from(record: EmbeddingRecord) -> Self {
        Self {
            id: record.id,
            text: record.text,
            attributes: record.attributes,
            vector: Some(record.vector).filter(|v| !v.is_empty()),
            category: Some(record.category),
            created_at: Some(record.created_at),
            embed_text: None,
        }
    }
}

/// Parse newline-delimited JSON items. Blank lines are ignored.
///
/// # Errors
///
/// Returns an error naming the first line that fails to parse.
pub fn parse_collected_lines(input: &str) -> Result<Vec<CollectedItem>> {
    input
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line)
                .map_err(|e| IndexError::Other(format!("collected item line {}: {e}", i + 1)))
        })
        .collect()
}

/// Outcome of a collection pass.
#[derive(Debug, Default)]
pub struct CollectReport {
    pub embedded: usize,
    /// Items that arrived with a vector, or chunks whose content was unchanged.
    pub reused: usize,
    /// `(id, cause)` for every item skipped because embedding failed.
    pub failed: Vec<(String, String)>,
}

/// Record counts through one merge.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub previous: usize,
    pub collected: usize,
    pub stale_removed: usize,
    pub dropped_empty: usize,
    pub dropped_dimension: usize,
    pub dropped_capacity: usize,
    pub pruned: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub chunker: ChunkerConfig,
    /// Keep at most this many records, newest first.
    pub max_records: Option<usize>,
}

/// Result of [`MergePipeline::run_incremental`].
#[derive(Debug)]
pub enum IncrementalOutcome {
    /// The source marker matched the stored watermark; nothing was done.
    Unchanged,
    Exported {
        collect: CollectReport,
        merge: MergeReport,
        bytes: u64,
    },
}

/// One incremental update: items collected since the last marker of `source`.
#[derive(Debug)]
pub struct IncrementalRun<'a> {
    pub source: &'a str,
    pub marker: &'a str,
    pub items: Vec<CollectedItem>,
    pub previous: Option<&'a CorpusSnapshot>,
    pub policy: Option<&'a RetentionPolicy>,
    pub output: &'a Path,
}

/// Builds corpus snapshots from collected knowledge.
pub struct MergePipeline<P: EmbedProvider> {
    provider: Arc<P>,
    clock: Arc<dyn Clock>,
    retention: RetentionManager,
    config: PipelineConfig,
}

impl<P: EmbedProvider> MergePipeline<P> {
    #[must_use]
    pub fn new(provider: Arc<P>, clock: Arc<dyn Clock>, config: PipelineConfig) -> Self {
        Self {
            provider,
            retention: RetentionManager::new(Arc::clone(&clock)),
            clock,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Turn collected items into records, embedding the ones without a vector.
    ///
    /// Items are processed in order; an item whose embedding fails is skipped
    /// and reported.
    pub async fn collect(&self, items: Vec<CollectedItem>) -> (Vec<EmbeddingRecord>, CollectReport) {
        let mut report = CollectReport::default();
        let mut records = Vec::with_capacity(items.len());
        let now = self.clock.now();
        let total = items.len();

        for (i, mut item) in items.into_iter().enumerate() {
            if let Some(vector) = item.vector.take() {
                report.reused += 1;
                records.push(item.into_record(vector, now));
                continue;
            }
            let input = item.embed_text.as_deref().unwrap_or(&item.text);
            let embedded = self.provider.embed(input).await;
            match embedded {
                Ok(vector) => {
                    report.embedded += 1;
                    tracing::debug!(
                        id = %item.id,
                        progress = format_args!("{}/{total}", i + 1),
                    );
                    records.push(item.into_record(vector, now));
                }
                Err(e) => {
                    tracing::warn!(id = %item.id, error = %e, "embedding failed, skipping record");
                    report.failed.push((item.id, e.to_string()));
                }
            }
        }

        tracing::info!(
            embedded = report.embedded,
            reused = report.reused,
            failed = report.failed.len(),
            "collection finished"
        );
        (records, report)
    }

    /// Chunk one source file and embed its chunks.
    ///
    /// Record ids are `{path}#{chunk_index}`. A chunk whose content hash
    /// matches the same id in `previous` keeps its stored vector.
    pub async fn collect_source_file(
        &self,
        path: &str,
        source: &str,
        previous: Option<&CorpusSnapshot>,
    ) -> (Vec<EmbeddingRecord>, CollectReport) {
        let lang = detect_language(Path::new(path));
        let chunks = chunk_file(source, Path::new(path), &self.config.chunker);
        let known: HashMap<&str, &EmbeddingRecord> = previous
            .map(|s| s.records.iter().map(|r| (r.id.as_str(), r)).collect())
            .unwrap_or_default();

        let now = self.clock.now();
        let mut report = CollectReport::default();
        let mut records = Vec::with_capacity(chunks.len());

        for chunk in &chunks {
            let id = format!("{path}#{}", chunk.chunk_index);
            let hash = chunk.content_hash();
            let attributes = RecordAttributes::FileChunk(FileChunkAttributes {
                path: path.to_owned(),
                chunk_index: chunk.chunk_index,
                chunk_count: chunk.chunk_count,
                start_line: chunk.start_line,
                end_line: chunk.end_line,
                unit_name: chunk.unit_name.clone(),
                unit_type: chunk.unit_type,
                language: lang.map(|l| l.id().to_owned()),
                content_hash: Some(hash.clone()),
            });

            let cached = known.get(id.as_str()).filter(|r| {
                matches!(&r.attributes, RecordAttributes::FileChunk(f)
                    if f.content_hash.as_deref() == Some(hash.as_str()))
            });
            let vector = if let Some(record) = cached {
                report.reused += 1;
                record.vector.clone()
            } else {
                let input = contextualize_for_embedding(chunk, path, lang);
                match self.provider.embed(&input).await {
                    Ok(v) => {
                        report.embedded += 1;
                        v
                    }
                    Err(e) => {
                        tracing::warn!(id = %id, error = %e, "embedding failed, skipping chunk");
                        report.failed.push((id, e.to_string()));
                        continue;
                    }
                }
            };
            records.push(EmbeddingRecord::new(
                id,
                chunk.content.clone(),
                vector,
                attributes,
                now,
            ));
        }

        tracing::debug!(
            file = %path,
            chunks = chunks.len(),
            embedded = report.embedded,
            reused = report.reused,
        );
        (records, report)
    }

    /// Merge `collected` into `previous` and build a snapshot.
    #[must_use]
    pub fn run(
        &self,
        collected: Vec<EmbeddingRecord>,
        previous: Option<&CorpusSnapshot>,
        policy: Option<&RetentionPolicy>,
    ) -> CorpusSnapshot {
        self.run_with_report(collected, previous, policy).0
    }

    /// Like [`run`](Self::run), also returning per-stage counts.
    #[must_use]
    pub fn run_with_report(
        &self,
        collected: Vec<EmbeddingRecord>,
        previous: Option<&CorpusSnapshot>,
        policy: Option<&RetentionPolicy>,
    ) -> (CorpusSnapshot, MergeReport) {
        let mut report = MergeReport {
            previous: previous.map_or(0, CorpusSnapshot::len),
            collected: collected.len(),
            ..MergeReport::default()
        };

        let mut merged = MergedRecords::default();
        if let Some(prev) = previous {
            for record in &prev.records {
                merged.upsert(record.clone());
            }
        }

        let recollected: HashSet<&str> = collected
            .iter()
            .filter_map(|r| match &r.attributes {
                RecordAttributes::FileChunk(f) => Some(f.path.as_str()),
                _ => None,
            })
            .collect();
        let incoming: HashSet<&str> = collected.iter().map(|r| r.id.as_str()).collect();
        report.stale_removed = merged.remove_file_chunks(&recollected, &incoming);

        for record in collected {
            merged.upsert(record);
        }
        let mut records = merged.into_vec();

        let before = records.len();
        records.retain(|r| !r.text.trim().is_empty());
        report.dropped_empty = before - records.len();

        let dim = dominant_dimension(&records);
        let before = records.len();
        records.retain(|r| Some(r.vector.len()) == dim);
        report.dropped_dimension = before - records.len();

        if let Some(max) = self.config.max_records
            && records.len() > max
        {
            let cap = RetentionPolicy {
                strategy: RetentionStrategy::Count,
                max_count: max,
                ..RetentionPolicy::default()
            };
            let (kept, pruned) = self.retention.prune(records, &cap);
            report.dropped_capacity = pruned.removed();
            records = kept;
        }

        if let Some(policy) = policy {
            let (kept, pruned) = self.retention.prune(records, policy);
            report.pruned = pruned.removed();
            records = kept;
        }

        report.total = records.len();
        tracing::info!(
            previous = report.previous,
            collected = report.collected,
            stale = report.stale_removed,
            dropped_empty = report.dropped_empty,
            dropped_dimension = report.dropped_dimension,
            dropped_capacity = report.dropped_capacity,
            pruned = report.pruned,
            total = report.total,
            "merge complete"
        );
        (CorpusSnapshot::build(records, self.clock.now()), report)
    }

    /// Embed one interaction and append it to `history`, replacing any record
    /// with the same id, then apply `policy`.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding fails or the vector length differs from
    /// the history's dimension.
    pub async fn append_interaction(
        &self,
        item: CollectedItem,
        history: Option<&CorpusSnapshot>,
        policy: &RetentionPolicy,
    ) -> Result<(CorpusSnapshot, PruneReport)> {
        let id = item.id.clone();
        let (mut records, report) = self.collect(vec![item]).await;
        let Some(record) = records.pop() else {
            let cause = report
                .failed
                .into_iter()
                .next()
                .map_or_else(|| "no record produced".to_owned(), |(_, cause)| cause);
            return Err(IndexError::Other(format!("failed to embed {id}: {cause}")));
        };

        let existing = history.map(|h| h.records.clone()).unwrap_or_default();
        let dimension = history.map_or(0, CorpusSnapshot::dimension);
        if dimension > 0 && record.vector.len() != dimension {
            return Err(MemoryError::DimensionMismatch {
                expected: dimension,
                actual: record.vector.len(),
            }
            .into());
        }

        let (kept, pruned) = self.retention.append(existing, record, policy);
        tracing::info!(
            id = %id,
            total = kept.len(),
            pruned = pruned.removed(),
            "interaction appended"
        );
        Ok((CorpusSnapshot::build(kept, self.clock.now()), pruned))
    }

    /// Collect, merge, and export unless `run.marker` is already recorded for
    /// `run.source`. The watermark advances only after the export succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the export or the watermark write fails.
    pub async fn run_incremental(
        &self,
        run: IncrementalRun<'_>,
        watermarks: &mut WatermarkStore,
    ) -> Result<IncrementalOutcome> {
        if watermarks.is_current(run.source, run.marker) {
            tracing::info!(source = run.source, marker = run.marker, "source unchanged");
            return Ok(IncrementalOutcome::Unchanged);
        }

        let (records, collect) = self.collect(run.items).await;
        let (snapshot, merge) = self.run_with_report(records, run.previous, run.policy);
        let bytes = export(&snapshot, run.output)?;
        watermarks.advance(run.source, run.marker, self.clock.now())?;
        Ok(IncrementalOutcome::Exported {
            collect,
            merge,
            bytes,
        })
    }
}

/// Serialize, gzip, and atomically replace `path` with `snapshot`.
/// Returns the compressed size.
///
/// # Errors
///
/// Returns an error if serialization, compression, or the write fails.
pub fn export(snapshot: &CorpusSnapshot, path: &Path) -> Result<u64> {
    let json = snapshot.to_json_vec()?;
    let gz = codec::compress(&json)?;
    write_atomic(path, &gz)?;
    let bytes = u64::try_from(gz.len()).unwrap_or(u64::MAX);
    tracing::info!(path = %path.display(), records = snapshot.len(), bytes, "snapshot exported");
    Ok(bytes)
}

/// Insertion-ordered id → record map. Replacing an id keeps its position.
#[derive(Default)]
struct MergedRecords {
    slots: Vec<Option<EmbeddingRecord>>,
    positions: HashMap<String, usize>,
}

impl MergedRecords {
    fn upsert(&mut self, record: EmbeddingRecord) {
        if let Some(&i) = self.positions.get(&record.id) {
            self.slots[i] = Some(record);
        } else {
            self.positions.insert(record.id.clone(), self.slots.len());
            self.slots.push(Some(record));
        }
    }

    /// Drop chunks of re-collected files unless their id is about to be replaced.
    fn remove_file_chunks(&mut self, paths: &HashSet<&str>, incoming: &HashSet<&str>) -> usize {
        if paths.is_empty() {
            return 0;
        }
        let mut removed = 0;
        for slot in &mut self.slots {
            let stale = slot.as_ref().is_some_and(|r| {
                !incoming.contains(r.id.as_str())
                    && matches!(&r.attributes, RecordAttributes::FileChunk(f)
                        if paths.contains(f.path.as_str()))
            });
            if stale {
                *slot = None;
                removed += 1;
            }
        }
        removed
    }

    fn into_vec(self) -> Vec<EmbeddingRecord> {
        self.slots.into_iter().flatten().collect()
    }
}

/// Most common non-zero vector length; ties go to the length seen first.
/// Records with an empty vector never count.
fn dominant_dimension(records: &[EmbeddingRecord]) -> Option<usize> {
    let mut counts: Vec<(usize, usize)> = Vec::new();
    for r in records {
        let len = r.vector.len();
        if len == 0 {
            continue;
        }
        match counts.iter_mut().find(|(d, _)| *d == len) {
            Some((_, n)) => *n += 1,
            None => counts.push((len, 1)),
        }
    }
    let mut best: Option<(usize, usize)> = None;
    for (dim, n) in counts {
        if best.is_none_or(|(_, m)| n > m) {
            best = Some((dim, n));
        }
    }
    best.map(|(dim, _)| dim)
}
