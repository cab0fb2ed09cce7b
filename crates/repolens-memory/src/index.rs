//! Brute-force similarity search over one snapshot.

use std::sync::Arc;

use crate::error::{MemoryError, Result};
use crate::filter::RecordFilter;
use crate::snapshot::CorpusSnapshot;
use crate::topk::{Candidate, ScoredCandidate, select_top_k};
use crate::types::{EmbeddingRecord, RecordKind};

#[derive(Debug, Clone)]
pub struct ScoredRecord<'a> {
    pub record: &'a EmbeddingRecord,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct SimilarityIndex {
    snapshot: Arc<CorpusSnapshot>,
}

impl SimilarityIndex {
    #[must_use]
    pub fn new(snapshot: Arc<CorpusSnapshot>) -> Self {
        Self { snapshot }
    }

    #[must_use]
    pub fn snapshot(&self) -> &Arc<CorpusSnapshot> {
        &self.snapshot
    }

    #[must_use]
    pub fn positions_of_kind(&self, kind: RecordKind) -> &[usize] {
        self.snapshot
            .indices
            .by_kind
            .get(kind.id())
            .map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn positions_of_category(&self, category: &str) -> &[usize] {
        self.snapshot
            .indices
            .by_category
            .get(category)
            .map_or(&[], Vec::as_slice)
    }

    /// Positions eligible under `filter`, in snapshot order.
    ///
    /// Kind and category restrictions are served from the precomputed
    /// indices; attribute conditions are then checked per remaining record.
    #[must_use]
    pub fn candidates(&self, filter: &RecordFilter) -> Vec<usize> {
        let records = &self.snapshot.records;
        let mut base: Vec<usize> = if filter.kinds.is_empty() {
            match &filter.category {
                Some(c) => self.positions_of_category(c).to_vec(),
                None => (0..records.len()).collect(),
            }
        } else {
            let mut merged: Vec<usize> = filter
                .kinds
                .iter()
                .flat_map(|k| self.positions_of_kind(*k).iter().copied())
                .collect();
            merged.sort_unstable();
            merged.dedup();
            merged
        };
        if filter.must.is_empty() && filter.must_not.is_empty() && filter.kinds.is_empty() {
            return base;
        }
        base.retain(|&pos| records.get(pos).is_some_and(|r| filter.matches(r)));
        base
    }

    /// Top `k` records under `filter` scoring at least `floor`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::DimensionMismatch`] when the query length
    /// differs from the corpus dimension.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &RecordFilter,
        floor: f32,
    ) -> Result<Vec<ScoredRecord<'_>>> {
        let dim = self.snapshot.dimension();
        if !self.snapshot.is_empty() && query.len() != dim {
            return Err(MemoryError::DimensionMismatch {
                expected: dim,
                actual: query.len(),
            });
        }
        let records = &self.snapshot.records;
        let candidates: Vec<Candidate<'_>> = self
            .candidates(filter)
            .into_iter()
            .filter_map(|position| {
                records.get(position).map(|r| Candidate {
                    position,
                    vector: &r.vector,
                })
            })
            .collect();
        let top = select_top_k(query, &candidates, k, floor)?;
        tracing::debug!(
            candidates = candidates.len(),
            returned = top.len(),
            "similarity search"
        );
        Ok(top
            .into_iter()
            .filter_map(|ScoredCandidate { position, score }| {
                records.get(position).map(|record| ScoredRecord { record, score })
            })
            .collect())
    }
}
