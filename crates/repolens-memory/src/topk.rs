//! Exact top-K selection over scored candidates.
//!
//! Small candidate sets (or large K relative to the set) are fully sorted;
//! everything else goes through a K-sized min-heap. Both paths order by score
//! descending with ties broken by input position, so they return identical
//! results.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::error::Result;
use crate::similarity::cosine_similarity;

/// Below this many candidates the full sort is always used.
pub const BOUNDED_MIN_CANDIDATES: usize = 1024;

#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    /// Position of the record in its snapshot.
    pub position: usize,
    pub vector: &'a [f32],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredCandidate {
    pub position: usize,
    pub score: f32,
}

#[derive(Debug, Clone, Copy)]
struct Ranked {
    score: f32,
    seq: usize,
    position: usize,
}

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    /// Greater means ranked higher: larger score, then earlier input.
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl From<Ranked> for ScoredCandidate {
    fn from(r: Ranked) -> Self {
        Self {
            position: r.position,
            score: r.score,
        }
    }
}

fn score_all<'a>(
    query: &'a [f32],
    candidates: &'a [Candidate<'a>],
    floor: f32,
) -> impl Iterator<Item = Result<Ranked>> + 'a {
    candidates.iter().enumerate().filter_map(move |(seq, c)| {
        match cosine_similarity(query, c.vector) {
            Ok(score) if score >= floor => Some(Ok(Ranked {
                score,
                seq,
                position: c.position,
            })),
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        }
    })
}

/// Pick the `k` best candidates with similarity `>= floor`.
///
/// # Errors
///
/// Returns [`crate::MemoryError::DimensionMismatch`] when any candidate vector
/// differs in length from `query`.
pub fn select_top_k(
    query: &[f32],
    candidates: &[Candidate<'_>],
    k: usize,
    floor: f32,
) -> Result<Vec<ScoredCandidate>> {
    let n = candidates.len();
    if n < BOUNDED_MIN_CANDIDATES || k.saturating_mul(4) > n {
        select_full_sort(query, candidates, k, floor)
    } else {
        select_bounded(query, candidates, k, floor)
    }
}

/// Score everything, sort, truncate.
///
/// # Errors
///
/// See [`select_top_k`].
pub fn select_full_sort(
    query: &[f32],
    candidates: &[Candidate<'_>],
    k: usize,
    floor: f32,
) -> Result<Vec<ScoredCandidate>> {
    if k == 0 {
        return Ok(Vec::new());
    }
    let mut ranked = score_all(query, candidates, floor).collect::<Result<Vec<_>>>()?;
    ranked.sort_unstable_by(|a, b| b.cmp(a));
    ranked.truncate(k);
    Ok(ranked.into_iter().map(ScoredCandidate::from).collect())
}

/// Keep a `k`-sized min-heap of the best candidates seen so far.
///
/// # Errors
///
/// See [`select_top_k`].
pub fn select_bounded(
    query: &[f32],
    candidates: &[Candidate<'_>],
    k: usize,
    floor: f32,
) -> Result<Vec<ScoredCandidate>> {
    if k == 0 {
        return Ok(Vec::new());
    }
    let mut heap = BinaryHeap::with_capacity(k + 1);
    for entry in score_all(query, candidates, floor) {
        heap.push(Reverse(entry?));
        if heap.len() > k {
            heap.pop();
        }
    }
    let mut ranked: Vec<Ranked> = heap.into_iter().map(|Reverse(r)| r).collect();
    ranked.sort_unstable_by(|a, b| b.cmp(a));
    Ok(ranked.into_iter().map(ScoredCandidate::from).collect())
}
