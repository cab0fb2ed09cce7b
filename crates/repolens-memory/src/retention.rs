//! Size, age, and importance bounds for the interaction-history corpus.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::types::{EmbeddingRecord, InteractionStatus};

const HIGH_VALUE_CATEGORIES: &[&str] = &["architecture", "security", "performance", "onboarding"];

const RETRIEVAL_WEIGHT: f64 = 0.3;
const RECENCY_WEIGHT: f64 = 0.5;
const RECENCY_DECAY_DAYS: f64 = 30.0;
const CATEGORY_BONUS: f64 = 0.25;
const NON_QA_WEIGHT: f64 = 0.5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionStrategy {
    Count,
    Time,
    Importance,
    #[default]
    Hybrid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    pub strategy: RetentionStrategy,
    pub max_count: usize,
    pub max_age_days: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            strategy: RetentionStrategy::Hybrid,
            max_count: 1000,
            max_age_days: 90,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub before: usize,
    pub after: usize,
}

impl PruneReport {
    #[must_use]
    pub fn removed(&self) -> usize {
        self.before.saturating_sub(self.after)
    }
}

#[derive(Debug, Clone)]
pub struct RetentionManager {
    clock: Arc<dyn Clock>,
}

impl RetentionManager {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Apply `policy` to `records`. Survivors keep their input order.
    #[must_use]
    pub fn prune(
        &self,
        records: Vec<EmbeddingRecord>,
        policy: &RetentionPolicy,
    ) -> (Vec<EmbeddingRecord>, PruneReport) {
        let now = self.clock.now();
        let before = records.len();
        let kept = match policy.strategy {
            RetentionStrategy::Count => retain_best(records, policy.max_count, |_| 0.0),
            RetentionStrategy::Time => retain_recent(records, now, policy.max_age_days),
            RetentionStrategy::Importance => {
                retain_best(records, policy.max_count, |r| importance(r, now))
            }
            RetentionStrategy::Hybrid => {
                let recent = retain_recent(records, now, policy.max_age_days);
                retain_best(recent, policy.max_count, |r| importance(r, now))
            }
        };
        let report = PruneReport {
            before,
            after: kept.len(),
        };
        if report.removed() > 0 {
            tracing::info!(
                strategy = ?policy.strategy,
                before,
                removed = report.removed(),
                "pruned records"
            );
        }
        (kept, report)
    }

    /// Insert or replace `record` by id, then prune.
    #[must_use]
    pub fn append(
        &self,
        mut records: Vec<EmbeddingRecord>,
        record: EmbeddingRecord,
        policy: &RetentionPolicy,
    ) -> (Vec<EmbeddingRecord>, PruneReport) {
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        self.prune(records, policy)
    }

    #[must_use]
    pub fn importance(&self, record: &EmbeddingRecord) -> f64 {
        importance(record, self.clock.now())
    }
}

/// Weighted blend of outcome, reuse, recency and category value.
fn importance(record: &EmbeddingRecord, now: DateTime<Utc>) -> f64 {
    let (status_weight, retrievals) = match record.attributes.qa() {
        Some(qa) => (
            match qa.status {
                InteractionStatus::Success => 1.0,
                InteractionStatus::Partial => 0.6,
                InteractionStatus::Failure => 0.2,
            },
            f64::from(qa.retrieval_count),
        ),
        None => (NON_QA_WEIGHT, 0.0),
    };
    #[allow(clippy::cast_precision_loss)]
    let age_days = (now - record.created_at).num_seconds().max(0) as f64 / 86_400.0;
    let bonus = if HIGH_VALUE_CATEGORIES.contains(&record.category.as_str()) {
        CATEGORY_BONUS
    } else {
        0.0
    };
    status_weight
        + RETRIEVAL_WEIGHT * retrievals.ln_1p()
        + RECENCY_WEIGHT * (-age_days / RECENCY_DECAY_DAYS).exp()
        + bonus
}

fn retain_recent(
    records: Vec<EmbeddingRecord>,
    now: DateTime<Utc>,
    max_age_days: u32,
) -> Vec<EmbeddingRecord> {
    let cutoff = now - Duration::days(i64::from(max_age_days));
    records
        .into_iter()
        .filter(|r| r.created_at >= cutoff)
        .collect()
}

/// Keep the `max_count` highest-scoring records; ties go to newer records,
/// then to earlier input.
fn retain_best(
    records: Vec<EmbeddingRecord>,
    max_count: usize,
    score: impl Fn(&EmbeddingRecord) -> f64,
) -> Vec<EmbeddingRecord> {
    if records.len() <= max_count {
        return records;
    }
    let mut order: Vec<(usize, f64)> = records
        .iter()
        .enumerate()
        .map(|(i, r)| (i, score(r)))
        .collect();
    order.sort_by(|a, b| {
        b.1.total_cmp(&a.1)
            .then_with(|| records[b.0].created_at.cmp(&records[a.0].created_at))
            .then_with(|| a.0.cmp(&b.0))
    });
    let mut keep = vec![false; records.len()];
    for (i, _) in order.into_iter().take(max_count) {
        keep[i] = true;
    }
    records
        .into_iter()
        .zip(keep)
        .filter_map(|(r, k)| k.then_some(r))
        .collect()
}
