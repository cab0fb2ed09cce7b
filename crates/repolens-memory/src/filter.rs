use crate::types::{AttributeRef, EmbeddingRecord, RecordKind};

/// Eligibility restriction applied before scoring.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    /// Empty means every kind is eligible.
    pub kinds: Vec<RecordKind>,
    pub category: Option<String>,
    pub must: Vec<FieldCondition>,
    pub must_not: Vec<FieldCondition>,
}

#[derive(Debug, Clone)]
pub struct FieldCondition {
    pub field: String,
    pub value: FieldValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Integer(i64),
    Text(String),
}

impl FieldCondition {
    #[must_use]
    pub fn text(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: FieldValue::Text(value.into()),
        }
    }

    #[must_use]
    pub fn integer(field: impl Into<String>, value: i64) -> Self {
        Self {
            field: field.into(),
            value: FieldValue::Integer(value),
        }
    }
}

impl RecordFilter {
    #[must_use]
    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = RecordKind>) -> Self {
        self.kinds.extend(kinds);
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    #[must_use]
    pub fn must(mut self, cond: FieldCondition) -> Self {
        self.must.push(cond);
        self
    }

    #[must_use]
    pub fn must_not(mut self, cond: FieldCondition) -> Self {
        self.must_not.push(cond);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
            && self.category.is_none()
            && self.must.is_empty()
            && self.must_not.is_empty()
    }

    /// True when `record` passes every condition of this filter.
    #[must_use]
    pub fn matches(&self, record: &EmbeddingRecord) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&record.kind()) {
            return false;
        }
        if let Some(category) = &self.category
            && record.category != *category
        {
            return false;
        }
        for cond in &self.must {
            let Some(val) = record.attributes.field(&cond.field) else {
                return false;
            };
            if !field_matches(val, &cond.value) {
                return false;
            }
        }
        for cond in &self.must_not {
            if let Some(val) = record.attributes.field(&cond.field)
                && field_matches(val, &cond.value)
            {
                return false;
            }
        }
        true
    }
}

fn field_matches(val: AttributeRef<'_>, expected: &FieldValue) -> bool {
    match (val, expected) {
        (AttributeRef::Integer(a), FieldValue::Integer(b)) => a == *b,
        (AttributeRef::Text(a), FieldValue::Text(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InteractionStatus;
    use crate::types::test_support::{chunk_record, qa_record, ts};

    #[test]
    fn empty_filter_matches_everything() {
        let f = RecordFilter::default();
        assert!(f.is_empty());
        assert!(f.matches(&chunk_record("a", "t", vec![1.0])));
    }

    #[test]
    fn kind_filter() {
        let f = RecordFilter::default().with_kinds([RecordKind::Commit]);
        assert!(!f.matches(&chunk_record("a", "t", vec![1.0])));
        let f = RecordFilter::default().with_kinds([RecordKind::FileChunk]);
        assert!(f.matches(&chunk_record("a", "t", vec![1.0])));
    }

    #[test]
    fn category_filter() {
        let rec = qa_record(
            "q",
            vec![1.0],
            "security",
            InteractionStatus::Success,
            ts("2026-01-01T00:00:00Z"),
        );
        assert!(RecordFilter::default().with_category("security").matches(&rec));
        assert!(!RecordFilter::default().with_category("code").matches(&rec));
    }

    #[test]
    fn must_requires_present_and_equal() {
        let rec = chunk_record("a", "t", vec![1.0]);
        assert!(
            RecordFilter::default()
                .must(FieldCondition::text("path", "src/a.rs"))
                .matches(&rec)
        );
        assert!(
            !RecordFilter::default()
                .must(FieldCondition::text("path", "src/b.rs"))
                .matches(&rec)
        );
        assert!(
            !RecordFilter::default()
                .must(FieldCondition::text("sha", "x"))
                .matches(&rec)
        );
    }

    #[test]
    fn must_not_ignores_missing_fields() {
        let rec = chunk_record("a", "t", vec![1.0]);
        assert!(
            RecordFilter::default()
                .must_not(FieldCondition::text("sha", "x"))
                .matches(&rec)
        );
        assert!(
            !RecordFilter::default()
                .must_not(FieldCondition::integer("chunkIndex", 0))
                .matches(&rec)
        );
    }

    #[test]
    fn type_mismatch_never_matches() {
        let rec = chunk_record("a", "t", vec![1.0]);
        assert!(
            !RecordFilter::default()
                .must(FieldCondition::text("chunkIndex", "0"))
                .matches(&rec)
        );
    }
}
