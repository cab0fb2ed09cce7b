//! Versioned corpus snapshot: records plus derived stats and indices.

use std::collections::BTreeMap;
use std::io;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MemoryError, Result};
use crate::types::{CODE_CATEGORY, EmbeddingRecord};

pub const SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotStats {
    /// Keyed by record kind id (`commit`, `file-chunk`, ...).
    pub counts_by_kind: BTreeMap<String, usize>,
    pub total_records: usize,
    /// Zero for an empty snapshot.
    pub dimension: usize,
    /// Size of the serialized `records` array.
    pub byte_size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotIndices {
    pub by_kind: BTreeMap<String, Vec<usize>>,
    pub by_category: BTreeMap<String, Vec<usize>>,
}

impl SnapshotIndices {
    fn build(records: &[EmbeddingRecord]) -> Self {
        let mut indices = Self::default();
        for (pos, rec) in records.iter().enumerate() {
            indices
                .by_kind
                .entry(rec.kind().id().to_owned())
                .or_default()
                .push(pos);
            indices
                .by_category
                .entry(rec.category.clone())
                .or_default()
                .push(pos);
        }
        indices
    }

    fn max_position(&self) -> Option<usize> {
        self.by_kind
            .values()
            .chain(self.by_category.values())
            .flat_map(|positions| positions.iter().copied())
            .max()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorpusSnapshot {
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
    pub stats: SnapshotStats,
    pub indices: SnapshotIndices,
    pub records: Vec<EmbeddingRecord>,
}

#[derive(Default)]
struct ByteCounter(u64);

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CorpusSnapshot {
    #[must_use]
    pub fn empty(created_at: DateTime<Utc>) -> Self {
        Self::build(Vec::new(), created_at)
    }

    /// Wrap `records` in a snapshot with freshly derived stats and indices.
    #[must_use]
    pub fn build(records: Vec<EmbeddingRecord>, created_at: DateTime<Utc>) -> Self {
        let mut snapshot = Self {
            schema_version: SCHEMA_VERSION,
            created_at,
            stats: SnapshotStats::default(),
            indices: SnapshotIndices::default(),
            records,
        };
        snapshot.rebuild();
        snapshot
    }

    /// Recompute stats and indices after `records` changed.
    pub fn rebuild(&mut self) {
        self.indices = SnapshotIndices::build(&self.records);
        let mut counter = ByteCounter::default();
        let byte_size = match serde_json::to_writer(&mut counter, &self.records) {
            Ok(()) => counter.0,
            Err(e) => {
                tracing::warn!(error = %e, "failed to measure snapshot size");
                0
            }
        };
        self.stats = SnapshotStats {
            counts_by_kind: self
                .indices
                .by_kind
                .iter()
                .map(|(k, v)| (k.clone(), v.len()))
                .collect(),
            total_records: self.records.len(),
            dimension: self.records.first().map_or(0, |r| r.vector.len()),
            byte_size,
        };
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.stats.dimension
    }

    /// Parse a decompressed snapshot document, upgrading older shapes.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Schema`] when the payload is not a recognised
    /// snapshot shape, declares a newer schema version, or carries indices
    /// that point outside `records`. Stats and indices of a structured
    /// snapshot are always recomputed from its records.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| MemoryError::Schema(format!("snapshot is not valid JSON: {e}")))?;
        Self::from_value(value)
    }

    /// # Errors
    ///
    /// See [`CorpusSnapshot::from_json_slice`].
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Array(records) => Self::upgrade(Value::Array(records), None),
            Value::Object(mut map) => {
                let version = match map.get("schemaVersion") {
                    None | Some(Value::Null) => None,
                    Some(v) => Some(v.as_u64().ok_or_else(|| {
                        MemoryError::Schema(format!("schemaVersion is not an integer: {v}"))
                    })?),
                };
                if version.is_some_and(|v| v > u64::from(SCHEMA_VERSION)) {
                    return Err(MemoryError::Schema(format!(
                        "snapshot schema version {} is newer than supported {SCHEMA_VERSION}",
                        version.unwrap_or_default()
                    )));
                }
                let structured = map.contains_key("stats") && map.contains_key("indices");
                if structured {
                    let mut snapshot: Self = serde_json::from_value(Value::Object(map))
                        .map_err(|e| MemoryError::Schema(format!("malformed snapshot: {e}")))?;
                    snapshot.validate()?;
                    if snapshot.indices != SnapshotIndices::build(&snapshot.records) {
                        tracing::warn!(
                            records = snapshot.len(),
                            "stored indices disagree with records, rebuilding"
                        );
                    }
                    snapshot.rebuild();
                    return Ok(snapshot);
                }
                if version.is_some_and(|v| v >= u64::from(SCHEMA_VERSION)) {
                    return Err(MemoryError::Schema(format!(
                        "schema version {SCHEMA_VERSION} snapshot lacks stats or indices"
                    )));
                }
                let records = map.remove("records").ok_or_else(|| {
                    MemoryError::Schema("legacy snapshot has no records field".into())
                })?;
                let created_at = map
                    .remove("createdAt")
                    .map(serde_json::from_value::<DateTime<Utc>>)
                    .transpose()
                    .map_err(|e| MemoryError::Schema(format!("invalid createdAt: {e}")))?;
                Self::upgrade(records, created_at)
            }
            other => Err(MemoryError::Schema(format!(
                "unrecognised snapshot shape: expected object or array, got {}",
                json_type(&other)
            ))),
        }
    }

    fn upgrade(records: Value, created_at: Option<DateTime<Utc>>) -> Result<Self> {
        if !records.is_array() {
            return Err(MemoryError::Schema(format!(
                "legacy records must be an array, got {}",
                json_type(&records)
            )));
        }
        let mut records: Vec<EmbeddingRecord> = serde_json::from_value(records)
            .map_err(|e| MemoryError::Schema(format!("malformed legacy record: {e}")))?;
        for rec in &mut records {
            CODE_CATEGORY.clone_into(&mut rec.category);
        }
        let created_at = created_at
            .or_else(|| records.iter().map(|r| r.created_at).max())
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        tracing::info!(records = records.len(), "upgraded legacy snapshot");
        Ok(Self::build(records, created_at))
    }

    /// Check that every stored index points at an existing record.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Schema`] naming the first bad position.
    pub fn validate(&self) -> Result<()> {
        if let Some(max) = self.indices.max_position()
            && max >= self.records.len()
        {
            return Err(MemoryError::Schema(format!(
                "index position {max} out of range for {} records",
                self.records.len()
            )));
        }
        Ok(())
    }

    /// Serialize to JSON bytes (uncompressed).
    ///
    /// # Errors
    ///
    /// Returns a JSON error if serialization fails.
    pub fn to_json_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
