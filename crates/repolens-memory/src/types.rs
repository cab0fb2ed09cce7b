//! Embedding records and their kind-specific attributes.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MemoryError;

/// Category assigned to records that carry no explicit partition.
pub const CODE_CATEGORY: &str = "code";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordKind {
    Commit,
    FileChunk,
    QaQuestion,
    QaAnswer,
}

impl RecordKind {
    pub const ALL: [Self; 4] = [Self::Commit, Self::FileChunk, Self::QaQuestion, Self::QaAnswer];

    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::FileChunk => "file-chunk",
            Self::QaQuestion => "qa-question",
            Self::QaAnswer => "qa-answer",
        }
    }

    /// Kinds that live in the interaction-history corpus.
    #[must_use]
    pub fn is_history(self) -> bool {
        matches!(self, Self::QaQuestion | Self::QaAnswer)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for RecordKind {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.id() == s)
            .ok_or_else(|| MemoryError::Schema(format!("unknown record kind: {s}")))
    }
}

/// Structural unit a file chunk was cut along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitType {
    Class,
    Function,
    Method,
    Block,
    Full,
}

impl UnitType {
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Function => "function",
            Self::Method => "method",
            Self::Block => "block",
            Self::Full => "full",
        }
    }
}

impl fmt::Display for UnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Outcome of a recorded question/answer interaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionStatus {
    #[default]
    Success,
    Partial,
    Failure,
}

impl InteractionStatus {
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failure => "failure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitAttributes {
    pub sha: String,
    #[serde(default)]
    pub author: String,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChunkAttributes {
    pub path: String,
    pub chunk_index: usize,
    pub chunk_count: usize,
    pub start_line: usize,
    pub end_line: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_name: Option<String>,
    pub unit_type: UnitType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QaAttributes {
    pub session_id: String,
    pub category: String,
    pub asked_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: InteractionStatus,
    /// How many times this record has been returned by past queries.
    #[serde(default)]
    pub retrieval_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

/// Kind-specific metadata. The variant determines the record kind.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordAttributes {
    Commit(CommitAttributes),
    FileChunk(FileChunkAttributes),
    QaQuestion(QaAttributes),
    QaAnswer(QaAttributes),
}

/// Borrowed view of a single attribute value, used by filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeRef<'a> {
    Text(&'a str),
    Integer(i64),
}

impl RecordAttributes {
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Commit(_) => RecordKind::Commit,
            Self::FileChunk(_) => RecordKind::FileChunk,
            Self::QaQuestion(_) => RecordKind::QaQuestion,
            Self::QaAnswer(_) => RecordKind::QaAnswer,
        }
    }

    #[must_use]
    pub fn qa(&self) -> Option<&QaAttributes> {
        match self {
            Self::QaQuestion(qa) | Self::QaAnswer(qa) => Some(qa),
            Self::Commit(_) | Self::FileChunk(_) => None,
        }
    }

    /// Look up an attribute by its wire name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<AttributeRef<'_>> {
        let int = |v: usize| i64::try_from(v).ok().map(AttributeRef::Integer);
        match self {
            Self::Commit(c) => match name {
                "sha" => Some(AttributeRef::Text(&c.sha)),
                "author" => Some(AttributeRef::Text(&c.author)),
                "message" => Some(AttributeRef::Text(&c.message)),
                _ => None,
            },
            Self::FileChunk(f) => match name {
                "path" => Some(AttributeRef::Text(&f.path)),
                "chunkIndex" => int(f.chunk_index),
                "chunkCount" => int(f.chunk_count),
                "startLine" => int(f.start_line),
                "endLine" => int(f.end_line),
                "unitName" => f.unit_name.as_deref().map(AttributeRef::Text),
                "unitType" => Some(AttributeRef::Text(f.unit_type.id())),
                "language" => f.language.as_deref().map(AttributeRef::Text),
                _ => None,
            },
            Self::QaQuestion(q) | Self::QaAnswer(q) => match name {
                "sessionId" => Some(AttributeRef::Text(&q.session_id)),
                "category" => Some(AttributeRef::Text(&q.category)),
                "status" => Some(AttributeRef::Text(q.status.id())),
                "retrievalCount" => Some(AttributeRef::Integer(i64::from(q.retrieval_count))),
                _ => None,
            },
        }
    }

    /// Attributes as the JSON object stored next to `kind` on the wire.
    #[must_use]
    pub fn to_wire(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Parse the wire attribute object for a record of `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Schema`] when the object lacks fields required by `kind`.
    pub fn from_wire(kind: RecordKind, value: serde_json::Value) -> Result<Self, MemoryError> {
        let parsed = match kind {
            RecordKind::Commit => serde_json::from_value(value).map(Self::Commit),
            RecordKind::FileChunk => serde_json::from_value(value).map(Self::FileChunk),
            RecordKind::QaQuestion => serde_json::from_value(value).map(Self::QaQuestion),
            RecordKind::QaAnswer => serde_json::from_value(value).map(Self::QaAnswer),
        };
        parsed.map_err(|e| MemoryError::Schema(format!("invalid {kind} attributes: {e}")))
    }

    /// Timestamp carried by the attributes themselves, if any.
    #[must_use]
    pub fn natural_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Commit(c) => Some(c.date),
            Self::QaQuestion(q) | Self::QaAnswer(q) => Some(q.answered_at.unwrap_or(q.asked_at)),
            Self::FileChunk(_) => None,
        }
    }
}

impl Serialize for RecordAttributes {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Commit(c) => c.serialize(serializer),
            Self::FileChunk(f) => f.serialize(serializer),
            Self::QaQuestion(q) | Self::QaAnswer(q) => q.serialize(serializer),
        }
    }
}

/// One embedded unit of repository knowledge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRecord", into = "RawRecord")]
pub struct EmbeddingRecord {
    pub id: String,
    pub text: String,
    pub vector: Vec<f32>,
    pub attributes: RecordAttributes,
    pub category: String,
    pub created_at: DateTime<Utc>,
}

impl EmbeddingRecord {
    /// Build a record, deriving the category from the attributes.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        text: impl Into<String>,
        vector: Vec<f32>,
        attributes: RecordAttributes,
        created_at: DateTime<Utc>,
    ) -> Self {
        let category = attributes
            .qa()
            .map_or_else(|| CODE_CATEGORY.to_owned(), |qa| qa.category.clone());
        Self {
            id: id.into(),
            text: text.into(),
            vector,
            attributes,
            category,
            created_at,
        }
    }

    #[must_use]
    pub fn kind(&self) -> RecordKind {
        self.attributes.kind()
    }
}

/// Wire shape of a record: `kind` and `attributes` are separate fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRecord {
    id: String,
    kind: RecordKind,
    #[serde(default)]
    text: String,
    vector: Vec<f32>,
    #[serde(default)]
    attributes: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<DateTime<Utc>>,
}

impl TryFrom<RawRecord> for EmbeddingRecord {
    type Error = MemoryError;

    fn try_from(raw: RawRecord) -> Result<Self, Self::Error> {
        let attributes = RecordAttributes::from_wire(raw.kind, raw.attributes)
            .map_err(|e| MemoryError::Schema(format!("record {}: {e}", raw.id)))?;
        let category = raw
            .category
            .or_else(|| attributes.qa().map(|qa| qa.category.clone()))
            .unwrap_or_else(|| CODE_CATEGORY.to_owned());
        let created_at = raw
            .created_at
            .or_else(|| attributes.natural_timestamp())
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        Ok(Self {
            id: raw.id,
            text: raw.text,
            vector: raw.vector,
            attributes,
            category,
            created_at,
        })
    }
}

impl From<EmbeddingRecord> for RawRecord {
    fn from(r: EmbeddingRecord) -> Self {
        Self {
            id: r.id,
            kind: r.attributes.kind(),
            text: r.text,
            vector: r.vector,
            attributes: r.attributes.to_wire(),
            category: Some(r.category),
            created_at: Some(r.created_at),
        }
    }
}
