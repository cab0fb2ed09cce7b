//! Text shaping around records: embedding input and display headers.

use repolens_memory::types::RecordAttributes;

use crate::chunker::ChunkDescriptor;
use crate::languages::Lang;

/// Generate text optimized for embedding (not for display).
///
/// Prepends file path, unit, and language tag to the raw chunk content.
#[must_use]
pub fn contextualize_for_embedding(
    chunk: &ChunkDescriptor,
    path: &str,
    lang: Option<Lang>,
) -> String {
    let mut text = String::with_capacity(chunk.content.len() + 128);

    text.push_str("# ");
    text.push_str(path);
    text.push('\n');

    text.push_str("# Unit: ");
    text.push_str(chunk.unit_type.id());
    if let Some(name) = &chunk.unit_name {
        text.push(' ');
        text.push_str(name);
    }
    text.push('\n');

    if let Some(lang) = lang {
        text.push_str("# Language: ");
        text.push_str(lang.id());
        text.push('\n');
    }

    text.push_str(&chunk.content);
    text
}

/// Short human-readable origin of a record, used in rendered context.
#[must_use]
pub fn record_display_header(attributes: &RecordAttributes) -> String {
    match attributes {
        RecordAttributes::Commit(c) => {
            let short = c.sha.get(..8).unwrap_or(&c.sha);
            format!("commit {short} by {} ({})", c.author, c.date.format("%Y-%m-%d"))
        }
        RecordAttributes::FileChunk(f) => {
            let name = f.unit_name.as_deref().unwrap_or(f.unit_type.id());
            format!(
                "{} :: {name} (lines {}-{})",
                f.path, f.start_line, f.end_line
            )
        }
        RecordAttributes::QaQuestion(q) => format!("question [{}] {}", q.category, q.status.id()),
        RecordAttributes::QaAnswer(q) => format!("answer [{}] {}", q.category, q.status.id()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use repolens_memory::types::{CommitAttributes, FileChunkAttributes, UnitType};

    fn sample_chunk() -> ChunkDescriptor {
        ChunkDescriptor {
            content: "fn hello() { 42 }".to_string(),
            start_line: 1,
            end_line: 3,
            unit_type: UnitType::Function,
            unit_name: Some("hello".to_string()),
            chunk_index: 0,
            chunk_count: 2,
        }
    }

    #[test]
    fn contextualize_includes_path_unit_and_language() {
        let text = contextualize_for_embedding(&sample_chunk(), "src/lib.rs", Some(Lang::Rust));
        assert!(text.starts_with("# src/lib.rs\n"));
        assert!(text.contains("# Unit: function hello\n"));
        assert!(text.contains("# Language: rust\n"));
        assert!(text.ends_with("fn hello() { 42 }"));
    }

    #[test]
    fn contextualize_without_language() {
        let mut chunk = sample_chunk();
        chunk.unit_name = None;
        let text = contextualize_for_embedding(&chunk, "notes.txt", None);
        assert!(!text.contains("Language"));
        assert!(text.contains("# Unit: function\n"));
    }

    #[test]
    fn headers_per_kind() {
        let commit = RecordAttributes::Commit(CommitAttributes {
            sha: "0123456789abcdef".into(),
            author: "dev".into(),
            date: DateTime::parse_from_rfc3339("2026-03-04T05:06:07Z")
                .unwrap()
                .with_timezone(&Utc),
            message: "msg".into(),
            files: vec![],
        });
        assert_eq!(record_display_header(&commit), "commit 01234567 by dev (2026-03-04)");

        let chunk = RecordAttributes::FileChunk(FileChunkAttributes {
            path: "src/a.rs".into(),
            chunk_index: 0,
            chunk_count: 1,
            start_line: 4,
            end_line: 9,
            unit_name: None,
            unit_type: UnitType::Block,
            language: None,
            content_hash: None,
        });
        assert_eq!(record_display_header(&chunk), "src/a.rs :: block (lines 4-9)");
    }
}
