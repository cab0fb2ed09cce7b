use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use repolens_memory::clock::{Clock, FixedClock};
use repolens_memory::types::{
    CommitAttributes, FileChunkAttributes, InteractionStatus, QaAttributes, UnitType,
};
use repolens_memory::{
    CorpusLoader, CorpusLocation, CorpusSnapshot, EmbeddingRecord, LoaderConfig, RecordAttributes,
};

pub fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .expect("valid rfc3339")
        .with_timezone(&Utc)
}

pub fn fixed_clock() -> Arc<dyn Clock> {
    Arc::new(FixedClock::new(ts("2026-06-01T00:00:00Z")))
}

pub fn chunk(id: &str, path: &str, vector: Vec<f32>) -> EmbeddingRecord {
    EmbeddingRecord::new(
        id,
        format!("code of {id}"),
        vector,
        RecordAttributes::FileChunk(FileChunkAttributes {
            path: path.to_owned(),
            chunk_index: 0,
            chunk_count: 1,
            start_line: 1,
            end_line: 20,
            unit_name: Some(id.to_owned()),
            unit_type: UnitType::Function,
            language: Some("rust".to_owned()),
            content_hash: None,
        }),
        ts("2026-05-01T00:00:00Z"),
    )
}

pub fn commit(id: &str, vector: Vec<f32>, date: &str) -> EmbeddingRecord {
    EmbeddingRecord::new(
        id,
        format!("commit {id}"),
        vector,
        RecordAttributes::Commit(CommitAttributes {
            sha: format!("{id}000000"),
            author: "dev".to_owned(),
            date: ts(date),
            message: format!("change {id}"),
            files: vec![],
        }),
        ts(date),
    )
}

pub fn question(id: &str, vector: Vec<f32>, category: &str, at: &str) -> EmbeddingRecord {
    EmbeddingRecord::new(
        id,
        format!("question {id}"),
        vector,
        RecordAttributes::QaQuestion(QaAttributes {
            session_id: "s1".to_owned(),
            category: category.to_owned(),
            asked_at: ts(at),
            answered_at: None,
            status: InteractionStatus::Success,
            retrieval_count: 0,
            prompt_tokens: None,
            completion_tokens: None,
            latency_ms: None,
        }),
        ts(at),
    )
}

pub fn write_snapshot(path: &Path, records: Vec<EmbeddingRecord>) {
    let snapshot = CorpusSnapshot::build(records, ts("2026-05-15T00:00:00Z"));
    std::fs::write(path, snapshot.to_json_vec().unwrap()).unwrap();
}

pub fn local_loader(path: &Path) -> Arc<CorpusLoader> {
    let config = LoaderConfig::new(CorpusLocation::Local(path.to_path_buf()));
    Arc::new(CorpusLoader::new(config, fixed_clock()).unwrap())
}
