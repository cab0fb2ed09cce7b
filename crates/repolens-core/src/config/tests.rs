use std::io::Write;

use serial_test::serial;

use super::*;
use repolens_memory::RetentionStrategy;

const ENV_KEYS: [&str; 21] = [
    "REPOLENS_CODE_LOCATION",
    "REPOLENS_HISTORY_LOCATION",
    "REPOLENS_FALLBACK_PATH",
    "REPOLENS_CACHE_TTL_SECS",
    "REPOLENS_FETCH_TIMEOUT_SECS",
    "REPOLENS_ALLOW_EMPTY_ON_FAILURE",
    "REPOLENS_RETRIEVAL_DEFAULT_K",
    "REPOLENS_RETRIEVAL_SCORE_THRESHOLD",
    "REPOLENS_MAX_CHUNK_SIZE",
    "REPOLENS_MIN_CHUNK_SIZE",
    "REPOLENS_OVERLAP_PERCENT",
    "REPOLENS_RETENTION_STRATEGY",
    "REPOLENS_RETENTION_MAX_COUNT",
    "REPOLENS_RETENTION_MAX_AGE_DAYS",
    "REPOLENS_MAX_RECORDS",
    "REPOLENS_WATERMARK_PATH",
    "REPOLENS_EMBEDDING_PROVIDER",
    "REPOLENS_EMBEDDING_BASE_URL",
    "REPOLENS_EMBEDDING_MODEL",
    "REPOLENS_EMBEDDING_API_KEY",
    "REPOLENS_EMBEDDING_TIMEOUT_SECS",
];

fn clear_env() {
    for key in ENV_KEYS {
        unsafe { std::env::remove_var(key) };
    }
}

#[test]
fn defaults_when_file_missing() {
    let config = Config::default();
    assert!(config.corpus.code_location.is_none());
    assert_eq!(config.corpus.cache_ttl_secs, 300);
    assert_eq!(config.corpus.fetch_timeout_secs, 30);
    assert!(!config.corpus.allow_empty_on_failure);
    assert_eq!(config.chunking.max_chunk_size, 4000);
    assert_eq!(config.chunking.min_chunk_size, 200);
    assert!((config.chunking.overlap_percent - 0.08).abs() < f64::EPSILON);
    assert_eq!(config.retention.strategy, RetentionStrategy::Hybrid);
    assert_eq!(config.retention.max_count, 1000);
    assert_eq!(config.retention.max_age_days, 90);
    assert_eq!(config.retrieval.default_k, 8);
    assert_eq!(config.pipeline.max_records, 50_000);
    assert_eq!(config.embedding.provider, EmbeddingProviderKind::OpenAi);
    assert!(config.embedding.api_key.is_none());
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn load_missing_file_uses_defaults() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.retrieval.default_k, 8);
    assert!(config.corpus.code_location.is_none());
}

#[test]
#[serial]
fn parse_valid_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("repolens.toml");
    let mut f = std::fs::File::create(&path).unwrap();
    write!(
        f,
        r#"
[corpus]
code_location = "https://cdn.example.com/corpus/code.json.gz"
cache_ttl_secs = 60
allow_empty_on_failure = true

[chunking]
max_chunk_size = 2000
min_chunk_size = 100

[retention]
strategy = "importance"
max_count = 250

[retrieval]
default_k = 5
score_threshold = 0.3

[pipeline]
max_records = 10
watermark_path = "state/marks.json"

[embedding]
provider = "mock"
dimensions = 16

[[embedding.fallback]]
base_url = "http://localhost:8080/v1"
model = "local-embed"
"#
    )
    .unwrap();

    clear_env();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.corpus.cache_ttl_secs, 60);
    assert!(config.corpus.allow_empty_on_failure);
    assert_eq!(config.corpus.fetch_timeout_secs, 30);
    assert_eq!(config.chunking.max_chunk_size, 2000);
    assert!((config.chunking.overlap_percent - 0.08).abs() < f64::EPSILON);
    assert_eq!(config.retention.strategy, RetentionStrategy::Importance);
    assert_eq!(config.retention.max_count, 250);
    assert_eq!(config.retention.max_age_days, 90);
    assert_eq!(config.retrieval.default_k, 5);
    assert_eq!(config.pipeline.max_records, 10);
    assert_eq!(
        config.pipeline.watermark_path.as_deref(),
        Some("state/marks.json")
    );
    assert_eq!(config.embedding.provider, EmbeddingProviderKind::Mock);
    assert_eq!(config.embedding.dimensions, 16);
    assert_eq!(config.embedding.fallback.len(), 1);
    assert_eq!(
        config.corpus.effective_history_location().as_deref(),
        Some("https://cdn.example.com/corpus/history-code.json.gz")
    );
}

#[test]
#[serial]
fn malformed_toml_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[corpus\ncode_location = 1").unwrap();
    clear_env();
    let err = Config::load(&path).unwrap_err();
    assert!(format!("{err:#}").contains("failed to parse config file"));
}

#[test]
#[serial]
fn env_overrides_file_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("repolens.toml");
    std::fs::write(&path, "[retrieval]\ndefault_k = 5\n").unwrap();

    clear_env();
    unsafe {
        std::env::set_var("REPOLENS_RETRIEVAL_DEFAULT_K", "12");
        std::env::set_var("REPOLENS_CODE_LOCATION", "/srv/corpus/code.json.gz");
        std::env::set_var("REPOLENS_RETENTION_STRATEGY", "count");
        std::env::set_var("REPOLENS_EMBEDDING_PROVIDER", "mock");
        std::env::set_var("REPOLENS_EMBEDDING_API_KEY", "sk-test");
        std::env::set_var("REPOLENS_ALLOW_EMPTY_ON_FAILURE", "true");
        std::env::set_var("REPOLENS_OVERLAP_PERCENT", "0.1");
    }

    let config = Config::load(&path).unwrap();
    clear_env();

    assert_eq!(config.retrieval.default_k, 12);
    assert_eq!(
        config.corpus.code_location.as_deref(),
        Some("/srv/corpus/code.json.gz")
    );
    assert_eq!(config.retention.strategy, RetentionStrategy::Count);
    assert_eq!(config.embedding.provider, EmbeddingProviderKind::Mock);
    assert_eq!(
        config.embedding.api_key.as_ref().map(Secret::expose),
        Some("sk-test")
    );
    assert!(config.corpus.allow_empty_on_failure);
    assert!((config.chunking.overlap_percent - 0.1).abs() < f64::EPSILON);
}

#[test]
#[serial]
fn invalid_env_values_are_ignored() {
    clear_env();
    unsafe {
        std::env::set_var("REPOLENS_RETRIEVAL_DEFAULT_K", "many");
        std::env::set_var("REPOLENS_RETENTION_STRATEGY", "forever");
        std::env::set_var("REPOLENS_EMBEDDING_PROVIDER", "carrier-pigeon");
    }
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(&dir.path().join("none.toml")).unwrap();
    clear_env();

    assert_eq!(config.retrieval.default_k, 8);
    assert_eq!(config.retention.strategy, RetentionStrategy::Hybrid);
    assert_eq!(config.embedding.provider, EmbeddingProviderKind::OpenAi);
}

#[test]
fn api_key_is_never_read_from_file() {
    let config: Config = toml::from_str("[embedding]\napi_key = \"leaked\"\n").unwrap();
    assert!(config.embedding.api_key.is_none());
}

#[test]
fn secret_is_redacted() {
    let secret = Secret::new("sk-live");
    assert_eq!(format!("{secret:?}"), "[REDACTED]");
    assert_eq!(secret.to_string(), "[REDACTED]");
    assert_eq!(secret.expose(), "sk-live");
}

#[test]
fn validate_rejects_min_above_max() {
    let mut config = Config::default();
    config.chunking.min_chunk_size = 5000;
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("min_chunk_size"));
}

#[test]
fn validate_rejects_overlap_out_of_range() {
    let mut config = Config::default();
    config.chunking.overlap_percent = 0.75;
    assert!(config.validate().is_err());
    config.chunking.overlap_percent = -0.1;
    assert!(config.validate().is_err());
    config.chunking.overlap_percent = 0.5;
    assert!(config.validate().is_ok());
}

#[test]
fn validate_rejects_zero_fetch_timeout() {
    let mut config = Config::default();
    config.corpus.fetch_timeout_secs = 0;
    assert!(config.validate().is_err());
}

#[test]
fn history_location_derivation() {
    assert_eq!(
        derive_history_location("https://h/a/code.json.gz?v=3"),
        "https://h/a/history-code.json.gz?v=3"
    );
    assert_eq!(
        derive_history_location("/srv/corpus.json"),
        "/srv/history-corpus.json"
    );
    assert_eq!(derive_history_location("corpus.json"), "history-corpus.json");

    let corpus = CorpusConfig {
        code_location: Some("/a/code.json".into()),
        history_location: Some("/b/past.json".into()),
        ..CorpusConfig::default()
    };
    assert_eq!(
        corpus.effective_history_location().as_deref(),
        Some("/b/past.json")
    );
    assert!(CorpusConfig::default().effective_history_location().is_none());
}
