use std::fmt;

use serde::{Deserialize, Serialize};

use repolens_index::{ChunkerConfig, RetrievalConfig};
use repolens_memory::RetentionPolicy;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub chunking: ChunkerConfig,
    #[serde(default)]
    pub retention: RetentionPolicy,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorpusConfig {
    /// URL or local path of the code snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_location: Option<String>,
    /// Derived from `code_location` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_path: Option<String>,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default)]
    pub allow_empty_on_failure: bool,
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            code_location: None,
            history_location: None,
            fallback_path: None,
            cache_ttl_secs: default_cache_ttl_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            allow_empty_on_failure: false,
        }
    }
}

impl CorpusConfig {
    /// Explicit history location, or the code location with its file name
    /// prefixed by `history-`.
    #[must_use]
    pub fn effective_history_location(&self) -> Option<String> {
        self.history_location.clone().or_else(|| {
            self.code_location
                .as_deref()
                .map(derive_history_location)
        })
    }
}

/// `https://host/dir/code.json.gz?v=1` → `https://host/dir/history-code.json.gz?v=1`
#[must_use]
pub fn derive_history_location(code: &str) -> String {
    let (base, query) = match code.split_once('?') {
        Some((b, q)) => (b, Some(q)),
        None => (code, None),
    };
    let cut = base.rfind('/').map_or(0, |i| i + 1);
    let mut out = format!("{}history-{}", &base[..cut], &base[cut..]);
    if let Some(q) = query {
        out.push('?');
        out.push_str(q);
    }
    out
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineSection {
    /// Zero disables the capacity limit.
    #[serde(default = "default_max_records")]
    pub max_records: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watermark_path: Option<String>,
}

fn default_max_records() -> usize {
    50_000
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            max_records: default_max_records(),
            watermark_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    #[default]
    OpenAi,
    Mock,
}

impl EmbeddingProviderKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Mock => "mock",
        }
    }
}

impl fmt::Display for EmbeddingProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Additional OpenAI-compatible endpoint tried when the primary fails.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EmbeddingEndpoint {
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProviderKind,
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Only ever read from `REPOLENS_EMBEDDING_API_KEY`.
    #[serde(skip)]
    pub api_key: Option<Secret>,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_embedding_max_retries")]
    pub max_retries: u32,
    /// Vector length of the mock embedder.
    #[serde(default = "default_mock_dimensions")]
    pub dimensions: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallback: Vec<EmbeddingEndpoint>,
}

fn default_embedding_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}

fn default_embedding_timeout_secs() -> u64 {
    30
}

fn default_embedding_max_retries() -> u32 {
    3
}

fn default_mock_dimensions() -> usize {
    64
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::default(),
            base_url: default_embedding_base_url(),
            model: default_embedding_model(),
            api_key: None,
            timeout_secs: default_embedding_timeout_secs(),
            max_retries: default_embedding_max_retries(),
            dimensions: default_mock_dimensions(),
            fallback: Vec::new(),
        }
    }
}

/// String that never shows up in `Debug` or `Display` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}
