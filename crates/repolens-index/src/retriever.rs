//! Dual-corpus retrieval: code snapshot, history snapshot, or a blend of both.

use std::fmt::Write;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::record_display_header;
use crate::error::{IndexError, Result};
use repolens_llm::provider::EmbedProvider;
use repolens_memory::types::{RecordAttributes, RecordKind};
use repolens_memory::{CorpusLoader, RecordFilter, ScoredRecord, SimilarityIndex};

/// Which corpora a query is answered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    Code,
    History,
    /// Half the budget from each corpus, merged by score.
    Mixed,
    /// Full budget from each corpus, merged by score.
    All,
}

impl RetrievalMode {
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::History => "history",
            Self::Mixed => "mixed",
            Self::All => "all",
        }
    }

    /// Mode implied by a question category. Unknown categories blend both corpora.
    #[must_use]
    pub fn for_category(category: &str) -> Self {
        match category.trim().to_ascii_lowercase().as_str() {
            "code" | "implementation" | "architecture" | "debugging" | "bug" => Self::Code,
            "history" | "followup" | "previous" => Self::History,
            _ => Self::Mixed,
        }
    }
}

impl std::fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for RetrievalMode {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "code" => Ok(Self::Code),
            "history" => Ok(Self::History),
            "mixed" => Ok(Self::Mixed),
            "all" => Ok(Self::All),
            other => Err(IndexError::Other(format!(
                "unknown retrieval mode: {other} (expected code, history, mixed or all)"
            ))),
        }
    }
}

/// Corpus a result was drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Corpus {
    Code,
    History,
}

/// One retrieved record with its similarity to the query.
#[derive(Debug, Clone, Serialize)]
pub struct RankedResult {
    pub id: String,
    pub text: String,
    pub kind: RecordKind,
    pub attributes: RecordAttributes,
    pub score: f32,
    pub corpus: Corpus,
}

impl RankedResult {
    fn from_hit(hit: ScoredRecord<'_>, corpus: Corpus) -> Self {
        Self {
            id: hit.record.id.clone(),
            text: hit.record.text.clone(),
            kind: hit.record.kind(),
            attributes: hit.record.attributes.clone(),
            score: hit.score,
            corpus,
        }
    }
}

/// Retrieval configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_k: usize,
    /// Minimum cosine similarity to accept. Zero or below disables the floor.
    pub score_threshold: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: 8,
            score_threshold: 0.0,
        }
    }
}

impl RetrievalConfig {
    fn floor(&self) -> f32 {
        if self.score_threshold > 0.0 {
            self.score_threshold
        } else {
            f32::MIN
        }
    }
}

/// Answers queries against the code and history corpora.
pub struct RetrievalEngine<P: EmbedProvider> {
    code: Arc<CorpusLoader>,
    history: Arc<CorpusLoader>,
    provider: Arc<P>,
    config: RetrievalConfig,
}

impl<P: EmbedProvider> RetrievalEngine<P> {
    #[must_use]
    pub fn new(
        code: Arc<CorpusLoader>,
        history: Arc<CorpusLoader>,
        provider: Arc<P>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            code,
            history,
            provider,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Embed `query` and retrieve the top `k` records.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding, corpus loading, or search fails.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        mode: RetrievalMode,
        filter: &RecordFilter,
    ) -> Result<Vec<RankedResult>> {
        let vector = self.provider.embed(query).await?;
        self.retrieve_vector(&vector, k, mode, filter).await
    }

    /// Retrieve with the mode implied by `category`, unless `mode` overrides it.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding, corpus loading, or search fails.
    pub async fn retrieve_for_category(
        &self,
        query: &str,
        k: usize,
        category: &str,
        mode: Option<RetrievalMode>,
        filter: &RecordFilter,
    ) -> Result<Vec<RankedResult>> {
        let mode = mode.unwrap_or_else(|| RetrievalMode::for_category(category));
        tracing::debug!(category, mode = %mode, "retrieval mode selected");
        self.retrieve(query, k, mode, filter).await
    }

    /// Retrieve with an already computed query vector.
    ///
    /// # Errors
    ///
    /// Returns an error if corpus loading fails or the vector dimension does
    /// not match a corpus.
    pub async fn retrieve_vector(
        &self,
        query: &[f32],
        k: usize,
        mode: RetrievalMode,
        filter: &RecordFilter,
    ) -> Result<Vec<RankedResult>> {
        let (code_k, history_k) = match mode {
            RetrievalMode::Code => (k, 0),
            RetrievalMode::History => (0, k),
            RetrievalMode::Mixed => {
                let code_k = k.div_ceil(2);
                (code_k, k - code_k)
            }
            RetrievalMode::All => (k, k),
        };

        let (code, history) = tokio::join!(
            self.search(Corpus::Code, query, code_k, filter),
            self.search(Corpus::History, query, history_k, filter),
        );
        let results = merge_by_score(code?, history?, k);
        tracing::info!(mode = %mode, k, returned = results.len(), "retrieval complete");
        Ok(results)
    }

    async fn search(
        &self,
        corpus: Corpus,
        query: &[f32],
        k: usize,
        filter: &RecordFilter,
    ) -> Result<Vec<RankedResult>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let loader = match corpus {
            Corpus::Code => &self.code,
            Corpus::History => &self.history,
        };
        let snapshot = loader.load().await?;
        let index = SimilarityIndex::new(snapshot);
        let hits = index.search(query, k, filter, self.config.floor())?;
        Ok(hits
            .into_iter()
            .map(|hit| RankedResult::from_hit(hit, corpus))
            .collect())
    }
}

/// Concatenate code then history, stable-sort by descending score, keep `k`.
fn merge_by_score(
    mut code: Vec<RankedResult>,
    history: Vec<RankedResult>,
    k: usize,
) -> Vec<RankedResult> {
    code.extend(history);
    code.sort_by(|a, b| b.score.total_cmp(&a.score));
    code.truncate(k);
    code
}

/// Format retrieved records as XML for the answer generator.
#[must_use]
pub fn format_as_context(results: &[RankedResult]) -> String {
    if results.is_empty() {
        return String::new();
    }

    let mut out = String::from("<repository_context>\n");

    for result in results {
        let _ = writeln!(
            out,
            "  <record id=\"{}\" kind=\"{}\" source=\"{}\" score=\"{:.2}\">",
            result.id,
            result.kind,
            record_display_header(&result.attributes),
            result.score,
        );
        out.push_str(&result.text);
        out.push_str("\n  </record>\n");
    }

    out.push_str("</repository_context>");
    out
}
