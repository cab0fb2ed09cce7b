//! Application bootstrap: config resolution, loader/embedder/engine/pipeline construction.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use repolens_index::pipeline::PipelineConfig;
use repolens_index::{MergePipeline, RetrievalEngine, WatermarkStore};
use repolens_llm::any::AnyEmbedder;
use repolens_llm::mock::MockEmbedder;
use repolens_llm::openai::OpenAiEmbedder;
use repolens_llm::router::FallbackEmbedder;
use repolens_memory::clock::{Clock, SystemClock};
use repolens_memory::{CorpusLoader, CorpusLocation, LoaderConfig, RetentionManager};

use crate::config::{Config, EmbeddingConfig, EmbeddingProviderKind};

const DEFAULT_CONFIG_PATH: &str = "repolens.toml";

pub struct AppBuilder {
    config: Config,
    config_path: PathBuf,
    clock: Arc<dyn Clock>,
}

impl AppBuilder {
    /// Load and validate the config at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or fails validation.
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let config = Config::load(path)?;
        config.validate()?;
        Ok(Self::from_config(config, path.to_path_buf()))
    }

    #[must_use]
    pub fn from_config(config: Config, config_path: PathBuf) -> Self {
        Self {
            config,
            config_path,
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    fn loader_config(&self, location: CorpusLocation) -> LoaderConfig {
        let corpus = &self.config.corpus;
        LoaderConfig {
            location,
            fallback_path: corpus.fallback_path.as_ref().map(PathBuf::from),
            ttl: Duration::from_secs(corpus.cache_ttl_secs),
            fetch_timeout: Duration::from_secs(corpus.fetch_timeout_secs),
            allow_empty_on_failure: corpus.allow_empty_on_failure,
        }
    }

    pub fn build_code_loader(&self) -> anyhow::Result<Arc<CorpusLoader>> {
        let location = CorpusLocation::parse(self.config.corpus.code_location.as_deref());
        tracing::debug!(location = %location, "code corpus");
        let loader = CorpusLoader::new(self.loader_config(location), self.clock())
            .context("failed to build code corpus loader")?;
        Ok(Arc::new(loader))
    }

    pub fn build_history_loader(&self) -> anyhow::Result<Arc<CorpusLoader>> {
        let history = self.config.corpus.effective_history_location();
        let location = CorpusLocation::parse(history.as_deref());
        tracing::debug!(location = %location, "history corpus");
        let loader = CorpusLoader::new(self.loader_config(location), self.clock())
            .context("failed to build history corpus loader")?;
        Ok(Arc::new(loader))
    }

    pub fn build_embedder(&self) -> anyhow::Result<FallbackEmbedder> {
        create_embedder(&self.config.embedding)
    }

    pub fn build_engine(&self) -> anyhow::Result<RetrievalEngine<FallbackEmbedder>> {
        Ok(RetrievalEngine::new(
            self.build_code_loader()?,
            self.build_history_loader()?,
            Arc::new(self.build_embedder()?),
            self.config.retrieval,
        ))
    }

    pub fn build_pipeline(&self) -> anyhow::Result<MergePipeline<FallbackEmbedder>> {
        let max = self.config.pipeline.max_records;
        let config = PipelineConfig {
            chunker: self.config.chunking.clone(),
            max_records: (max > 0).then_some(max),
        };
        Ok(MergePipeline::new(
            Arc::new(self.build_embedder()?),
            self.clock(),
            config,
        ))
    }

    pub fn build_retention(&self) -> RetentionManager {
        RetentionManager::new(self.clock())
    }

    /// Watermark store named in `[pipeline]`, if any.
    pub fn open_watermarks(&self) -> anyhow::Result<Option<WatermarkStore>> {
        self.config
            .pipeline
            .watermark_path
            .as_deref()
            .map(|p| WatermarkStore::open(p).context("failed to open watermark store"))
            .transpose()
    }
}

/// Priority: CLI `--config` > `REPOLENS_CONFIG` env > `repolens.toml`.
pub fn resolve_config_path(cli: Option<&Path>) -> PathBuf {
    if let Some(path) = cli {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("REPOLENS_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from(DEFAULT_CONFIG_PATH)
}

/// Build the configured embedder followed by its fallback endpoints.
///
/// # Errors
///
/// Returns an error if an HTTP client cannot be constructed.
pub fn create_embedder(config: &EmbeddingConfig) -> anyhow::Result<FallbackEmbedder> {
    let timeout = Duration::from_secs(config.timeout_secs.max(1));
    let api_key = config.api_key.as_ref().map(|s| s.expose().to_owned());

    let mut chain = Vec::with_capacity(1 + config.fallback.len());
    chain.push(match config.provider {
        EmbeddingProviderKind::OpenAi => AnyEmbedder::OpenAi(
            OpenAiEmbedder::new(
                api_key.clone(),
                config.base_url.clone(),
                config.model.clone(),
                timeout,
            )
            .context("failed to build embedding client")?
            .with_max_retries(config.max_retries),
        ),
        EmbeddingProviderKind::Mock => AnyEmbedder::Mock(MockEmbedder::new(config.dimensions)),
    });
    for endpoint in &config.fallback {
        let embedder = OpenAiEmbedder::new(
            api_key.clone(),
            endpoint.base_url.clone(),
            endpoint.model.clone(),
            timeout,
        )
        .with_context(|| format!("failed to build fallback client for {}", endpoint.base_url))?
        .with_max_retries(config.max_retries);
        chain.push(AnyEmbedder::OpenAi(embedder));
    }

    tracing::debug!(
        provider = %config.provider,
        fallbacks = config.fallback.len(),
        "embedder chain built"
    );
    Ok(FallbackEmbedder::new(chain, timeout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingEndpoint;
    use repolens_llm::EmbedProvider;
    use repolens_memory::{CorpusSnapshot, RecordFilter};
    use repolens_index::RetrievalMode;
    use serial_test::serial;

    fn mock_config() -> Config {
        let mut config = Config::default();
        config.embedding.provider = EmbeddingProviderKind::Mock;
        config.embedding.dimensions = 4;
        config
    }

    #[test]
    #[serial]
    fn config_path_priority() {
        unsafe { std::env::remove_var("REPOLENS_CONFIG") };
        assert_eq!(resolve_config_path(None), PathBuf::from("repolens.toml"));
        unsafe { std::env::set_var("REPOLENS_CONFIG", "/etc/repolens.toml") };
        assert_eq!(
            resolve_config_path(None),
            PathBuf::from("/etc/repolens.toml")
        );
        assert_eq!(
            resolve_config_path(Some(Path::new("cli.toml"))),
            PathBuf::from("cli.toml")
        );
        unsafe { std::env::remove_var("REPOLENS_CONFIG") };
    }

    #[test]
    fn embedder_chain_includes_fallbacks() {
        let mut config = EmbeddingConfig::default();
        config.fallback.push(EmbeddingEndpoint {
            base_url: "http://localhost:9/v1".into(),
            model: "backup".into(),
        });
        let chain = create_embedder(&config).unwrap();
        assert_eq!(chain.len(), 2);
    }

    #[tokio::test]
    async fn mock_embedder_has_configured_dimensions() {
        let embedder = create_embedder(&mock_config().embedding).unwrap();
        let v = embedder.embed("hello").await.unwrap();
        assert_eq!(v.len(), 4);
    }

    #[test]
    fn invalid_config_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repolens.toml");
        std::fs::write(&path, "[chunking]\nmin_chunk_size = 9000\n").unwrap();
        assert!(AppBuilder::from_path(&path).is_err());
    }

    #[test]
    fn pipeline_capacity_zero_means_unlimited() {
        let mut config = mock_config();
        config.pipeline.max_records = 0;
        let app = AppBuilder::from_config(config, PathBuf::from("x.toml"));
        assert_eq!(app.build_pipeline().unwrap().config().max_records, None);

        let app = AppBuilder::from_config(mock_config(), PathBuf::from("x.toml"));
        assert_eq!(
            app.build_pipeline().unwrap().config().max_records,
            Some(50_000)
        );
    }

    #[tokio::test]
    async fn engine_reads_local_corpora() {
        let dir = tempfile::tempdir().unwrap();
        let code = dir.path().join("code.json");
        std::fs::write(
            &code,
            CorpusSnapshot::empty(chrono::Utc::now()).to_json_vec().unwrap(),
        )
        .unwrap();

        let mut config = mock_config();
        config.corpus.code_location = Some(code.display().to_string());
        let app = AppBuilder::from_config(config, PathBuf::from("x.toml"));

        let history = app.build_history_loader().unwrap();
        assert!(history.location().to_string().ends_with("history-code.json"));

        let engine = app.build_engine().unwrap();
        let results = engine
            .retrieve("anything", 3, RetrievalMode::All, &RecordFilter::default())
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn watermarks_only_when_configured() {
        let app = AppBuilder::from_config(mock_config(), PathBuf::from("x.toml"));
        assert!(app.open_watermarks().unwrap().is_none());

        let dir = tempfile::tempdir().unwrap();
        let mut config = mock_config();
        config.pipeline.watermark_path = Some(dir.path().join("m.json").display().to_string());
        let app = AppBuilder::from_config(config, PathBuf::from("x.toml"));
        assert!(app.open_watermarks().unwrap().is_some());
    }
}
