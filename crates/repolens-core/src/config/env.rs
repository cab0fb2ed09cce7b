use super::{Config, Secret};

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_corpus();
        self.apply_env_overrides_build();
        self.apply_env_overrides_embedding();
    }

    fn apply_env_overrides_corpus(&mut self) {
        if let Ok(v) = std::env::var("REPOLENS_CODE_LOCATION") {
            self.corpus.code_location = Some(v);
        }
        if let Ok(v) = std::env::var("REPOLENS_HISTORY_LOCATION") {
            self.corpus.history_location = Some(v);
        }
        if let Ok(v) = std::env::var("REPOLENS_FALLBACK_PATH") {
            self.corpus.fallback_path = Some(v);
        }
        if let Ok(v) = std::env::var("REPOLENS_CACHE_TTL_SECS")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.corpus.cache_ttl_secs = secs;
        }
        if let Ok(v) = std::env::var("REPOLENS_FETCH_TIMEOUT_SECS")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.corpus.fetch_timeout_secs = secs;
        }
        if let Ok(v) = std::env::var("REPOLENS_ALLOW_EMPTY_ON_FAILURE")
            && let Ok(enabled) = v.parse::<bool>()
        {
            self.corpus.allow_empty_on_failure = enabled;
        }
        if let Ok(v) = std::env::var("REPOLENS_RETRIEVAL_DEFAULT_K")
            && let Ok(k) = v.parse::<usize>()
        {
            self.retrieval.default_k = k;
        }
        if let Ok(v) = std::env::var("REPOLENS_RETRIEVAL_SCORE_THRESHOLD")
            && let Ok(threshold) = v.parse::<f32>()
        {
            self.retrieval.score_threshold = threshold;
        }
    }

    fn apply_env_overrides_build(&mut self) {
        if let Ok(v) = std::env::var("REPOLENS_MAX_CHUNK_SIZE")
            && let Ok(n) = v.parse::<usize>()
        {
            self.chunking.max_chunk_size = n;
        }
        if let Ok(v) = std::env::var("REPOLENS_MIN_CHUNK_SIZE")
            && let Ok(n) = v.parse::<usize>()
        {
            self.chunking.min_chunk_size = n;
        }
        if let Ok(v) = std::env::var("REPOLENS_OVERLAP_PERCENT")
            && let Ok(ratio) = v.parse::<f64>()
        {
            self.chunking.overlap_percent = ratio;
        }
        if let Ok(v) = std::env::var("REPOLENS_RETENTION_STRATEGY") {
            if let Ok(strategy) = serde_json::from_value(serde_json::Value::String(v.clone())) {
                self.retention.strategy = strategy;
            } else {
                tracing::warn!("ignoring invalid REPOLENS_RETENTION_STRATEGY value: {v}");
            }
        }
        if let Ok(v) = std::env::var("REPOLENS_RETENTION_MAX_COUNT")
            && let Ok(n) = v.parse::<usize>()
        {
            self.retention.max_count = n;
        }
        if let Ok(v) = std::env::var("REPOLENS_RETENTION_MAX_AGE_DAYS")
            && let Ok(days) = v.parse::<u32>()
        {
            self.retention.max_age_days = days;
        }
        if let Ok(v) = std::env::var("REPOLENS_MAX_RECORDS")
            && let Ok(n) = v.parse::<usize>()
        {
            self.pipeline.max_records = n;
        }
        if let Ok(v) = std::env::var("REPOLENS_WATERMARK_PATH") {
            self.pipeline.watermark_path = Some(v);
        }
    }

    fn apply_env_overrides_embedding(&mut self) {
        if let Ok(v) = std::env::var("REPOLENS_EMBEDDING_PROVIDER") {
            if let Ok(kind) = serde_json::from_value(serde_json::Value::String(v.clone())) {
                self.embedding.provider = kind;
            } else {
                tracing::warn!("ignoring invalid REPOLENS_EMBEDDING_PROVIDER value: {v}");
            }
        }
        if let Ok(v) = std::env::var("REPOLENS_EMBEDDING_BASE_URL") {
            self.embedding.base_url = v;
        }
        if let Ok(v) = std::env::var("REPOLENS_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Ok(v) = std::env::var("REPOLENS_EMBEDDING_API_KEY")
            && !v.is_empty()
        {
            self.embedding.api_key = Some(Secret::new(v));
        }
        if let Ok(v) = std::env::var("REPOLENS_EMBEDDING_TIMEOUT_SECS")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.embedding.timeout_secs = secs;
        }
    }
}
