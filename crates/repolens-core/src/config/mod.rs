mod env;
mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use std::path::Path;

use anyhow::{Context, bail};

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to sensible defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Reject settings the chunker or loader cannot work with.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid value.
    pub fn validate(&self) -> anyhow::Result<()> {
        let chunking = &self.chunking;
        if chunking.max_chunk_size == 0 {
            bail!("chunking.max_chunk_size must be greater than 0");
        }
        if chunking.min_chunk_size > chunking.max_chunk_size {
            bail!(
                "chunking.min_chunk_size ({}) must not exceed chunking.max_chunk_size ({})",
                chunking.min_chunk_size,
                chunking.max_chunk_size
            );
        }
        if !(0.0..=0.5).contains(&chunking.overlap_percent) {
            bail!(
                "chunking.overlap_percent must be within [0, 0.5], got {}",
                chunking.overlap_percent
            );
        }
        if self.corpus.fetch_timeout_secs == 0 {
            bail!("corpus.fetch_timeout_secs must be greater than 0");
        }
        if self.retrieval.score_threshold > 1.0 {
            bail!(
                "retrieval.score_threshold must be at most 1.0, got {}",
                self.retrieval.score_threshold
            );
        }
        Ok(())
    }
}
