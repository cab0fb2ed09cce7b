//! Deterministic offline embedder for tests and local runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::LlmError;
use crate::provider::EmbedProvider;

#[derive(Debug, Clone)]
pub struct MockEmbedder {
    pub dimensions: usize,
    fixed: Arc<HashMap<String, Vec<f32>>>,
    fail_marker: Option<String>,
    calls: Arc<AtomicUsize>,
    /// Milliseconds to sleep before returning a vector.
    pub delay_ms: u64,
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(8)
    }
}

impl MockEmbedder {
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
            fixed: Arc::new(HashMap::new()),
            fail_marker: None,
            calls: Arc::new(AtomicUsize::new(0)),
            delay_ms: 0,
        }
    }

    /// Return `vector` verbatim whenever `text` is embedded.
    #[must_use]
    pub fn with_vector(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        Arc::make_mut(&mut self.fixed).insert(text.into(), vector);
        self
    }

    /// Fail every text containing `marker`.
    #[must_use]
    pub fn failing_on(mut self, marker: impl Into<String>) -> Self {
        self.fail_marker = Some(marker.into());
        self
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    fn hashed_vector(&self, text: &str) -> Vec<f32> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(text.as_bytes());
        let mut reader = hasher.finalize_xof();
        let mut out = Vec::with_capacity(self.dimensions);
        let mut buf = [0u8; 4];
        for _ in 0..self.dimensions {
            reader.fill(&mut buf);
            let raw = u32::from_le_bytes(buf);
            #[allow(clippy::cast_precision_loss)]
            let unit = raw as f32 / u32::MAX as f32;
            out.push(unit.mul_add(2.0, -1.0));
        }
        out
    }
}

impl EmbedProvider for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        if let Some(marker) = &self.fail_marker
            && text.contains(marker.as_str())
        {
            return Err(LlmError::Other(format!("mock embed failure for {marker}")));
        }
        if let Some(v) = self.fixed.get(text) {
            return Ok(v.clone());
        }
        Ok(self.hashed_vector(text))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
