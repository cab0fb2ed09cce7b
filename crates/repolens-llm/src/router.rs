use std::time::Duration;

use crate::any::AnyEmbedder;
use crate::error::LlmError;
use crate::provider::EmbedProvider;

/// Ordered embedding fallback chain: backends are tried in sequence and the
/// first success wins. Every attempt shares the same timeout.
#[derive(Debug, Clone)]
pub struct FallbackEmbedder {
    embedders: Vec<AnyEmbedder>,
    attempt_timeout: Duration,
}

impl FallbackEmbedder {
    #[must_use]
    pub fn new(embedders: Vec<AnyEmbedder>, attempt_timeout: Duration) -> Self {
        Self {
            embedders,
            attempt_timeout,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.embedders.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.embedders.is_empty()
    }
}

impl EmbedProvider for FallbackEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        for e in &self.embedders {
            match tokio::time::timeout(self.attempt_timeout, e.embed(text)).await {
                Ok(Ok(v)) => return Ok(v),
                Ok(Err(err)) => {
                    tracing::warn!(provider = e.name(), error = %err, "embed fallback");
                }
                Err(_) => {
                    tracing::warn!(
                        provider = e.name(),
                        timeout_secs = self.attempt_timeout.as_secs(),
                        "embed timed out, falling back"
                    );
                }
            }
        }
        Err(LlmError::NoProviders)
    }

    fn name(&self) -> &'static str {
        "fallback"
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::mock::MockEmbedder;

    #[tokio::test]
    async fn first_success_wins() {
        let failing = MockEmbedder::new(2).failing_on("q");
        let ok = MockEmbedder::new(2).with_vector("q", vec![0.5, 0.5]);
        let chain = FallbackEmbedder::new(
            vec![AnyEmbedder::Mock(failing), AnyEmbedder::Mock(ok.clone())],
            Duration::from_secs(1),
        );
        assert_eq!(chain.embed("q").await.unwrap(), vec![0.5, 0.5]);
        assert_eq!(ok.call_count(), 1);
    }

    #[tokio::test]
    async fn stops_at_first_success() {
        let first = MockEmbedder::new(2);
        let second = MockEmbedder::new(2);
        let chain = FallbackEmbedder::new(
            vec![
                AnyEmbedder::Mock(first.clone()),
                AnyEmbedder::Mock(second.clone()),
            ],
            Duration::from_secs(1),
        );
        chain.embed("text").await.unwrap();
        assert_eq!(first.call_count(), 1);
        assert_eq!(second.call_count(), 0);
    }

    #[tokio::test]
    async fn slow_backend_times_out_and_falls_back() {
        let slow = MockEmbedder::new(2).with_delay(500);
        let fast = MockEmbedder::new(2).with_vector("t", vec![1.0, 0.0]);
        let chain = FallbackEmbedder::new(
            vec![AnyEmbedder::Mock(slow), AnyEmbedder::Mock(fast)],
            Duration::from_millis(20),
        );
        assert_eq!(chain.embed("t").await.unwrap(), vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn all_failing_is_no_providers() {
        let chain = FallbackEmbedder::new(
            vec![AnyEmbedder::Mock(MockEmbedder::new(2).failing_on("x"))],
            Duration::from_secs(1),
        );
        assert!(matches!(chain.embed("x").await, Err(LlmError::NoProviders)));

        let empty = FallbackEmbedder::new(vec![], Duration::from_secs(1));
        assert!(empty.is_empty());
        assert!(matches!(empty.embed("x").await, Err(LlmError::NoProviders)));
    }
}
