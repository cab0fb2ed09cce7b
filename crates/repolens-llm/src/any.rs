#[cfg(feature = "mock")]
use crate::mock::MockEmbedder;
use crate::openai::OpenAiEmbedder;
use crate::provider::{EmbedFuture, EmbedProvider};

/// Generates a match over all `AnyEmbedder` variants, binding the inner embedder
/// and evaluating the given expression for each arm.
macro_rules! delegate_embedder {
    ($self:expr, |$p:ident| $expr:expr) => {
        match $self {
            AnyEmbedder::OpenAi($p) => $expr,
            #[cfg(feature = "mock")]
            AnyEmbedder::Mock($p) => $expr,
        }
    };
}

/// Concrete embedding backend selected from configuration.
#[derive(Debug, Clone)]
pub enum AnyEmbedder {
    OpenAi(OpenAiEmbedder),
    #[cfg(feature = "mock")]
    Mock(MockEmbedder),
}

impl AnyEmbedder {
    /// Return a cloneable closure that calls `embed()` on this embedder.
    pub fn embed_fn(&self) -> impl Fn(&str) -> EmbedFuture + Send + Sync {
        let embedder = std::sync::Arc::new(self.clone());
        move |text: &str| -> EmbedFuture {
            let e = std::sync::Arc::clone(&embedder);
            let owned = text.to_owned();
            Box::pin(async move { e.embed(&owned).await })
        }
    }
}

impl EmbedProvider for AnyEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, crate::LlmError> {
        delegate_embedder!(self, |p| p.embed(text).await)
    }

    fn name(&self) -> &'static str {
        delegate_embedder!(self, |p| p.name())
    }
}
