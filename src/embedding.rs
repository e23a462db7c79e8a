//! Text embedding generation over the Ollama backend

use crate::config::RagConfig;
use crate::error::{LlmError, Result};
use crate::llm::LlmClient;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

/// Generates fixed-dimension embedding vectors for queries and passages
///
/// All vectors produced by one instance have identical length; the
/// dimension is discovered once by probing the model with a sentinel text.
pub struct EmbeddingGenerator {
    client: Arc<dyn LlmClient>,
    model: String,
    dimension: OnceCell<usize>,
}

impl EmbeddingGenerator {
    pub fn new(config: &RagConfig, client: Arc<dyn LlmClient>) -> Self {
        Self {
            client,
            model: config.ollama.embedding_model.clone(),
            dimension: OnceCell::new(),
        }
    }

    /// Model name in use
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Embed a search query
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(LlmError::EmptyEmbeddingInput.into());
        }
        let response = self.client.embed(&self.model, text).await?;
        Ok(response.embedding)
    }

    /// Embed a batch of passages
    ///
    /// The whole batch fails if any input is empty.
    pub async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() || texts.iter().any(|t| t.trim().is_empty()) {
            return Err(LlmError::EmptyEmbeddingInput.into());
        }

        let mut embeddings = Vec::with_capacity(texts.len());
        for (i, text) in texts.iter().enumerate() {
            let response = self.client.embed(&self.model, text).await?;
            embeddings.push(response.embedding);
            debug!(progress = i + 1, total = texts.len(), "embedded passage");
        }
        Ok(embeddings)
    }

    /// Embedding dimension, probed once with a sentinel text and cached
    pub async fn dimension(&self) -> Result<usize> {
        self.dimension
            .get_or_try_init(|| async {
                let probe = self.embed_query("dimension probe").await?;
                debug!(dimension = probe.len(), "discovered embedding dimension");
                Ok(probe.len())
            })
            .await
            .copied()
    }
}
