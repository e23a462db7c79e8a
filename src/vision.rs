//! Image captioning and caption-then-embed vectorization
//!
//! Image vectors are produced by captioning the image with a vision model
//! and embedding the caption with the shared text embedder. Because of this,
//! image and text collections live in the same embedding space, which is
//! what makes query-by-text image search work at all. Do not change this
//! silently.

use crate::config::RagConfig;
use crate::embedding::EmbeddingGenerator;
use crate::error::{LlmError, Result};
use crate::llm::{model_matches, user_message_with_images, LlmClient};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Default prompt for short captions
pub const DEFAULT_CAPTION_PROMPT: &str = "この画像について簡潔に説明してください。";

/// Prompt used before embedding: asks for a long, structured description so
/// the caption carries enough signal for retrieval
const EMBED_CAPTION_PROMPT: &str = "この画像について、以下の観点から詳しく説明してください:\n\
1. 何が写っているか（オブジェクト、人物、場所など）\n\
2. 色、形、テクスチャなどの視覚的特徴\n\
3. 画像の雰囲気や文脈\n\
4. テキストが含まれている場合はその内容\n\
簡潔かつ具体的に記述してください。";

const DEFAULT_CAPTION_MAX_TOKENS: u32 = 200;
const EMBED_CAPTION_MAX_TOKENS: u32 = 500;

/// Captions images with a vision model and embeds them via the text embedder
pub struct VisionCaptioner {
    client: Arc<dyn LlmClient>,
    embedder: Arc<EmbeddingGenerator>,
    model: String,
}

impl std::fmt::Debug for VisionCaptioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisionCaptioner").finish_non_exhaustive()
    }
}

impl VisionCaptioner {
    /// Create a captioner and verify the vision model is installed
    pub async fn new(
        config: &RagConfig,
        client: Arc<dyn LlmClient>,
        embedder: Arc<EmbeddingGenerator>,
    ) -> Result<Self> {
        let captioner = Self {
            client,
            embedder,
            model: config.ollama.vision_model.clone(),
        };
        captioner.verify_model().await?;
        info!(model = %captioner.model, "vision captioner ready");
        Ok(captioner)
    }

    /// Vision model name in use
    pub fn model(&self) -> &str {
        &self.model
    }

    async fn verify_model(&self) -> Result<()> {
        let installed = self.client.list_models().await?;
        if !model_matches(&installed, &self.model) {
            return Err(LlmError::ModelMissing {
                model: self.model.clone(),
            }
            .into());
        }
        Ok(())
    }

    /// Generate a caption for an image file
    pub async fn generate_caption(
        &self,
        image_path: &Path,
        prompt: Option<&str>,
        max_tokens: Option<u32>,
    ) -> Result<String> {
        let path = image_path.canonicalize().map_err(|_| {
            crate::error::IngestError::FileNotFound(image_path.display().to_string())
        })?;

        debug!(image = %path.display(), "generating caption");

        let message = user_message_with_images(
            prompt.unwrap_or(DEFAULT_CAPTION_PROMPT),
            vec![path.display().to_string()],
        );
        let response = self
            .client
            .chat(
                &self.model,
                &[message],
                Some(max_tokens.unwrap_or(DEFAULT_CAPTION_MAX_TOKENS)),
            )
            .await?;

        let caption = response.text.trim().to_string();
        if caption.is_empty() {
            return Err(LlmError::EmptyCaption {
                path: path.display().to_string(),
            }
            .into());
        }
        Ok(caption)
    }

    /// Vectorize an image: caption with the vision model, then embed the
    /// caption with the shared text embedder
    pub async fn embed_image(&self, image_path: &Path) -> Result<Vec<f32>> {
        let caption = self
            .generate_caption(
                image_path,
                Some(EMBED_CAPTION_PROMPT),
                Some(EMBED_CAPTION_MAX_TOKENS),
            )
            .await?;
        debug!(
            image = %image_path.display(),
            caption_len = caption.chars().count(),
            "captioned image for embedding"
        );
        self.embedder.embed_query(&caption).await
    }

    /// Vectorize a batch of images, failing on the first error
    pub async fn embed_images(&self, image_paths: &[std::path::PathBuf]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(image_paths.len());
        for (i, path) in image_paths.iter().enumerate() {
            embeddings.push(self.embed_image(path).await?);
            debug!(progress = i + 1, total = image_paths.len(), "embedded image");
        }
        Ok(embeddings)
    }
}
