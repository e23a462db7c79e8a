//! Multimodal RAG engine: fused text+image retrieval feeding a
//! vision-capable LLM

use crate::config::RagConfig;
use crate::embedding::EmbeddingGenerator;
use crate::engine::{collect_sources, Answer};
use crate::error::{LlmError, RagError, Result};
use crate::llm::{model_matches, user_message, user_message_with_images, LlmClient, Role};
use crate::models::{ChatHistory, ChatMessage, Metadata, ResultType, SearchResult};
use crate::store::VectorStore;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const DEFAULT_MAX_CHAT_HISTORY: usize = 10;

/// Question answering over both collections, forwarding retrieved and
/// user-supplied images to a vision-capable LLM
///
/// Like [`RagEngine`](crate::engine::RagEngine), one instance per chat
/// session: `chat_multimodal` mutates the history.
pub struct MultimodalRagEngine {
    store: Arc<dyn VectorStore>,
    embedder: Arc<EmbeddingGenerator>,
    llm: Arc<dyn LlmClient>,
    llm_model: String,
    max_tokens: u32,
    text_weight: f32,
    image_weight: f32,
    chat_history: ChatHistory,
}

impl std::fmt::Debug for MultimodalRagEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultimodalRagEngine").finish_non_exhaustive()
    }
}

impl MultimodalRagEngine {
    /// Create the engine and verify the multimodal model is installed
    pub async fn new(
        config: &RagConfig,
        store: Arc<dyn VectorStore>,
        embedder: Arc<EmbeddingGenerator>,
        llm: Arc<dyn LlmClient>,
        max_chat_history: Option<usize>,
    ) -> Result<Self> {
        let llm_model = config.ollama.multimodal_llm_model.clone();

        let installed = llm.list_models().await?;
        if !model_matches(&installed, &llm_model) {
            return Err(LlmError::ModelMissing { model: llm_model }.into());
        }

        info!(model = %llm_model, "multimodal RAG engine initialized");
        Ok(Self {
            store,
            embedder,
            llm,
            llm_model,
            max_tokens: config.ollama.max_tokens,
            text_weight: config.multimodal.text_weight,
            image_weight: config.multimodal.image_weight,
            chat_history: ChatHistory::new(Some(
                max_chat_history.unwrap_or(DEFAULT_MAX_CHAT_HISTORY),
            )),
        })
    }

    /// Search the images collection with a text query
    pub async fn search_images(&self, query: &str, k: usize) -> Result<Vec<SearchResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::QueryEmpty);
        }

        let query_embedding = self
            .embedder
            .embed_query(query)
            .await
            .map_err(RagError::retrieval)?;
        let results = self
            .store
            .search_images(&query_embedding, k, None)
            .await
            .map_err(RagError::retrieval)?;

        info!(hits = results.len(), "image search complete");
        Ok(results)
    }

    /// Fused search over both collections
    ///
    /// Weights default to the configured values and are applied literally.
    pub async fn search_multimodal(
        &self,
        query: &str,
        k: usize,
        text_weight: Option<f32>,
        image_weight: Option<f32>,
    ) -> Result<Vec<SearchResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::QueryEmpty);
        }

        let text_weight = text_weight.unwrap_or(self.text_weight);
        let image_weight = image_weight.unwrap_or(self.image_weight);

        let query_embedding = self
            .embedder
            .embed_query(query)
            .await
            .map_err(RagError::retrieval)?;
        self.store
            .search_multimodal(&query_embedding, k, text_weight, image_weight)
            .await
    }

    /// Answer a question using fused context plus optional user images
    pub async fn query_with_images(
        &self,
        query: &str,
        image_paths: Option<&[PathBuf]>,
        k: usize,
        chat_history: Option<&[ChatMessage]>,
        include_sources: bool,
    ) -> Result<Answer> {
        if query.trim().is_empty() {
            return Err(RagError::QuestionEmpty);
        }

        let hits = self.search_multimodal(query, k, None, None).await?;

        // Render context and collect the retrieved images still on disk
        let mut context_parts: Vec<String> = Vec::new();
        let mut context_images: Vec<String> = Vec::new();
        if hits.is_empty() {
            context_parts.push("関連する情報が見つかりませんでした。".to_string());
        } else {
            for (i, hit) in hits.iter().enumerate() {
                match hit.result_type {
                    ResultType::Text => {
                        context_parts.push(format!(
                            "[テキスト {}] {}\n{}\n",
                            i + 1,
                            hit.document_name,
                            hit.chunk.content
                        ));
                    }
                    ResultType::Image => {
                        context_parts.push(format!(
                            "[画像 {}] {}\n説明: {}\n",
                            i + 1,
                            hit.document_name,
                            hit.caption.as_deref().unwrap_or("N/A")
                        ));
                        if let Some(path) = &hit.image_path {
                            if path.exists() {
                                context_images.push(path.display().to_string());
                            } else {
                                warn!(image = %path.display(), "retrieved image no longer on disk");
                            }
                        }
                    }
                }
            }
        }
        let context_text = context_parts.join("\n");

        // User-supplied images that exist; missing paths are dropped
        let mut user_images: Vec<String> = Vec::new();
        if let Some(paths) = image_paths {
            for path in paths {
                if Path::new(path).exists() {
                    user_images.push(path.display().to_string());
                } else {
                    warn!(image = %path.display(), "user image not found");
                }
            }
        }

        let mut all_images = user_images;
        all_images.extend(context_images);

        let mut prompt_parts: Vec<String> = Vec::new();
        if let Some(history) = chat_history {
            if !history.is_empty() {
                prompt_parts.push("過去の会話:".to_string());
                for turn in history {
                    prompt_parts.push(format!("{}: {}", turn.role, turn.content));
                }
                prompt_parts.push(String::new());
            }
        }
        prompt_parts.push(format!("コンテキスト情報:\n{context_text}"));
        prompt_parts.push(format!("\n質問: {query}"));
        prompt_parts
            .push("\n上記のコンテキスト情報と画像に基づいて質問に答えてください。\n\n回答:".to_string());
        let prompt = prompt_parts.join("\n");

        debug!(
            prompt_len = prompt.chars().count(),
            images = all_images.len(),
            "assembled multimodal prompt"
        );

        let message = if all_images.is_empty() {
            user_message(prompt)
        } else {
            user_message_with_images(prompt, all_images.clone())
        };

        let response = self
            .llm
            .chat(&self.llm_model, &[message], Some(self.max_tokens))
            .await
            .map_err(RagError::generation)?;

        let answer = response.text.trim().to_string();
        if answer.is_empty() {
            return Err(RagError::generation(LlmError::InvalidResponse(
                "empty response from multimodal model".to_string(),
            )));
        }

        info!(
            context_count = hits.len(),
            images_used = all_images.len(),
            "multimodal answer generated"
        );
        Ok(Answer {
            answer,
            context_count: hits.len(),
            sources: include_sources.then(|| collect_sources(&hits, true)),
            history_length: None,
            images_used: Some(all_images.len()),
        })
    }

    /// Multimodal chat, retaining bounded history
    pub async fn chat_multimodal(
        &mut self,
        message: &str,
        image_paths: Option<&[PathBuf]>,
        k: usize,
        include_sources: bool,
    ) -> Result<Answer> {
        let mut turn_metadata = Metadata::new();
        if let Some(paths) = image_paths {
            let listed: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
            turn_metadata.insert("image_paths".to_string(), json!(listed));
        }
        self.chat_history
            .add_message(Role::User, message, turn_metadata);

        let prior: Vec<ChatMessage> =
            self.chat_history.messages[..self.chat_history.len() - 1].to_vec();
        let mut answer = self
            .query_with_images(message, image_paths, k, Some(&prior), include_sources)
            .await?;

        let mut assistant_metadata = Metadata::new();
        assistant_metadata.insert("context_count".to_string(), json!(answer.context_count));
        assistant_metadata.insert(
            "images_used".to_string(),
            json!(answer.images_used.unwrap_or(0)),
        );
        self.chat_history
            .add_message(Role::Assistant, answer.answer.clone(), assistant_metadata);

        answer.history_length = Some(self.chat_history.len());
        info!(history = self.chat_history.len(), "multimodal chat turn complete");
        Ok(answer)
    }

    /// Drop all chat turns
    pub fn clear_chat_history(&mut self) {
        self.chat_history.clear();
        info!("chat history cleared");
    }

    /// Current chat history
    pub fn chat_history(&self) -> &ChatHistory {
        &self.chat_history
    }

    /// Multimodal model name in use
    pub fn model(&self) -> &str {
        &self.llm_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{EmbeddingResponse, GenerationResponse, MockLlmClient};
    use crate::models::{Chunk, ImageDocument};
    use crate::store::EmbeddedVectorStore;
    use chrono::Utc;
    use tempfile::TempDir;

    const DIM: usize = 4;

    fn chunk(content: &str) -> Chunk {
        let mut metadata = Metadata::new();
        metadata.insert("document_name".to_string(), json!("python.txt"));
        metadata.insert("source".to_string(), json!("/tmp/python.txt"));
        metadata.insert("doc_type".to_string(), json!("txt"));
        Chunk::new(
            content.to_string(),
            "doc1_chunk_0000".to_string(),
            "doc1".to_string(),
            0,
            0,
            content.chars().count(),
            metadata,
        )
    }

    fn image(path: &Path, caption: &str) -> ImageDocument {
        let mut metadata = Metadata::new();
        metadata.insert("file_size_mb".to_string(), json!(0.1));
        metadata.insert(
            "absolute_path".to_string(),
            json!(path.display().to_string()),
        );
        metadata.insert("tags".to_string(), json!(["screen"]));
        ImageDocument {
            id: "img1".to_string(),
            file_path: path.to_path_buf(),
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            image_type: "png".to_string(),
            caption: caption.to_string(),
            metadata,
            created_at: Utc::now(),
            image_data: None,
        }
    }

    async fn seeded_store(image_path: &Path) -> Arc<dyn VectorStore> {
        let store = EmbeddedVectorStore::in_memory(DIM);
        store.init().await.unwrap();
        store
            .upsert_chunks(
                &[chunk("Python is a programming language.")],
                &[vec![1.0, 0.0, 0.0, 0.0]],
            )
            .await
            .unwrap();
        store
            .upsert_images(
                &[image(image_path, "Python code on screen")],
                &[vec![0.9, 0.1, 0.0, 0.0]],
            )
            .await
            .unwrap();
        Arc::new(store)
    }

    fn mock_embed(mock: &mut MockLlmClient) {
        mock.expect_embed().returning(|model, _| {
            Ok(EmbeddingResponse {
                embedding: vec![1.0, 0.0, 0.0, 0.0],
                model: model.to_string(),
            })
        });
    }

    fn mock_models(mock: &mut MockLlmClient, models: Vec<&str>) {
        let owned: Vec<String> = models.into_iter().map(String::from).collect();
        mock.expect_list_models()
            .returning(move || Ok(owned.clone()));
    }

    fn generation(text: &str) -> GenerationResponse {
        GenerationResponse {
            text: text.to_string(),
            tokens_used: None,
            model: "gemma3".to_string(),
            finish_reason: None,
        }
    }

    async fn engine_with(mock: MockLlmClient, store: Arc<dyn VectorStore>) -> MultimodalRagEngine {
        let config = RagConfig::default();
        let client: Arc<dyn LlmClient> = Arc::new(mock);
        let embedder = Arc::new(EmbeddingGenerator::new(&config, Arc::clone(&client)));
        MultimodalRagEngine::new(&config, store, embedder, client, None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_missing_multimodal_model_rejected() {
        let mut mock = MockLlmClient::new();
        mock_models(&mut mock, vec!["gpt-oss"]);

        let config = RagConfig::default();
        let client: Arc<dyn LlmClient> = Arc::new(mock);
        let embedder = Arc::new(EmbeddingGenerator::new(&config, Arc::clone(&client)));
        let store: Arc<dyn VectorStore> = {
            let s = EmbeddedVectorStore::in_memory(DIM);
            s.init().await.unwrap();
            Arc::new(s)
        };

        let err = MultimodalRagEngine::new(&config, store, embedder, client, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "VisionModelMissing");
    }

    #[tokio::test]
    async fn test_query_renders_both_modalities_and_forwards_images() {
        let dir = TempDir::new().unwrap();
        let image_path = dir.path().join("code.png");
        std::fs::write(&image_path, b"fake").unwrap();

        let mut mock = MockLlmClient::new();
        mock_models(&mut mock, vec!["gemma3:latest"]);
        mock_embed(&mut mock);
        let expected_image = image_path.display().to_string();
        mock.expect_chat()
            .withf(move |model, messages, _| {
                let prompt = &messages[0].content;
                model == "gemma3"
                    && prompt.contains("[テキスト 1] python.txt")
                    && prompt.contains("[画像 2] code.png")
                    && prompt.contains("説明: Python code on screen")
                    && messages[0]
                        .images
                        .as_ref()
                        .is_some_and(|imgs| imgs == &vec![expected_image.clone()])
            })
            .times(1)
            .returning(|_, _, _| Ok(generation("It shows Python code.")));

        let store = seeded_store(&image_path).await;
        let engine = engine_with(mock, store).await;

        let answer = engine
            .query_with_images("Python", None, 5, None, true)
            .await
            .unwrap();
        assert_eq!(answer.answer, "It shows Python code.");
        assert_eq!(answer.context_count, 2);
        assert_eq!(answer.images_used, Some(1));

        let sources = answer.sources.unwrap();
        assert_eq!(sources.len(), 2);
        assert!(sources.iter().any(|s| s.result_type == Some(ResultType::Image)));
    }

    #[tokio::test]
    async fn test_missing_image_paths_are_dropped() {
        let dir = TempDir::new().unwrap();
        let stored_image = dir.path().join("gone.png");
        // stored image never written to disk, user image half-present
        let user_image = dir.path().join("user.png");
        std::fs::write(&user_image, b"fake").unwrap();

        let mut mock = MockLlmClient::new();
        mock_models(&mut mock, vec!["gemma3"]);
        mock_embed(&mut mock);
        let expected = user_image.display().to_string();
        mock.expect_chat()
            .withf(move |_, messages, _| {
                messages[0]
                    .images
                    .as_ref()
                    .is_some_and(|imgs| imgs == &vec![expected.clone()])
            })
            .times(1)
            .returning(|_, _, _| Ok(generation("answer")));

        let store = seeded_store(&stored_image).await;
        let engine = engine_with(mock, store).await;

        let missing = dir.path().join("not_there.png");
        let answer = engine
            .query_with_images(
                "Python",
                Some(&[user_image.clone(), missing]),
                5,
                None,
                false,
            )
            .await
            .unwrap();
        // Only the existing user image was forwarded
        assert_eq!(answer.images_used, Some(1));
    }

    #[tokio::test]
    async fn test_chat_multimodal_tracks_history() {
        let dir = TempDir::new().unwrap();
        let image_path = dir.path().join("code.png");
        std::fs::write(&image_path, b"fake").unwrap();

        let mut mock = MockLlmClient::new();
        mock_models(&mut mock, vec!["gemma3"]);
        mock_embed(&mut mock);
        mock.expect_chat()
            .times(2)
            .returning(|_, _, _| Ok(generation("reply")));

        let store = seeded_store(&image_path).await;
        let mut engine = engine_with(mock, store).await;

        let first = engine
            .chat_multimodal("what is this", None, 3, false)
            .await
            .unwrap();
        assert_eq!(first.history_length, Some(2));

        let second = engine
            .chat_multimodal("tell me more", None, 3, false)
            .await
            .unwrap();
        assert_eq!(second.history_length, Some(4));

        let messages = &engine.chat_history().messages;
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);

        engine.clear_chat_history();
        assert!(engine.chat_history().is_empty());
    }

    #[tokio::test]
    async fn test_empty_question_rejected() {
        let mut mock = MockLlmClient::new();
        mock_models(&mut mock, vec!["gemma3"]);
        let store: Arc<dyn VectorStore> = {
            let s = EmbeddedVectorStore::in_memory(DIM);
            s.init().await.unwrap();
            Arc::new(s)
        };
        let engine = engine_with(mock, store).await;
        let err = engine
            .query_with_images("", None, 3, None, false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "QuestionEmpty");
    }
}
