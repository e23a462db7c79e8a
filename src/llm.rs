//! Ollama model backend integration
//!
//! Hand-rolled HTTP client for the local Ollama server: chat (optionally
//! with attached images), embeddings, and installed-model listing.

use crate::config::OllamaConfig;
use crate::error::{LlmError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info};

/// Message role in a conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A message in a conversation
///
/// `images` entries are absolute file paths the server can read, or
/// base64-encoded bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
}

/// Response from text generation
#[derive(Debug, Clone)]
pub struct GenerationResponse {
    pub text: String,
    pub tokens_used: Option<u32>,
    pub model: String,
    pub finish_reason: Option<String>,
}

/// Embedding response
#[derive(Debug, Clone)]
pub struct EmbeddingResponse {
    pub embedding: Vec<f32>,
    pub model: String,
}

/// Trait for model backend operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Run a chat completion; `max_tokens` caps the response length
    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        max_tokens: Option<u32>,
    ) -> Result<GenerationResponse>;

    /// Generate an embedding vector for one text
    async fn embed(&self, model: &str, text: &str) -> Result<EmbeddingResponse>;

    /// List installed models
    async fn list_models(&self) -> Result<Vec<String>>;

    /// Check if a model is installed (tagged or base name)
    async fn is_model_available(&self, model: &str) -> Result<bool>;
}

/// Check a wanted model name against an installed-model list, matching the
/// full tagged name or the base name before `:`
pub fn model_matches(installed: &[String], wanted: &str) -> bool {
    let wanted_base = wanted.split(':').next().unwrap_or(wanted);
    installed.iter().any(|name| {
        let base = name.split(':').next().unwrap_or(name);
        name == wanted || base == wanted || base == wanted_base
    })
}

/// Ollama client implementation
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    timeout_secs: u64,
}

/// Ollama API request for chat
#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    options: OllamaOptions,
}

/// Ollama API options
#[derive(Debug, Serialize)]
struct OllamaOptions {
    num_predict: u32,
}

/// Ollama API response for chat
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    model: String,
    message: Message,
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    eval_count: Option<u32>,
}

/// Ollama API request for embeddings
#[derive(Debug, Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

/// Ollama API response for embeddings
#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embedding: Vec<f32>,
}

/// Ollama models list response
#[derive(Debug, Deserialize)]
struct OllamaModelsResponse {
    models: Vec<OllamaModelInfo>,
}

#[derive(Debug, Deserialize)]
struct OllamaModelInfo {
    #[serde(alias = "model")]
    name: String,
}

impl OllamaClient {
    /// Create a new Ollama client
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Unavailable {
                url: config.base_url.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            timeout_secs: config.timeout_secs,
        })
    }

    /// Base URL this client talks to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get the URL for an API endpoint
    fn api_url(&self, endpoint: &str) -> String {
        format!("{}/api/{}", self.base_url.trim_end_matches('/'), endpoint)
    }

    fn unavailable(&self, e: reqwest::Error) -> LlmError {
        LlmError::Unavailable {
            url: self.base_url.clone(),
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        max_tokens: Option<u32>,
    ) -> Result<GenerationResponse> {
        debug!(model, count = messages.len(), "sending chat request");

        let request = OllamaChatRequest {
            model,
            messages,
            stream: false,
            options: OllamaOptions {
                num_predict: max_tokens.unwrap_or(4096),
            },
        };

        let url = self.api_url("chat");
        let response = timeout(
            Duration::from_secs(self.timeout_secs),
            self.client.post(&url).json(&request).send(),
        )
        .await
        .map_err(|_| LlmError::Timeout)?
        .map_err(|e| self.unavailable(e))?;

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            error!("Ollama chat API error: {error_text}");
            return Err(LlmError::GenerationFailed(error_text).into());
        }

        let ollama_response: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        if !ollama_response.done {
            return Err(LlmError::InvalidResponse("incomplete response".to_string()).into());
        }

        debug!(
            tokens = ollama_response.eval_count.unwrap_or(0),
            "chat response received"
        );

        Ok(GenerationResponse {
            text: ollama_response.message.content,
            tokens_used: ollama_response.eval_count,
            model: ollama_response.model,
            finish_reason: ollama_response.done_reason,
        })
    }

    async fn embed(&self, model: &str, text: &str) -> Result<EmbeddingResponse> {
        debug!(model, len = text.len(), "requesting embedding");

        let request = OllamaEmbedRequest {
            model,
            prompt: text,
        };

        let url = self.api_url("embeddings");
        let response = timeout(
            Duration::from_secs(self.timeout_secs),
            self.client.post(&url).json(&request).send(),
        )
        .await
        .map_err(|_| LlmError::Timeout)?
        .map_err(|e| self.unavailable(e))?;

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            error!("Ollama embedding API error: {error_text}");
            return Err(LlmError::EmbeddingFailed(error_text).into());
        }

        let ollama_response: OllamaEmbedResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        if ollama_response.embedding.is_empty() {
            return Err(
                LlmError::EmbeddingFailed(format!("model '{model}' returned no vector")).into(),
            );
        }

        debug!(
            dimension = ollama_response.embedding.len(),
            "embedding received"
        );

        Ok(EmbeddingResponse {
            embedding: ollama_response.embedding,
            model: model.to_string(),
        })
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        debug!("listing installed models");

        let url = self.api_url("tags");
        let response = timeout(
            Duration::from_secs(self.timeout_secs),
            self.client.get(&url).send(),
        )
        .await
        .map_err(|_| LlmError::Timeout)?
        .map_err(|e| self.unavailable(e))?;

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(LlmError::InvalidResponse(error_text).into());
        }

        let models_response: OllamaModelsResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let models: Vec<String> = models_response.models.into_iter().map(|m| m.name).collect();
        info!(count = models.len(), "installed models listed");
        Ok(models)
    }

    async fn is_model_available(&self, model: &str) -> Result<bool> {
        let models = self.list_models().await?;
        Ok(model_matches(&models, model))
    }
}

/// Helper function to create a system message
pub fn system_message(content: impl Into<String>) -> Message {
    Message {
        role: Role::System,
        content: content.into(),
        images: None,
    }
}

/// Helper function to create a user message
pub fn user_message(content: impl Into<String>) -> Message {
    Message {
        role: Role::User,
        content: content.into(),
        images: None,
    }
}

/// Helper function to create a user message with attached images
pub fn user_message_with_images(content: impl Into<String>, images: Vec<String>) -> Message {
    Message {
        role: Role::User,
        content: content.into(),
        images: Some(images),
    }
}

/// Helper function to create an assistant message
pub fn assistant_message(content: impl Into<String>) -> Message {
    Message {
        role: Role::Assistant,
        content: content.into(),
        images: None,
    }
}
