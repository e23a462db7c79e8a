//! Configuration management for the RAG service
//!
//! Settings come from process environment variables, optionally overlaid on a
//! `KEY=value` file. The loaded [`RagConfig`] is an immutable value handed to
//! each component constructor; long-running services that need live reload
//! swap the whole value atomically through [`ConfigHandle`].

use crate::error::{RagError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

const VALID_LOG_LEVELS: [&str; 5] = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"];
const MIN_CHUNK_SIZE: usize = 100;
const MAX_CHUNK_SIZE: usize = 10_000;

/// Main configuration for the RAG service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    /// Ollama backend configuration
    pub ollama: OllamaConfig,

    /// Vector store configuration
    pub store: StoreConfig,

    /// Text chunking configuration
    pub chunking: ChunkingConfig,

    /// Image ingestion configuration
    pub image: ImageConfig,

    /// Multimodal search configuration
    pub multimodal: MultimodalConfig,

    /// Log level (DEBUG, INFO, WARNING, ERROR, CRITICAL)
    pub log_level: String,
}

/// Ollama backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Ollama server URL
    pub base_url: String,

    /// Default model for text generation
    pub llm_model: String,

    /// Model for text embeddings
    pub embedding_model: String,

    /// Vision model used for image captioning
    pub vision_model: String,

    /// Chat model that accepts images
    pub multimodal_llm_model: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Maximum tokens for generation
    pub max_tokens: u32,
}

/// Vector store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend selector ("chroma"/"embedded" for the embedded store, "qdrant" for remote)
    pub backend: String,

    /// Data directory for the embedded backend
    pub persist_directory: PathBuf,

    /// Remote backend endpoint
    pub qdrant: QdrantConfig,
}

/// Remote Qdrant endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QdrantConfig {
    pub host: String,
    pub port: u16,
    pub api_key: Option<String>,
}

/// Text chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Target characters per chunk
    pub chunk_size: usize,

    /// Characters carried over between consecutive chunks
    pub chunk_overlap: usize,
}

/// Image ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Reject image files larger than this
    pub max_image_size_mb: f64,

    /// Generate captions with the vision model when none is supplied
    pub caption_auto_generate: bool,
}

/// Multimodal search weighting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultimodalConfig {
    /// Weight applied to text hits
    pub text_weight: f32,

    /// Weight applied to image hits
    pub image_weight: f32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            llm_model: "gpt-oss".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            vision_model: "llava".to_string(),
            multimodal_llm_model: "gemma3".to_string(),
            timeout_secs: 120,
            max_tokens: 4096,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: "chroma".to_string(),
            persist_directory: PathBuf::from("./chroma_db"),
            qdrant: QdrantConfig::default(),
        }
    }
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6333,
            api_key: None,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            max_image_size_mb: 10.0,
            caption_auto_generate: true,
        }
    }
}

impl Default for MultimodalConfig {
    fn default() -> Self {
        Self {
            text_weight: 0.5,
            image_weight: 0.5,
        }
    }
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            ollama: OllamaConfig::default(),
            store: StoreConfig::default(),
            chunking: ChunkingConfig::default(),
            image: ImageConfig::default(),
            multimodal: MultimodalConfig::default(),
            log_level: "INFO".to_string(),
        }
    }
}

impl RagConfig {
    /// Load configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::load(&HashMap::new())
    }

    /// Load configuration from a `KEY=value` file overlaid by process env
    ///
    /// Process environment variables take precedence over file entries.
    pub fn from_env_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            RagError::Config(format!(
                "cannot read config file '{}': {e}",
                path.as_ref().display()
            ))
        })?;
        Self::load(&parse_env_file(&content))
    }

    /// Build and validate a config, resolving each key against the process
    /// environment first, then `file_values`, then the default.
    fn load(file_values: &HashMap<String, String>) -> Result<Self> {
        let get = |key: &str| -> Option<String> {
            std::env::var(key)
                .ok()
                .or_else(|| file_values.get(key).cloned())
        };
        let defaults = RagConfig::default();

        let config = Self {
            ollama: OllamaConfig {
                base_url: get("OLLAMA_BASE_URL").unwrap_or(defaults.ollama.base_url),
                llm_model: get("OLLAMA_LLM_MODEL").unwrap_or(defaults.ollama.llm_model),
                embedding_model: get("OLLAMA_EMBEDDING_MODEL")
                    .unwrap_or(defaults.ollama.embedding_model),
                vision_model: get("OLLAMA_VISION_MODEL").unwrap_or(defaults.ollama.vision_model),
                multimodal_llm_model: get("OLLAMA_MULTIMODAL_LLM_MODEL")
                    .unwrap_or(defaults.ollama.multimodal_llm_model),
                timeout_secs: parse(get("OLLAMA_TIMEOUT_SECS"), defaults.ollama.timeout_secs)?,
                max_tokens: parse(get("OLLAMA_MAX_TOKENS"), defaults.ollama.max_tokens)?,
            },
            store: StoreConfig {
                backend: get("VECTOR_DB_TYPE")
                    .map(|v| v.to_lowercase())
                    .unwrap_or(defaults.store.backend),
                persist_directory: get("CHROMA_PERSIST_DIRECTORY")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.store.persist_directory),
                qdrant: QdrantConfig {
                    host: get("QDRANT_HOST").unwrap_or(defaults.store.qdrant.host),
                    port: parse(get("QDRANT_PORT"), defaults.store.qdrant.port)?,
                    api_key: get("QDRANT_API_KEY").filter(|k| !k.is_empty()),
                },
            },
            chunking: ChunkingConfig {
                chunk_size: parse(get("CHUNK_SIZE"), defaults.chunking.chunk_size)?,
                chunk_overlap: parse(get("CHUNK_OVERLAP"), defaults.chunking.chunk_overlap)?,
            },
            image: ImageConfig {
                max_image_size_mb: parse(
                    get("MAX_IMAGE_SIZE_MB"),
                    defaults.image.max_image_size_mb,
                )?,
                caption_auto_generate: parse_bool(
                    get("IMAGE_CAPTION_AUTO_GENERATE"),
                    defaults.image.caption_auto_generate,
                ),
            },
            multimodal: MultimodalConfig {
                text_weight: parse(
                    get("MULTIMODAL_SEARCH_TEXT_WEIGHT"),
                    defaults.multimodal.text_weight,
                )?,
                image_weight: parse(
                    get("MULTIMODAL_SEARCH_IMAGE_WEIGHT"),
                    defaults.multimodal.image_weight,
                )?,
            },
            log_level: get("LOG_LEVEL")
                .map(|l| l.to_uppercase())
                .unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// The process must not begin serving when this fails.
    pub fn validate(&self) -> Result<()> {
        if !self.ollama.base_url.starts_with("http://") && !self.ollama.base_url.starts_with("https://")
        {
            return Err(RagError::Config(format!(
                "OLLAMA_BASE_URL must start with http:// or https://, got: {}",
                self.ollama.base_url
            )));
        }

        if self.ollama.llm_model.trim().is_empty() {
            return Err(RagError::Config("OLLAMA_LLM_MODEL cannot be empty".into()));
        }
        if self.ollama.embedding_model.trim().is_empty() {
            return Err(RagError::Config(
                "OLLAMA_EMBEDDING_MODEL cannot be empty".into(),
            ));
        }

        if !matches!(self.store.backend.as_str(), "chroma" | "embedded" | "qdrant") {
            return Err(RagError::Config(format!(
                "VECTOR_DB_TYPE must be one of chroma, embedded, qdrant, got: {}",
                self.store.backend
            )));
        }

        if self.chunking.chunk_size < MIN_CHUNK_SIZE || self.chunking.chunk_size > MAX_CHUNK_SIZE {
            return Err(RagError::Config(format!(
                "CHUNK_SIZE must be between {MIN_CHUNK_SIZE} and {MAX_CHUNK_SIZE}, got: {}",
                self.chunking.chunk_size
            )));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(RagError::Config(format!(
                "CHUNK_OVERLAP ({}) must be less than CHUNK_SIZE ({})",
                self.chunking.chunk_overlap, self.chunking.chunk_size
            )));
        }

        if self.image.max_image_size_mb <= 0.0 {
            return Err(RagError::Config(format!(
                "MAX_IMAGE_SIZE_MB must be greater than 0, got: {}",
                self.image.max_image_size_mb
            )));
        }

        if !(0.0..=1.0).contains(&self.multimodal.text_weight) {
            return Err(RagError::Config(format!(
                "MULTIMODAL_SEARCH_TEXT_WEIGHT must be between 0.0 and 1.0, got: {}",
                self.multimodal.text_weight
            )));
        }
        if !(0.0..=1.0).contains(&self.multimodal.image_weight) {
            return Err(RagError::Config(format!(
                "MULTIMODAL_SEARCH_IMAGE_WEIGHT must be between 0.0 and 1.0, got: {}",
                self.multimodal.image_weight
            )));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(RagError::Config(format!(
                "LOG_LEVEL must be one of {VALID_LOG_LEVELS:?}, got: {}",
                self.log_level
            )));
        }

        Ok(())
    }

    /// Absolute path of the embedded backend's data directory
    pub fn persist_path(&self) -> PathBuf {
        if self.store.persist_directory.is_absolute() {
            self.store.persist_directory.clone()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&self.store.persist_directory))
                .unwrap_or_else(|_| self.store.persist_directory.clone())
        }
    }

    /// Directive for `tracing_subscriber`'s env filter
    pub fn tracing_directive(&self) -> &'static str {
        match self.log_level.as_str() {
            "DEBUG" => "debug",
            "WARNING" => "warn",
            "ERROR" | "CRITICAL" => "error",
            _ => "info",
        }
    }
}

/// Atomically swappable configuration slot for long-running services
pub struct ConfigHandle {
    inner: RwLock<Arc<RagConfig>>,
}

impl ConfigHandle {
    pub fn new(config: RagConfig) -> Self {
        Self {
            inner: RwLock::new(Arc::new(config)),
        }
    }

    /// Current configuration snapshot
    pub fn current(&self) -> Arc<RagConfig> {
        match self.inner.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Reload from the environment and swap the active config
    ///
    /// Readers holding the previous snapshot keep it until they re-resolve.
    pub fn reload_and_swap(&self) -> Result<Arc<RagConfig>> {
        let fresh = Arc::new(RagConfig::from_env()?);
        match self.inner.write() {
            Ok(mut guard) => *guard = Arc::clone(&fresh),
            Err(poisoned) => *poisoned.into_inner() = Arc::clone(&fresh),
        }
        Ok(fresh)
    }
}

fn parse<T: std::str::FromStr>(value: Option<String>, default: T) -> Result<T> {
    match value {
        Some(raw) => raw.trim().parse().map_err(|_| {
            RagError::Config(format!(
                "invalid numeric value '{raw}' ({})",
                std::any::type_name::<T>()
            ))
        }),
        None => Ok(default),
    }
}

fn parse_bool(value: Option<String>, default: bool) -> bool {
    match value {
        Some(raw) => raw.trim().eq_ignore_ascii_case("true"),
        None => default,
    }
}

fn parse_env_file(content: &str) -> HashMap<String, String> {
    let mut values = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            values.insert(key.trim().to_string(), value.to_string());
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RagConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ollama.base_url, "http://localhost:11434");
        assert_eq!(config.ollama.embedding_model, "nomic-embed-text");
        assert_eq!(config.store.backend, "chroma");
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 200);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = RagConfig::default();
        config.ollama.base_url = "localhost:11434".to_string();
        assert!(config.validate().is_err());

        let mut config = RagConfig::default();
        config.chunking.chunk_size = 50;
        assert!(config.validate().is_err());

        let mut config = RagConfig::default();
        config.chunking.chunk_overlap = config.chunking.chunk_size;
        assert!(config.validate().is_err());

        let mut config = RagConfig::default();
        config.multimodal.image_weight = 1.5;
        assert!(config.validate().is_err());

        let mut config = RagConfig::default();
        config.store.backend = "milvus".to_string();
        assert!(config.validate().is_err());

        let mut config = RagConfig::default();
        config.log_level = "TRACE".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_file_parsing() {
        let parsed = parse_env_file(
            "# comment\n\nCHUNK_SIZE=500\nOLLAMA_LLM_MODEL=\"mistral\"\nQDRANT_API_KEY=''\n",
        );
        assert_eq!(parsed.get("CHUNK_SIZE").unwrap(), "500");
        assert_eq!(parsed.get("OLLAMA_LLM_MODEL").unwrap(), "mistral");
        assert_eq!(parsed.get("QDRANT_API_KEY").unwrap(), "");
        assert!(!parsed.contains_key("# comment"));
    }

    #[test]
    #[serial_test::serial]
    fn test_load_from_file_values() {
        let mut file_values = HashMap::new();
        file_values.insert("CHUNK_SIZE".to_string(), "400".to_string());
        file_values.insert("CHUNK_OVERLAP".to_string(), "40".to_string());
        file_values.insert("VECTOR_DB_TYPE".to_string(), "Qdrant".to_string());
        file_values.insert("LOG_LEVEL".to_string(), "warning".to_string());

        let config = RagConfig::load(&file_values).unwrap();
        assert_eq!(config.chunking.chunk_size, 400);
        assert_eq!(config.chunking.chunk_overlap, 40);
        assert_eq!(config.store.backend, "qdrant");
        assert_eq!(config.log_level, "WARNING");
        assert_eq!(config.tracing_directive(), "warn");
    }

    #[test]
    #[serial_test::serial]
    fn test_load_rejects_unparseable_numbers() {
        let mut file_values = HashMap::new();
        file_values.insert("CHUNK_SIZE".to_string(), "lots".to_string());
        let err = RagConfig::load(&file_values).unwrap_err();
        assert_eq!(err.kind(), "ConfigInvalid");
    }

    #[test]
    #[serial_test::serial]
    fn test_env_overrides_file_values() {
        std::env::set_var("CHUNK_SIZE", "600");
        let mut file_values = HashMap::new();
        file_values.insert("CHUNK_SIZE".to_string(), "400".to_string());

        let config = RagConfig::load(&file_values).unwrap();
        std::env::remove_var("CHUNK_SIZE");

        assert_eq!(config.chunking.chunk_size, 600);
    }

    #[test]
    #[serial_test::serial]
    fn test_from_env_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "CHUNK_SIZE=500\nCHUNK_OVERLAP=50\n").unwrap();

        std::env::remove_var("CHUNK_SIZE");
        std::env::remove_var("CHUNK_OVERLAP");
        let config = RagConfig::from_env_file(&path).unwrap();
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.chunking.chunk_overlap, 50);

        let err = RagConfig::from_env_file(dir.path().join("missing.env")).unwrap_err();
        assert_eq!(err.kind(), "ConfigInvalid");
    }

    #[test]
    #[serial_test::serial]
    fn test_config_handle_swap() {
        let handle = ConfigHandle::new(RagConfig::default());
        let before = handle.current();
        assert_eq!(before.chunking.chunk_size, 1000);
        // Swapping in a fresh environment-derived config must not disturb
        // holders of the old snapshot.
        let after = handle.reload_and_swap().unwrap();
        assert_eq!(before.chunking.chunk_size, 1000);
        assert!(after.validate().is_ok());
    }
}
