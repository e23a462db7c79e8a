//! Image file loading and validation

use crate::config::RagConfig;
use crate::document::IMAGE_EXTENSIONS;
use crate::error::{IngestError, Result};
use crate::models::{ImageDocument, Metadata};
use crate::vision::VisionCaptioner;
use base64::Engine;
use chrono::Utc;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Summary of a directory ingestion pass
#[derive(Debug, Clone, Default)]
pub struct DirectoryLoadResult {
    pub loaded: Vec<ImageDocument>,
    pub failed: Vec<(PathBuf, String)>,
}

/// Validates image files and materializes [`ImageDocument`]s
pub struct ImageLoader {
    captioner: Arc<VisionCaptioner>,
    max_image_size_mb: f64,
    caption_auto_generate: bool,
}

impl ImageLoader {
    pub fn new(config: &RagConfig, captioner: Arc<VisionCaptioner>) -> Self {
        Self {
            captioner,
            max_image_size_mb: config.image.max_image_size_mb,
            caption_auto_generate: config.image.caption_auto_generate,
        }
    }

    /// Check whether the path has a supported image extension
    pub fn is_supported_file(path: &Path) -> bool {
        path.extension()
            .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_string_lossy().to_lowercase().as_str()))
            .unwrap_or(false)
    }

    /// Validate existence, format, and size limits
    pub fn validate(&self, file_path: &Path) -> Result<()> {
        if !file_path.exists() {
            return Err(IngestError::FileNotFound(file_path.display().to_string()).into());
        }
        if file_path.is_dir() {
            return Err(IngestError::IsADirectory(file_path.display().to_string()).into());
        }
        if !Self::is_supported_file(file_path) {
            let extension = file_path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            return Err(IngestError::UnsupportedFileType {
                extension,
                supported: IMAGE_EXTENSIONS.join(", "),
            }
            .into());
        }

        let size_mb = file_size_mb(file_path)?;
        if size_mb > self.max_image_size_mb {
            return Err(IngestError::ImageTooLarge {
                path: file_path.display().to_string(),
                size_mb,
                max_mb: self.max_image_size_mb,
            }
            .into());
        }

        debug!(image = %file_path.display(), size_mb, "image validation passed");
        Ok(())
    }

    /// Load an image file into an [`ImageDocument`]
    ///
    /// Caption precedence: an explicit `caption` wins; otherwise the vision
    /// model captions the image when auto-captioning is enabled; otherwise
    /// the `Image: <file name>` fallback keeps the caption non-empty.
    pub async fn load_image(
        &self,
        file_path: &Path,
        caption: Option<String>,
        tags: Option<Vec<String>>,
        include_base64: bool,
    ) -> Result<ImageDocument> {
        self.validate(file_path)?;

        let path = file_path
            .canonicalize()
            .map_err(|_| IngestError::FileNotFound(file_path.display().to_string()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let image_type = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let created_at = Utc::now();
        let size_mb = file_size_mb(&path)?;

        let final_caption = match caption {
            Some(c) if !c.trim().is_empty() => c,
            _ if self.caption_auto_generate => {
                self.captioner.generate_caption(&path, None, None).await?
            }
            _ => format!("Image: {file_name}"),
        };

        let image_data = if include_base64 {
            Some(encode_base64(&path)?)
        } else {
            None
        };

        let mut metadata = Metadata::new();
        metadata.insert("file_size_mb".to_string(), json!(size_mb));
        metadata.insert(
            "absolute_path".to_string(),
            json!(path.display().to_string()),
        );
        metadata.insert("tags".to_string(), json!(tags.unwrap_or_default()));

        let id = generate_image_id(&path, &created_at.to_rfc3339());
        info!(image = %file_name, id = %id, "loaded image");

        Ok(ImageDocument {
            id,
            file_path: path,
            file_name,
            image_type,
            caption: final_caption,
            metadata,
            created_at,
            image_data,
        })
    }

    /// Load every supported image under a directory
    ///
    /// Per-file failures are collected, not propagated.
    pub async fn load_directory(
        &self,
        dir_path: &Path,
        recursive: bool,
        tags: Option<Vec<String>>,
    ) -> Result<DirectoryLoadResult> {
        if !dir_path.exists() {
            return Err(IngestError::FileNotFound(dir_path.display().to_string()).into());
        }
        if !dir_path.is_dir() {
            return Err(IngestError::ImageInvalid {
                path: dir_path.display().to_string(),
                reason: "not a directory".to_string(),
            }
            .into());
        }

        let mut files = Vec::new();
        collect_image_files(dir_path, recursive, &mut files)?;
        files.sort();
        info!(
            directory = %dir_path.display(),
            count = files.len(),
            "found image files"
        );

        let mut result = DirectoryLoadResult::default();
        for file in files {
            match self.load_image(&file, None, tags.clone(), false).await {
                Ok(image) => result.loaded.push(image),
                Err(e) => {
                    warn!(image = %file.display(), error = %e, "skipping image");
                    result.failed.push((file, e.to_string()));
                }
            }
        }
        Ok(result)
    }
}

/// Base64-encode an image file for inline transport
pub fn encode_base64(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// 16-hex-char image id from absolute path and creation timestamp
fn generate_image_id(path: &Path, timestamp: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.display().to_string().as_bytes());
    hasher.update(timestamp.as_bytes());
    crate::chunker::hex_prefix(&hasher.finalize(), 16)
}

fn file_size_mb(path: &Path) -> Result<f64> {
    let metadata = std::fs::metadata(path)?;
    Ok(metadata.len() as f64 / (1024.0 * 1024.0))
}

fn collect_image_files(dir: &Path, recursive: bool, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            if recursive {
                collect_image_files(&path, recursive, out)?;
            }
        } else if ImageLoader::is_supported_file(&path) {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingGenerator;
    use crate::llm::{GenerationResponse, LlmClient, MockLlmClient};
    use std::io::Write;
    use tempfile::TempDir;

    fn write_image(dir: &Path, name: &str, bytes: usize) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&vec![0xAB; bytes]).unwrap();
        path
    }

    async fn loader_with(mock: MockLlmClient, config: RagConfig) -> ImageLoader {
        let client: Arc<dyn LlmClient> = Arc::new(mock);
        let embedder = Arc::new(EmbeddingGenerator::new(&config, Arc::clone(&client)));
        let captioner = Arc::new(
            VisionCaptioner::new(&config, client, embedder)
                .await
                .unwrap(),
        );
        ImageLoader::new(&config, captioner)
    }

    fn mock_with_models() -> MockLlmClient {
        let mut mock = MockLlmClient::new();
        mock.expect_list_models()
            .returning(|| Ok(vec!["llava".to_string()]));
        mock
    }

    #[tokio::test]
    async fn test_load_image_with_manual_caption() {
        let dir = TempDir::new().unwrap();
        let path = write_image(dir.path(), "cat.png", 128);

        let loader = loader_with(mock_with_models(), RagConfig::default()).await;
        let image = loader
            .load_image(
                &path,
                Some("A cat".to_string()),
                Some(vec!["pets".to_string()]),
                false,
            )
            .await
            .unwrap();

        assert_eq!(image.caption, "A cat");
        assert_eq!(image.image_type, "png");
        assert_eq!(image.file_name, "cat.png");
        assert_eq!(image.id.len(), 16);
        assert_eq!(image.metadata["tags"], json!(["pets"]));
        assert!(image.image_data.is_none());
    }

    #[tokio::test]
    async fn test_auto_caption_via_vision_model() {
        let dir = TempDir::new().unwrap();
        let path = write_image(dir.path(), "red.jpg", 64);

        let mut mock = mock_with_models();
        mock.expect_chat().times(1).returning(|_, _, _| {
            Ok(GenerationResponse {
                text: "A solid red square".to_string(),
                tokens_used: None,
                model: "llava".to_string(),
                finish_reason: None,
            })
        });

        let loader = loader_with(mock, RagConfig::default()).await;
        let image = loader.load_image(&path, None, None, false).await.unwrap();
        assert_eq!(image.caption, "A solid red square");
    }

    #[tokio::test]
    async fn test_caption_fallback_when_auto_disabled() {
        let dir = TempDir::new().unwrap();
        let path = write_image(dir.path(), "plain.bmp", 32);

        let mut config = RagConfig::default();
        config.image.caption_auto_generate = false;

        let loader = loader_with(mock_with_models(), config).await;
        let image = loader.load_image(&path, None, None, false).await.unwrap();
        assert_eq!(image.caption, "Image: plain.bmp");
    }

    #[tokio::test]
    async fn test_oversized_image_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_image(dir.path(), "big.png", 2 * 1024 * 1024);

        let mut config = RagConfig::default();
        config.image.max_image_size_mb = 1.0;

        let loader = loader_with(mock_with_models(), config).await;
        let err = loader.load_image(&path, None, None, false).await.unwrap_err();
        assert_eq!(err.kind(), "ImageTooLarge");
    }

    #[tokio::test]
    async fn test_unsupported_extension_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_image(dir.path(), "doc.txt", 16);

        let loader = loader_with(mock_with_models(), RagConfig::default()).await;
        let err = loader.load_image(&path, None, None, false).await.unwrap_err();
        assert_eq!(err.kind(), "UnsupportedFileType");
    }

    #[tokio::test]
    async fn test_base64_inclusion() {
        let dir = TempDir::new().unwrap();
        let path = write_image(dir.path(), "tiny.gif", 8);

        let mut config = RagConfig::default();
        config.image.caption_auto_generate = false;

        let loader = loader_with(mock_with_models(), config).await;
        let image = loader.load_image(&path, None, None, true).await.unwrap();
        let encoded = image.image_data.unwrap();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        assert_eq!(decoded, vec![0xAB; 8]);
    }

    #[tokio::test]
    async fn test_directory_load_isolates_failures() {
        let dir = TempDir::new().unwrap();
        write_image(dir.path(), "one.png", 16);
        write_image(dir.path(), "two.jpeg", 16);
        write_image(dir.path(), "too_big.png", 2 * 1024 * 1024);
        write_image(dir.path(), "ignored.txt", 16);

        let mut config = RagConfig::default();
        config.image.caption_auto_generate = false;
        config.image.max_image_size_mb = 1.0;

        let loader = loader_with(mock_with_models(), config).await;
        let result = loader
            .load_directory(dir.path(), false, None)
            .await
            .unwrap();

        assert_eq!(result.loaded.len(), 2);
        assert_eq!(result.failed.len(), 1);
        assert!(result.failed[0].0.ends_with("too_big.png"));
    }
}
