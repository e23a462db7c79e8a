//! Document loading: file validation, text extraction, and chunk creation

use crate::chunker::TextChunker;
use crate::config::RagConfig;
use crate::error::{IngestError, Result};
use crate::models::{Chunk, Document, Metadata};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::path::Path;
use tracing::{debug, info};

/// Supported text document extensions
pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["txt", "md", "pdf"];

/// Loads source files and turns them into retrieval chunks
pub struct DocumentLoader {
    chunker: TextChunker,
}

impl DocumentLoader {
    pub fn new(config: &RagConfig) -> Self {
        Self {
            chunker: TextChunker::new(&config.chunking),
        }
    }

    /// Check whether the path has a supported text document extension
    pub fn is_supported_file(path: &Path) -> bool {
        extension_of(path)
            .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
            .unwrap_or(false)
    }

    /// Read a file and build a [`Document`]
    pub fn load_document(&self, file_path: &Path) -> Result<Document> {
        let path = file_path
            .canonicalize()
            .map_err(|_| IngestError::FileNotFound(file_path.display().to_string()))?;

        if path.is_dir() {
            return Err(IngestError::IsADirectory(path.display().to_string()).into());
        }

        let doc_type = extension_of(&path).unwrap_or_default();
        if !SUPPORTED_EXTENSIONS.contains(&doc_type.as_str()) {
            return Err(IngestError::UnsupportedFileType {
                extension: doc_type,
                supported: SUPPORTED_EXTENSIONS.join(", "),
            }
            .into());
        }

        let content = match doc_type.as_str() {
            "pdf" => load_pdf_file(&path)?,
            _ => load_text_file(&path)?,
        };

        let file_size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        let modified = std::fs::metadata(&path)
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        let mut metadata = Metadata::new();
        metadata.insert("file_size".to_string(), json!(file_size));
        metadata.insert("file_modified".to_string(), json!(modified.to_rfc3339()));

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let source = path.display().to_string();

        debug!(source = %source, doc_type = %doc_type, "loaded document");

        Ok(Document {
            file_path: path,
            name,
            content,
            doc_type,
            source,
            timestamp: Utc::now(),
            metadata,
        })
    }

    /// Load a file and split it into chunks in one step
    pub fn process_document(
        &self,
        file_path: &Path,
        document_id: Option<String>,
    ) -> Result<(Document, Vec<Chunk>)> {
        let document = self.load_document(file_path)?;
        let chunks = self.chunker.create_chunks(&document, document_id);
        info!(
            document = %document.name,
            chunks = chunks.len(),
            "document processed"
        );
        Ok((document, chunks))
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
}

fn load_text_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    let content = String::from_utf8(bytes)
        .map_err(|_| IngestError::EncodingUnknown(path.display().to_string()))?;

    if content.trim().is_empty() {
        return Err(IngestError::FileEmpty(path.display().to_string()).into());
    }
    Ok(content)
}

fn load_pdf_file(path: &Path) -> Result<String> {
    let pages = pdf_extract::extract_text(path).map_err(|e| IngestError::PdfExtraction {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    if pages.trim().is_empty() {
        return Err(IngestError::FileEmpty(path.display().to_string()).into());
    }
    Ok(pages)
}

/// Image file extensions routed to the image ingestion path
pub const IMAGE_EXTENSIONS: [&str; 8] = ["jpg", "jpeg", "png", "gif", "bmp", "webp", "tiff", "tif"];

/// Check whether a path looks like an image by extension
pub fn is_image_file(path: &Path) -> bool {
    extension_of(path)
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RagConfig;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content).unwrap();
        path
    }

    #[test]
    fn test_load_text_document() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "notes.txt", "Python is a language.".as_bytes());

        let loader = DocumentLoader::new(&RagConfig::default());
        let document = loader.load_document(&path).unwrap();

        assert_eq!(document.name, "notes.txt");
        assert_eq!(document.doc_type, "txt");
        assert_eq!(document.content, "Python is a language.");
        assert_eq!(document.size(), 21);
        assert!(document.file_path.is_absolute());
    }

    #[test]
    fn test_unsupported_extension_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "data.csv", b"a,b,c");

        let loader = DocumentLoader::new(&RagConfig::default());
        let err = loader.load_document(&path).unwrap_err();
        assert_eq!(err.kind(), "UnsupportedFileType");
    }

    #[test]
    fn test_empty_file_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "empty.md", b"   \n  ");

        let loader = DocumentLoader::new(&RagConfig::default());
        let err = loader.load_document(&path).unwrap_err();
        assert_eq!(err.kind(), "FileEmpty");
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "broken.txt", &[0x93, 0xfa, 0x96, 0x7b]);

        let loader = DocumentLoader::new(&RagConfig::default());
        let err = loader.load_document(&path).unwrap_err();
        assert_eq!(err.kind(), "EncodingUnknown");
    }

    #[test]
    fn test_missing_file_and_directory_rejected() {
        let dir = TempDir::new().unwrap();
        let loader = DocumentLoader::new(&RagConfig::default());

        let err = loader
            .load_document(&dir.path().join("nope.txt"))
            .unwrap_err();
        assert_eq!(err.kind(), "FileNotFound");

        let err = loader.load_document(dir.path()).unwrap_err();
        // Directories carry no supported extension either way
        assert!(matches!(
            err.kind(),
            "DirectoryNotSupported" | "UnsupportedFileType"
        ));
    }

    #[test]
    fn test_process_document_produces_chunks() {
        let dir = TempDir::new().unwrap();
        let body = "Python is a language. It has simple syntax. ".repeat(10);
        let path = write_file(&dir, "long.txt", body.as_bytes());

        let mut config = RagConfig::default();
        config.chunking.chunk_size = 100;
        config.chunking.chunk_overlap = 20;

        let loader = DocumentLoader::new(&config);
        let (document, chunks) = loader.process_document(&path, None).unwrap();

        assert!(chunks.len() >= 4);
        for chunk in &chunks {
            assert_eq!(chunk.document_id, chunks[0].document_id);
            assert!(document.content.contains(&chunk.content));
        }
    }

    #[test]
    fn test_image_extension_dispatch() {
        assert!(is_image_file(Path::new("/tmp/cat.PNG")));
        assert!(is_image_file(Path::new("photo.jpeg")));
        assert!(is_image_file(Path::new("scan.tif")));
        assert!(!is_image_file(Path::new("notes.txt")));
        assert!(!is_image_file(Path::new("no_extension")));
    }
}
