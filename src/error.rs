//! Error handling for the RAG service

use thiserror::Error;

/// Result type alias for the RAG service
pub type Result<T> = std::result::Result<T, RagError>;

/// Main error type for the RAG service
#[derive(Error, Debug)]
pub enum RagError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("vector store error: {0}")]
    Store(#[from] StoreError),

    #[error("ingestion error: {0}")]
    Ingest(#[from] IngestError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("search query is empty")]
    QueryEmpty,

    #[error("question is empty")]
    QuestionEmpty,

    #[error("retrieval failed: {0}")]
    Retrieval(#[source] Box<RagError>),

    #[error("answer generation failed: {0}")]
    Generation(#[source] Box<RagError>),

    #[error("item not found: {0}")]
    NotFound(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the Ollama model backend
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("cannot reach model backend at {url}: {reason}")]
    Unavailable { url: String, reason: String },

    #[error("model '{model}' is not installed (run: ollama pull {model})")]
    ModelMissing { model: String },

    #[error("generation failed: {0}")]
    GenerationFailed(String),

    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("embedding input is empty or contains an empty string")]
    EmptyEmbeddingInput,

    #[error("vision model returned an empty caption for '{path}'")]
    EmptyCaption { path: String },

    #[error("invalid response from model backend: {0}")]
    InvalidResponse(String),

    #[error("model request timed out")]
    Timeout,
}

/// Errors from vector store operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("vector store is not initialized")]
    NotInitialized,

    #[error("vector store has been closed")]
    Closed,

    #[error("chunk count ({chunks}) does not match embedding count ({embeddings})")]
    LengthMismatch { chunks: usize, embeddings: usize },

    #[error("no delete condition given (document id, chunk ids, or metadata filter required)")]
    MissingDeletePredicate,

    #[error("embedding dimension mismatch: collection expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("similarity score {0} is outside [0, 1]")]
    ScoreOutOfRange(f64),

    #[error("unsupported vector store backend: {0}")]
    UnsupportedBackend(String),

    #[error("storage operation failed: {0}")]
    Backend(String),
}

/// Per-file errors raised while loading documents and images
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("expected a file, found a directory: {0}")]
    IsADirectory(String),

    #[error("unsupported file type '{extension}' (supported: {supported})")]
    UnsupportedFileType { extension: String, supported: String },

    #[error("file is empty: {0}")]
    FileEmpty(String),

    #[error("cannot decode file as UTF-8: {0}")]
    EncodingUnknown(String),

    #[error("failed to extract text from PDF '{path}': {reason}")]
    PdfExtraction { path: String, reason: String },

    #[error("image file too large: {size_mb:.2}MB exceeds the {max_mb}MB limit: {path}")]
    ImageTooLarge {
        path: String,
        size_mb: f64,
        max_mb: f64,
    },

    #[error("invalid image file '{path}': {reason}")]
    ImageInvalid { path: String, reason: String },
}

impl RagError {
    /// Wrap an error as a retrieval failure, preserving the cause
    pub fn retrieval(cause: impl Into<RagError>) -> Self {
        RagError::Retrieval(Box::new(cause.into()))
    }

    /// Wrap an error as a generation failure, preserving the cause
    pub fn generation(cause: impl Into<RagError>) -> Self {
        RagError::Generation(Box::new(cause.into()))
    }

    /// Stable discriminator used in MCP responses and CLI output
    pub fn kind(&self) -> &'static str {
        match self {
            RagError::Llm(e) => e.kind(),
            RagError::Store(e) => e.kind(),
            RagError::Ingest(e) => e.kind(),
            RagError::Config(_) => "ConfigInvalid",
            RagError::QueryEmpty => "QueryEmpty",
            RagError::QuestionEmpty => "QuestionEmpty",
            RagError::Retrieval(_) => "RetrievalFailed",
            RagError::Generation(_) => "GenerationFailed",
            RagError::NotFound(_) => "NotFound",
            RagError::Cancelled => "Cancelled",
            RagError::Io(_) => "IoError",
            RagError::Serialization(_) => "SerializationError",
        }
    }

    /// Check if the error is worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RagError::Llm(LlmError::Unavailable { .. })
                | RagError::Llm(LlmError::Timeout)
                | RagError::Retrieval(_)
                | RagError::Generation(_)
                | RagError::Store(StoreError::Backend(_))
        )
    }

    /// Remediation hint shown to the user for recoverable setup problems
    pub fn remediation(&self) -> Option<String> {
        match self {
            RagError::Llm(LlmError::Unavailable { url, .. }) => Some(format!(
                "Check that Ollama is running at {url} (try: ollama serve)"
            )),
            RagError::Llm(LlmError::ModelMissing { model }) => {
                Some(format!("Run: ollama pull {model}"))
            }
            RagError::Retrieval(inner) | RagError::Generation(inner) => inner.remediation(),
            _ => None,
        }
    }
}

impl LlmError {
    pub fn kind(&self) -> &'static str {
        match self {
            LlmError::Unavailable { .. } | LlmError::Timeout => "EmbeddingUnavailable",
            LlmError::ModelMissing { .. } => "VisionModelMissing",
            LlmError::GenerationFailed(_) => "GenerationFailed",
            LlmError::EmbeddingFailed(_) => "EmbeddingUnavailable",
            LlmError::EmptyEmbeddingInput => "EmbeddingInputInvalid",
            LlmError::EmptyCaption { .. } => "CaptionEmpty",
            LlmError::InvalidResponse(_) => "InvalidResponse",
        }
    }
}

impl StoreError {
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::NotInitialized => "StoreNotInitialized",
            StoreError::Closed => "StoreClosed",
            StoreError::LengthMismatch { .. } => "LengthMismatch",
            StoreError::MissingDeletePredicate => "MissingDeletePredicate",
            StoreError::DimensionMismatch { .. } => "DimensionMismatch",
            StoreError::ScoreOutOfRange(_) => "ScoreOutOfRange",
            StoreError::UnsupportedBackend(_) => "ConfigInvalid",
            StoreError::Backend(_) => "StoreError",
        }
    }
}

impl IngestError {
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::FileNotFound(_) => "FileNotFound",
            IngestError::IsADirectory(_) => "DirectoryNotSupported",
            IngestError::UnsupportedFileType { .. } => "UnsupportedFileType",
            IngestError::FileEmpty(_) => "FileEmpty",
            IngestError::EncodingUnknown(_) => "EncodingUnknown",
            IngestError::PdfExtraction { .. } => "PdfExtractionFailed",
            IngestError::ImageTooLarge { .. } => "ImageTooLarge",
            IngestError::ImageInvalid { .. } => "ImageInvalid",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        let unavailable = RagError::Llm(LlmError::Unavailable {
            url: "http://localhost:11434".to_string(),
            reason: "connection refused".to_string(),
        });
        assert!(unavailable.is_retryable());

        let config_error = RagError::Config("invalid chunk size".to_string());
        assert!(!config_error.is_retryable());

        let caller_bug = RagError::Store(StoreError::LengthMismatch {
            chunks: 2,
            embeddings: 1,
        });
        assert!(!caller_bug.is_retryable());
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(
            RagError::Llm(LlmError::EmptyEmbeddingInput).kind(),
            "EmbeddingInputInvalid"
        );
        assert_eq!(RagError::Store(StoreError::Closed).kind(), "StoreClosed");
        assert_eq!(RagError::QueryEmpty.kind(), "QueryEmpty");
        assert_eq!(
            RagError::retrieval(StoreError::NotInitialized).kind(),
            "RetrievalFailed"
        );
    }

    #[test]
    fn test_remediation_hint() {
        let missing = RagError::Llm(LlmError::ModelMissing {
            model: "llava".to_string(),
        });
        assert_eq!(missing.remediation().unwrap(), "Run: ollama pull llava");

        let wrapped = RagError::generation(missing);
        assert!(wrapped.remediation().is_some());
        assert!(RagError::QueryEmpty.remediation().is_none());
    }
}
