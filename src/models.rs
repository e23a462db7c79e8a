//! Core data model: documents, chunks, image documents, search results,
//! and chat history

use crate::error::{Result, StoreError};
use crate::llm::Role;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;

/// Flat metadata map; persisted values are scalars (string / int / float /
/// bool / null), nested values are stringified under a `custom_` prefix
pub type Metadata = HashMap<String, Value>;

/// A source document before splitting
///
/// Never persisted directly; only its chunks are stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Absolute path to the source file
    pub file_path: PathBuf,
    /// Display name (usually the file name)
    pub name: String,
    /// Full text content
    pub content: String,
    /// File type tag: "txt", "md", or "pdf"
    pub doc_type: String,
    /// Source identifier (usually the resolved path string)
    pub source: String,
    /// Creation timestamp
    pub timestamp: DateTime<Utc>,
    /// Free-form metadata
    pub metadata: Metadata,
}

impl Document {
    /// Character count of the content
    pub fn size(&self) -> usize {
        self.content.chars().count()
    }
}

/// A persisted unit of retrieval for text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    /// Globally unique id, `<doc-id>_chunk_<4-digit-index>`
    pub chunk_id: String,
    pub document_id: String,
    /// Zero-based index within the parent document
    pub chunk_index: usize,
    /// Character offset into the parent document (advisory after round-trip)
    pub start_char: usize,
    /// Character offset one past the last character (advisory after round-trip)
    pub end_char: usize,
    pub metadata: Metadata,
}

impl Chunk {
    /// Build a chunk, injecting the chunk-specific metadata keys
    pub fn new(
        content: String,
        chunk_id: String,
        document_id: String,
        chunk_index: usize,
        start_char: usize,
        end_char: usize,
        mut metadata: Metadata,
    ) -> Self {
        let size = content.chars().count();
        metadata.insert("chunk_id".to_string(), json!(chunk_id));
        metadata.insert("document_id".to_string(), json!(document_id));
        metadata.insert("chunk_index".to_string(), json!(chunk_index));
        metadata.insert("start_char".to_string(), json!(start_char));
        metadata.insert("end_char".to_string(), json!(end_char));
        metadata.insert("size".to_string(), json!(size));
        Self {
            content,
            chunk_id,
            document_id,
            chunk_index,
            start_char,
            end_char,
            metadata,
        }
    }

    /// Character count of the content
    pub fn size(&self) -> usize {
        self.content.chars().count()
    }
}

/// A persisted unit of retrieval for images
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageDocument {
    /// 16-hex-char stable hash of absolute path + creation timestamp
    pub id: String,
    pub file_path: PathBuf,
    pub file_name: String,
    /// Lower-cased extension without the dot
    pub image_type: String,
    /// Vision-model description; never empty
    pub caption: String,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    /// Base64-encoded bytes, only when inline transport was requested
    pub image_data: Option<String>,
}

impl ImageDocument {
    /// Current file size in megabytes, 0.0 when the file is gone
    pub fn size_mb(&self) -> f64 {
        std::fs::metadata(&self.file_path)
            .map(|m| m.len() as f64 / (1024.0 * 1024.0))
            .unwrap_or(0.0)
    }
}

/// Modality of a search hit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultType {
    Text,
    Image,
}

impl std::fmt::Display for ResultType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultType::Text => write!(f, "text"),
            ResultType::Image => write!(f, "image"),
        }
    }
}

/// A ranked retrieval result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Matched chunk; synthetic for image hits (content = caption)
    pub chunk: Chunk,
    /// Cosine-equivalent similarity in [0, 1]
    pub score: f32,
    pub document_name: String,
    pub document_source: String,
    /// 1-based position in the result list
    pub rank: usize,
    pub metadata: Metadata,
    pub result_type: ResultType,
    /// File path for image hits
    pub image_path: Option<PathBuf>,
    /// Caption for image hits
    pub caption: Option<String>,
}

impl SearchResult {
    /// Build a text hit, enforcing the score bounds
    pub fn text(
        chunk: Chunk,
        score: f32,
        document_name: String,
        document_source: String,
        rank: usize,
    ) -> Result<Self> {
        check_score(score)?;
        let metadata = chunk.metadata.clone();
        Ok(Self {
            chunk,
            score,
            document_name,
            document_source,
            rank,
            metadata,
            result_type: ResultType::Text,
            image_path: None,
            caption: None,
        })
    }

    /// Build an image hit with a synthetic chunk wrapping the caption
    pub fn image(
        image_id: String,
        caption: String,
        score: f32,
        file_name: String,
        file_path: PathBuf,
        rank: usize,
        metadata: Metadata,
    ) -> Result<Self> {
        check_score(score)?;
        let caption_len = caption.chars().count();
        let chunk = Chunk::new(
            caption.clone(),
            image_id.clone(),
            image_id,
            0,
            0,
            caption_len,
            metadata.clone(),
        );
        Ok(Self {
            chunk,
            score,
            document_name: file_name,
            document_source: file_path.to_string_lossy().into_owned(),
            rank,
            metadata,
            result_type: ResultType::Image,
            image_path: Some(file_path),
            caption: Some(caption),
        })
    }
}

fn check_score(score: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&score) {
        return Err(StoreError::ScoreOutOfRange(score as f64).into());
    }
    Ok(())
}

/// A role-tagged message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: Metadata,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: Metadata::new(),
        }
    }
}

/// Conversation history with an optional length cap
///
/// Not safe for concurrent mutation; pin each chat session to one handler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatHistory {
    pub messages: Vec<ChatMessage>,
    /// Oldest turns are dropped first once this is exceeded
    pub max_messages: Option<usize>,
}

impl ChatHistory {
    pub fn new(max_messages: Option<usize>) -> Self {
        Self {
            messages: Vec::new(),
            max_messages,
        }
    }

    /// Append a message, then evict the oldest beyond the cap
    pub fn add_message(&mut self, role: Role, content: impl Into<String>, metadata: Metadata) {
        let mut message = ChatMessage::new(role, content);
        message.metadata = metadata;
        self.messages.push(message);

        if let Some(max) = self.max_messages {
            if self.messages.len() > max {
                let overflow = self.messages.len() - max;
                self.messages.drain(..overflow);
            }
        }
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// One row of a document listing: per-document aggregate over its chunks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub document_id: String,
    pub document_name: String,
    pub source: String,
    pub doc_type: String,
    pub chunk_count: usize,
    pub total_size: usize,
}

/// Aggregate plus the chunk bodies, ordered by chunk index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentDetail {
    pub document_id: String,
    pub document_name: String,
    pub source: String,
    pub doc_type: String,
    pub chunk_count: usize,
    pub total_size: usize,
    pub chunks: Vec<ChunkSummary>,
}

/// Chunk body as returned by document detail lookups
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSummary {
    pub chunk_id: String,
    pub content: String,
    pub chunk_index: usize,
    pub start_char: usize,
    pub end_char: usize,
    pub size: usize,
}
