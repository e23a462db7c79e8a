//! Local Multimodal RAG Service Library
//!
//! A local Retrieval-Augmented Generation service that integrates:
//! - Ollama for chat, embeddings, and image captioning
//! - A pluggable vector store (embedded SQLite or remote Qdrant) holding
//!   a `documents` and an `images` collection
//! - Text and multimodal RAG engines with fused two-collection retrieval
//! - A document service facade shared by the CLI and the MCP server
//!
//! Image vectors are produced by captioning with a vision model and
//! embedding the caption with the text embedder, so both collections share
//! one embedding space and images are searchable by text.
//!
//! # Example
//!
//! ```rust,no_run
//! use local_rag::{DocumentService, OllamaClient, RagConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> local_rag::Result<()> {
//!     let config = RagConfig::from_env()?;
//!     let client = Arc::new(OllamaClient::new(&config.ollama)?);
//!     let service = DocumentService::new(&config, client).await?;
//!
//!     service
//!         .add_file(std::path::Path::new("notes.md"), None, None)
//!         .await?;
//!     let hits = service.search_documents("how does ingestion work", 5).await?;
//!     println!("{} hits", hits.len());
//!     Ok(())
//! }
//! ```

pub mod chunker;
pub mod config;
pub mod document;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod image;
pub mod llm;
pub mod mcp;
pub mod models;
pub mod multimodal;
pub mod retriever;
pub mod service;
pub mod store;
pub mod vision;

// Re-export main types
pub use chunker::TextChunker;
pub use config::{ConfigHandle, RagConfig};
pub use document::DocumentLoader;
pub use embedding::EmbeddingGenerator;
pub use engine::{Answer, RagEngine, SourceRef};
pub use error::{IngestError, LlmError, RagError, Result, StoreError};
pub use image::ImageLoader;
pub use llm::{LlmClient, Message, OllamaClient, Role};
pub use mcp::McpServer;
pub use models::{
    ChatHistory, ChatMessage, Chunk, Document, DocumentDetail, DocumentSummary, ImageDocument,
    ResultType, SearchResult,
};
pub use multimodal::MultimodalRagEngine;
pub use retriever::Retriever;
pub use service::{AddedItem, DocumentService, FoundItem, ItemType, ServiceStatus};
pub use store::{
    create_vector_store, Collection, DeleteSelector, EmbeddedVectorStore, Filter,
    QdrantVectorStore, VectorStore,
};
pub use vision::VisionCaptioner;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.starts_with(char::is_numeric));
    }
}
