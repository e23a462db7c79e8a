//! Vector store abstraction: a capability trait, two backends, and a
//! config-driven factory
//!
//! A store holds two independently indexed collections, `documents` and
//! `images`. Scores are cosine-similarity equivalents in [0, 1]; a backend
//! reporting Euclidean-style distances converts with `1 / (1 + d)`.

mod embedded;
mod qdrant;

pub use embedded::EmbeddedVectorStore;
pub use qdrant::QdrantVectorStore;

use crate::config::RagConfig;
use crate::error::{RagError, Result, StoreError};
use crate::models::{
    Chunk, DocumentDetail, DocumentSummary, ImageDocument, Metadata, ResultType, SearchResult,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{info, warn};

/// Conjunction of equality predicates over stored metadata keys
pub type Filter = HashMap<String, Value>;

/// The two collections every store holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Documents,
    Images,
}

impl Collection {
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Documents => "documents",
            Collection::Images => "images",
        }
    }
}

/// Delete condition; exactly one applies per call
#[derive(Debug, Clone)]
pub enum DeleteSelector {
    /// Remove every chunk of a document
    ByDocumentId(String),
    /// Remove specific chunks
    ByChunkIds(Vec<String>),
    /// Remove chunks whose metadata matches every predicate
    ByMetadata(Filter),
}

impl DeleteSelector {
    /// An empty id list or filter is a caller bug, not a no-op
    pub fn validate(&self) -> Result<()> {
        let empty = match self {
            DeleteSelector::ByDocumentId(id) => id.is_empty(),
            DeleteSelector::ByChunkIds(ids) => ids.is_empty(),
            DeleteSelector::ByMetadata(filter) => filter.is_empty(),
        };
        if empty {
            return Err(StoreError::MissingDeletePredicate.into());
        }
        Ok(())
    }
}

/// Persistent vector index over the two collections
///
/// Read operations are safe to call concurrently; writes serialize inside
/// the backend. After [`close`](VectorStore::close), every operation fails.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Open or create persistent resources and both collections; idempotent
    async fn init(&self) -> Result<()>;

    /// Insert or overwrite chunks by chunk id
    async fn upsert_chunks(&self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<()>;

    /// Insert or overwrite images by image id; returns the stored ids
    async fn upsert_images(
        &self,
        images: &[ImageDocument],
        embeddings: &[Vec<f32>],
    ) -> Result<Vec<String>>;

    /// Top-k chunks by cosine similarity; an empty result is legal
    async fn search(
        &self,
        query_embedding: &[f32],
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>>;

    /// Top-k images by cosine similarity over their caption vectors
    async fn search_images(
        &self,
        query_embedding: &[f32],
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>>;

    /// Remove matching chunks; returns the number removed
    async fn delete(&self, selector: &DeleteSelector) -> Result<usize>;

    /// Remove one image; true when it was found and removed
    async fn remove_image(&self, image_id: &str) -> Result<bool>;

    /// One aggregate entry per distinct document id
    async fn list_documents(&self, limit: Option<usize>) -> Result<Vec<DocumentSummary>>;

    /// Reconstructed image documents, without image bytes
    async fn list_images(&self, limit: Option<usize>) -> Result<Vec<ImageDocument>>;

    /// Aggregate plus chunks ordered by chunk index, or None
    async fn get_document_by_id(&self, document_id: &str) -> Result<Option<DocumentDetail>>;

    /// Reconstructed image document, or None
    async fn get_image_by_id(&self, image_id: &str) -> Result<Option<ImageDocument>>;

    /// Drop and recreate one collection, preserving dimension and distance
    async fn clear_collection(&self, collection: Collection) -> Result<()>;

    /// Drop and recreate both collections, preserving dimension and distance
    async fn clear(&self) -> Result<()> {
        self.clear_collection(Collection::Documents).await?;
        self.clear_collection(Collection::Images).await
    }

    /// Number of stored entries in one collection
    async fn count(&self, collection: Collection) -> Result<usize>;

    /// Release resources; idempotent, mandatory on shutdown
    async fn close(&self) -> Result<()>;

    /// Fused search over both collections with per-modality weights
    ///
    /// The two single-collection searches run concurrently. Weights are
    /// applied literally; they need not sum to 1. When one side fails the
    /// other still contributes; when both fail the call fails.
    async fn search_multimodal(
        &self,
        query_embedding: &[f32],
        k: usize,
        text_weight: f32,
        image_weight: f32,
    ) -> Result<Vec<SearchResult>> {
        info!(text_weight, image_weight, k, "running multimodal search");

        let (text_results, image_results) = tokio::join!(
            self.search(query_embedding, k, None),
            self.search_images(query_embedding, k, None)
        );

        let mut merged: Vec<SearchResult> = Vec::new();
        let mut first_error: Option<RagError> = None;
        let mut failures = 0;

        match text_results {
            Ok(hits) => {
                for mut hit in hits {
                    hit.score *= text_weight;
                    hit.result_type = ResultType::Text;
                    hit.metadata
                        .insert("search_type".to_string(), Value::from("text"));
                    merged.push(hit);
                }
            }
            Err(e) => {
                warn!(error = %e, "text search failed during multimodal fusion");
                failures += 1;
                first_error.get_or_insert(e);
            }
        }

        match image_results {
            Ok(hits) => {
                for mut hit in hits {
                    hit.score *= image_weight;
                    hit.result_type = ResultType::Image;
                    hit.metadata
                        .insert("search_type".to_string(), Value::from("image"));
                    merged.push(hit);
                }
            }
            Err(e) => {
                warn!(error = %e, "image search failed during multimodal fusion");
                failures += 1;
                first_error.get_or_insert(e);
            }
        }

        if failures == 2 {
            // first_error is always set when both sides failed
            return Err(match first_error {
                Some(e) => RagError::retrieval(e),
                None => StoreError::Backend("multimodal search failed".to_string()).into(),
            });
        }

        merged.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        merged.truncate(k);
        for (i, hit) in merged.iter_mut().enumerate() {
            hit.rank = i + 1;
        }

        info!(results = merged.len(), "multimodal search complete");
        Ok(merged)
    }
}

/// Select a backend from the configured `VECTOR_DB_TYPE`
///
/// `dimension` is the embedding dimension discovered by probing the
/// embedder; backends record it at collection creation.
pub fn create_vector_store(
    config: &RagConfig,
    dimension: usize,
) -> Result<Box<dyn VectorStore>> {
    match config.store.backend.as_str() {
        "chroma" | "embedded" => {
            info!(directory = %config.persist_path().display(), "using embedded vector store");
            Ok(Box::new(EmbeddedVectorStore::new(config, dimension)))
        }
        "qdrant" => {
            info!(
                host = %config.store.qdrant.host,
                port = config.store.qdrant.port,
                "using Qdrant vector store"
            );
            Ok(Box::new(QdrantVectorStore::new(config, dimension)))
        }
        other => Err(StoreError::UnsupportedBackend(other.to_string()).into()),
    }
}

/// Convert a Euclidean-style distance into a score in (0, 1]
pub fn distance_to_score(distance: f32) -> f32 {
    1.0 / (1.0 + distance.max(0.0))
}

/// Clamp a raw cosine similarity into the score range
pub(crate) fn clamp_score(similarity: f32) -> f32 {
    similarity.clamp(0.0, 1.0)
}

/// Restrict a metadata map to persistable scalars
///
/// Nested values (lists, objects) are stringified under a `custom_` prefix
/// so every stored value round-trips as a scalar.
pub(crate) fn sanitize_metadata(metadata: &Metadata) -> Metadata {
    let mut sanitized = Metadata::with_capacity(metadata.len());
    for (key, value) in metadata {
        match value {
            Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {
                sanitized.insert(key.clone(), value.clone());
            }
            other => {
                let key = if key.starts_with("custom_") {
                    key.clone()
                } else {
                    format!("custom_{key}")
                };
                sanitized.insert(key, Value::from(other.to_string()));
            }
        }
    }
    sanitized
}

/// Inverse of the `custom_` prefixing applied on write
pub(crate) fn restore_metadata(metadata: &Metadata) -> Metadata {
    metadata
        .iter()
        .map(|(key, value)| {
            let key = key
                .strip_prefix("custom_")
                .map(str::to_string)
                .unwrap_or_else(|| key.clone());
            (key, value.clone())
        })
        .collect()
}

/// Check a metadata map against a conjunction of equality predicates
pub(crate) fn matches_filter(metadata: &Metadata, filter: &Filter) -> bool {
    filter
        .iter()
        .all(|(key, expected)| metadata.get(key) == Some(expected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_delete_selector_validation() {
        assert!(DeleteSelector::ByDocumentId("doc1".to_string())
            .validate()
            .is_ok());
        assert!(DeleteSelector::ByChunkIds(vec![]).validate().is_err());
        assert!(DeleteSelector::ByMetadata(Filter::new())
            .validate()
            .is_err());

        let err = DeleteSelector::ByDocumentId(String::new())
            .validate()
            .unwrap_err();
        assert_eq!(err.kind(), "MissingDeletePredicate");
    }

    #[test]
    fn test_distance_to_score_bounds() {
        assert_eq!(distance_to_score(0.0), 1.0);
        assert!(distance_to_score(1.0) > 0.49 && distance_to_score(1.0) < 0.51);
        assert!(distance_to_score(1000.0) > 0.0);
        // Negative distances are treated as a perfect match
        assert_eq!(distance_to_score(-3.0), 1.0);
    }

    #[test]
    fn test_sanitize_metadata_prefixes_nested_values() {
        let mut metadata = Metadata::new();
        metadata.insert("source".to_string(), json!("/tmp/a.txt"));
        metadata.insert("size".to_string(), json!(42));
        metadata.insert("tags".to_string(), json!(["red", "square"]));

        let sanitized = sanitize_metadata(&metadata);
        assert_eq!(sanitized["source"], json!("/tmp/a.txt"));
        assert_eq!(sanitized["size"], json!(42));
        assert!(sanitized.contains_key("custom_tags"));
        assert!(sanitized["custom_tags"].is_string());

        let restored = restore_metadata(&sanitized);
        assert!(restored.contains_key("tags"));
        assert!(restored["tags"].is_string());
        assert_eq!(restored["source"], json!("/tmp/a.txt"));
        assert_eq!(restored["size"], json!(42));
    }

    #[test]
    fn test_filter_matching() {
        let mut metadata = Metadata::new();
        metadata.insert("doc_type".to_string(), json!("txt"));
        metadata.insert("chunk_index".to_string(), json!(3));

        let mut filter = Filter::new();
        filter.insert("doc_type".to_string(), json!("txt"));
        assert!(matches_filter(&metadata, &filter));

        filter.insert("chunk_index".to_string(), json!(4));
        assert!(!matches_filter(&metadata, &filter));

        filter.clear();
        filter.insert("missing".to_string(), json!("x"));
        assert!(!matches_filter(&metadata, &filter));
    }

    #[test]
    fn test_collection_names() {
        assert_eq!(Collection::Documents.name(), "documents");
        assert_eq!(Collection::Images.name(), "images");
    }
}
