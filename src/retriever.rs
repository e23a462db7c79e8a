//! Query-to-hits retrieval over the vector store

use crate::embedding::EmbeddingGenerator;
use crate::error::{RagError, Result};
use crate::models::SearchResult;
use crate::store::{Filter, VectorStore};
use std::sync::Arc;
use tracing::{debug, info};

/// Turns a query string into a ranked list of search hits
pub struct Retriever {
    embedder: Arc<EmbeddingGenerator>,
    store: Arc<dyn VectorStore>,
}

impl Retriever {
    pub fn new(embedder: Arc<EmbeddingGenerator>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    /// Embed the query and search the documents collection
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::QueryEmpty);
        }

        debug!(query = %truncated(query), k, "retrieving documents");
        let query_embedding = self
            .embedder
            .embed_query(query)
            .await
            .map_err(RagError::retrieval)?;
        let results = self
            .store
            .search(&query_embedding, k, filter)
            .await
            .map_err(RagError::retrieval)?;

        info!(hits = results.len(), "retrieval complete");
        Ok(results)
    }

    /// Embed the query and search the images collection
    pub async fn retrieve_images(
        &self,
        query: &str,
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::QueryEmpty);
        }

        debug!(query = %truncated(query), k, "retrieving images");
        let query_embedding = self
            .embedder
            .embed_query(query)
            .await
            .map_err(RagError::retrieval)?;
        let results = self
            .store
            .search_images(&query_embedding, k, filter)
            .await
            .map_err(RagError::retrieval)?;

        info!(hits = results.len(), "image retrieval complete");
        Ok(results)
    }
}

fn truncated(query: &str) -> String {
    query.chars().take(50).collect()
}
