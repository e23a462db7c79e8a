//! Embedded persistent vector store backed by SQLite
//!
//! Embeddings are stored as little-endian f32 BLOBs and scanned with a
//! brute-force cosine pass; metadata is stored as JSON text. One connection
//! keeps the store single-writer; reads can run concurrently on the caller
//! side.

use crate::config::RagConfig;
use crate::error::{Result, StoreError};
use crate::models::{
    Chunk, ChunkSummary, DocumentDetail, DocumentSummary, ImageDocument, Metadata, SearchResult,
};
use crate::store::{
    clamp_score, matches_filter, restore_metadata, sanitize_metadata, Collection, DeleteSelector,
    Filter, VectorStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

struct StoreState {
    pool: Option<SqlitePool>,
    closed: bool,
}

/// SQLite-backed store persisting under the configured data directory
pub struct EmbeddedVectorStore {
    state: RwLock<StoreState>,
    database_url: String,
    data_dir: Option<PathBuf>,
    dimension: usize,
}

impl EmbeddedVectorStore {
    /// Create a store persisting to `<persist_directory>/vectors.db`
    pub fn new(config: &RagConfig, dimension: usize) -> Self {
        let data_dir = config.persist_path();
        let database_url = format!("sqlite://{}?mode=rwc", data_dir.join("vectors.db").display());
        Self {
            state: RwLock::new(StoreState {
                pool: None,
                closed: false,
            }),
            database_url,
            data_dir: Some(data_dir),
            dimension,
        }
    }

    /// In-memory store for tests
    pub fn in_memory(dimension: usize) -> Self {
        Self {
            state: RwLock::new(StoreState {
                pool: None,
                closed: false,
            }),
            database_url: "sqlite::memory:".to_string(),
            data_dir: None,
            dimension,
        }
    }

    /// Configured embedding dimension
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    async fn pool(&self) -> Result<SqlitePool> {
        let state = self.state.read().await;
        if state.closed {
            return Err(StoreError::Closed.into());
        }
        state
            .pool
            .clone()
            .ok_or_else(|| StoreError::NotInitialized.into())
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            }
            .into());
        }
        Ok(())
    }

    async fn create_tables(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                chunk_id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(backend_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)")
            .execute(pool)
            .await
            .map_err(backend_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS images (
                image_id TEXT PRIMARY KEY,
                file_path TEXT NOT NULL,
                file_name TEXT NOT NULL,
                image_type TEXT NOT NULL,
                caption TEXT NOT NULL,
                created_at TEXT NOT NULL,
                embedding BLOB NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(backend_err)?;

        Ok(())
    }

    /// Full metadata view of a stored image row, as exposed on search hits
    fn image_row_metadata(
        image_id: &str,
        file_path: &str,
        file_name: &str,
        image_type: &str,
        caption: &str,
        created_at: &str,
        stored: &Metadata,
    ) -> Metadata {
        let mut metadata = stored.clone();
        metadata.insert("id".to_string(), json!(image_id));
        metadata.insert("file_path".to_string(), json!(file_path));
        metadata.insert("file_name".to_string(), json!(file_name));
        metadata.insert("image_type".to_string(), json!(image_type));
        metadata.insert("caption".to_string(), json!(caption));
        metadata.insert("created_at".to_string(), json!(created_at));
        metadata.insert("source".to_string(), json!("local"));
        metadata
    }

    fn image_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ImageDocument> {
        let image_id: String = row.get("image_id");
        let file_path: String = row.get("file_path");
        let file_name: String = row.get("file_name");
        let image_type: String = row.get("image_type");
        let caption: String = row.get("caption");
        let created_at: String = row.get("created_at");
        let metadata_json: String = row.get("metadata");

        let stored: Metadata = serde_json::from_str(&metadata_json).unwrap_or_default();

        Ok(ImageDocument {
            id: image_id,
            file_path: PathBuf::from(file_path),
            file_name,
            image_type,
            caption,
            metadata: restore_metadata(&stored),
            created_at: parse_timestamp(&created_at)?,
            image_data: None,
        })
    }
}

#[async_trait]
impl VectorStore for EmbeddedVectorStore {
    async fn init(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if state.closed {
            return Err(StoreError::Closed.into());
        }
        if state.pool.is_some() {
            return Ok(());
        }

        if let Some(dir) = &self.data_dir {
            std::fs::create_dir_all(dir)?;
        }

        info!(url = %self.database_url, "initializing embedded vector store");
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .connect(&self.database_url)
            .await
            .map_err(backend_err)?;

        Self::create_tables(&pool).await?;
        state.pool = Some(pool);
        info!(dimension = self.dimension, "embedded vector store ready");
        Ok(())
    }

    async fn upsert_chunks(&self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<()> {
        let pool = self.pool().await?;

        if chunks.len() != embeddings.len() {
            return Err(StoreError::LengthMismatch {
                chunks: chunks.len(),
                embeddings: embeddings.len(),
            }
            .into());
        }
        if chunks.is_empty() {
            warn!("no chunks to upsert");
            return Ok(());
        }

        for (chunk, embedding) in chunks.iter().zip(embeddings.iter()) {
            self.check_dimension(embedding)?;
            let metadata_json = serde_json::to_string(&sanitize_metadata(&chunk.metadata))?;

            sqlx::query(
                r#"
                INSERT OR REPLACE INTO chunks
                    (chunk_id, document_id, chunk_index, content, embedding, metadata)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(&chunk.chunk_id)
            .bind(&chunk.document_id)
            .bind(chunk.chunk_index as i64)
            .bind(&chunk.content)
            .bind(serialize_embedding(embedding))
            .bind(&metadata_json)
            .execute(&pool)
            .await
            .map_err(backend_err)?;
        }

        info!(count = chunks.len(), "upserted chunks");
        Ok(())
    }

    async fn upsert_images(
        &self,
        images: &[ImageDocument],
        embeddings: &[Vec<f32>],
    ) -> Result<Vec<String>> {
        let pool = self.pool().await?;

        if images.len() != embeddings.len() {
            return Err(StoreError::LengthMismatch {
                chunks: images.len(),
                embeddings: embeddings.len(),
            }
            .into());
        }
        if images.is_empty() {
            warn!("no images to upsert");
            return Ok(Vec::new());
        }

        let mut ids = Vec::with_capacity(images.len());
        for (image, embedding) in images.iter().zip(embeddings.iter()) {
            self.check_dimension(embedding)?;
            let metadata_json = serde_json::to_string(&sanitize_metadata(&image.metadata))?;

            sqlx::query(
                r#"
                INSERT OR REPLACE INTO images
                    (image_id, file_path, file_name, image_type, caption, created_at,
                     embedding, metadata)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(&image.id)
            .bind(image.file_path.display().to_string())
            .bind(&image.file_name)
            .bind(&image.image_type)
            .bind(&image.caption)
            .bind(image.created_at.to_rfc3339())
            .bind(serialize_embedding(embedding))
            .bind(&metadata_json)
            .execute(&pool)
            .await
            .map_err(backend_err)?;
            ids.push(image.id.clone());
        }

        info!(count = images.len(), "upserted images");
        Ok(ids)
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>> {
        let pool = self.pool().await?;
        self.check_dimension(query_embedding)?;

        debug!(k, "searching documents collection");
        let rows = sqlx::query("SELECT chunk_id, content, embedding, metadata FROM chunks")
            .fetch_all(&pool)
            .await
            .map_err(backend_err)?;

        let mut scored: Vec<(f32, String, String, Metadata)> = Vec::new();
        for row in rows {
            let chunk_id: String = row.get("chunk_id");
            let content: String = row.get("content");
            let embedding_blob: Vec<u8> = row.get("embedding");
            let metadata_json: String = row.get("metadata");

            let metadata: Metadata = serde_json::from_str(&metadata_json).unwrap_or_default();
            if let Some(filter) = filter {
                if !matches_filter(&metadata, filter) {
                    continue;
                }
            }

            let embedding = deserialize_embedding(&embedding_blob);
            let score = clamp_score(cosine_similarity(query_embedding, &embedding));
            scored.push((score, chunk_id, content, metadata));
        }

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        let mut results = Vec::with_capacity(scored.len());
        for (rank, (score, chunk_id, content, metadata)) in scored.into_iter().enumerate() {
            let chunk = Chunk::new(
                content,
                chunk_id,
                meta_str(&metadata, "document_id"),
                meta_usize(&metadata, "chunk_index"),
                meta_usize(&metadata, "start_char"),
                meta_usize(&metadata, "end_char"),
                metadata.clone(),
            );
            results.push(SearchResult::text(
                chunk,
                score,
                meta_str_or(&metadata, "document_name", "Unknown"),
                meta_str_or(&metadata, "source", "Unknown"),
                rank + 1,
            )?);
        }

        debug!(results = results.len(), "document search complete");
        Ok(results)
    }

    async fn search_images(
        &self,
        query_embedding: &[f32],
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>> {
        let pool = self.pool().await?;
        self.check_dimension(query_embedding)?;

        debug!(k, "searching images collection");
        let rows = sqlx::query(
            "SELECT image_id, file_path, file_name, image_type, caption, created_at, \
             embedding, metadata FROM images",
        )
        .fetch_all(&pool)
        .await
        .map_err(backend_err)?;

        let mut scored: Vec<(f32, String, String, String, Metadata)> = Vec::new();
        for row in rows {
            let image_id: String = row.get("image_id");
            let file_path: String = row.get("file_path");
            let file_name: String = row.get("file_name");
            let image_type: String = row.get("image_type");
            let caption: String = row.get("caption");
            let created_at: String = row.get("created_at");
            let embedding_blob: Vec<u8> = row.get("embedding");
            let metadata_json: String = row.get("metadata");

            let stored: Metadata = serde_json::from_str(&metadata_json).unwrap_or_default();
            let metadata = Self::image_row_metadata(
                &image_id,
                &file_path,
                &file_name,
                &image_type,
                &caption,
                &created_at,
                &stored,
            );
            if let Some(filter) = filter {
                if !matches_filter(&metadata, filter) {
                    continue;
                }
            }

            let embedding = deserialize_embedding(&embedding_blob);
            let score = clamp_score(cosine_similarity(query_embedding, &embedding));
            scored.push((score, image_id, caption, file_path, metadata));
        }

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        let mut results = Vec::with_capacity(scored.len());
        for (rank, (score, image_id, caption, file_path, metadata)) in
            scored.into_iter().enumerate()
        {
            let file_name = meta_str_or(&metadata, "file_name", "Unknown");
            results.push(SearchResult::image(
                image_id,
                caption,
                score,
                file_name,
                PathBuf::from(file_path),
                rank + 1,
                metadata,
            )?);
        }

        debug!(results = results.len(), "image search complete");
        Ok(results)
    }

    async fn delete(&self, selector: &DeleteSelector) -> Result<usize> {
        selector.validate()?;
        let pool = self.pool().await?;

        let deleted = match selector {
            DeleteSelector::ByDocumentId(document_id) => {
                info!(document_id = %document_id, "deleting document chunks");
                sqlx::query("DELETE FROM chunks WHERE document_id = ?1")
                    .bind(document_id)
                    .execute(&pool)
                    .await
                    .map_err(backend_err)?
                    .rows_affected() as usize
            }
            DeleteSelector::ByChunkIds(chunk_ids) => {
                info!(count = chunk_ids.len(), "deleting chunks by id");
                let mut total = 0usize;
                for chunk_id in chunk_ids {
                    total += sqlx::query("DELETE FROM chunks WHERE chunk_id = ?1")
                        .bind(chunk_id)
                        .execute(&pool)
                        .await
                        .map_err(backend_err)?
                        .rows_affected() as usize;
                }
                total
            }
            DeleteSelector::ByMetadata(filter) => {
                info!(?filter, "deleting chunks by metadata filter");
                let rows = sqlx::query("SELECT chunk_id, metadata FROM chunks")
                    .fetch_all(&pool)
                    .await
                    .map_err(backend_err)?;

                let mut total = 0usize;
                for row in rows {
                    let chunk_id: String = row.get("chunk_id");
                    let metadata_json: String = row.get("metadata");
                    let metadata: Metadata =
                        serde_json::from_str(&metadata_json).unwrap_or_default();
                    if matches_filter(&metadata, filter) {
                        total += sqlx::query("DELETE FROM chunks WHERE chunk_id = ?1")
                            .bind(&chunk_id)
                            .execute(&pool)
                            .await
                            .map_err(backend_err)?
                            .rows_affected() as usize;
                    }
                }
                total
            }
        };

        info!(deleted, "chunk deletion complete");
        Ok(deleted)
    }

    async fn remove_image(&self, image_id: &str) -> Result<bool> {
        let pool = self.pool().await?;
        let result = sqlx::query("DELETE FROM images WHERE image_id = ?1")
            .bind(image_id)
            .execute(&pool)
            .await
            .map_err(backend_err)?;

        let removed = result.rows_affected() > 0;
        if removed {
            info!(image_id = %image_id, "removed image");
        } else {
            warn!(image_id = %image_id, "image not found");
        }
        Ok(removed)
    }

    async fn list_documents(&self, limit: Option<usize>) -> Result<Vec<DocumentSummary>> {
        let pool = self.pool().await?;
        let rows = sqlx::query("SELECT metadata FROM chunks ORDER BY rowid")
            .fetch_all(&pool)
            .await
            .map_err(backend_err)?;

        let mut order: Vec<String> = Vec::new();
        let mut summaries: std::collections::HashMap<String, DocumentSummary> =
            std::collections::HashMap::new();

        for row in rows {
            let metadata_json: String = row.get("metadata");
            let metadata: Metadata = serde_json::from_str(&metadata_json).unwrap_or_default();
            let document_id = meta_str_or(&metadata, "document_id", "unknown");

            let entry = summaries.entry(document_id.clone()).or_insert_with(|| {
                order.push(document_id.clone());
                DocumentSummary {
                    document_id: document_id.clone(),
                    document_name: meta_str_or(&metadata, "document_name", "Unknown"),
                    source: meta_str_or(&metadata, "source", "Unknown"),
                    doc_type: meta_str_or(&metadata, "doc_type", "Unknown"),
                    chunk_count: 0,
                    total_size: 0,
                }
            });
            entry.chunk_count += 1;
            entry.total_size += meta_usize(&metadata, "size");
        }

        let mut documents: Vec<DocumentSummary> = order
            .into_iter()
            .filter_map(|id| summaries.remove(&id))
            .collect();
        if let Some(limit) = limit {
            documents.truncate(limit);
        }

        debug!(documents = documents.len(), "listed documents");
        Ok(documents)
    }

    async fn list_images(&self, limit: Option<usize>) -> Result<Vec<ImageDocument>> {
        let pool = self.pool().await?;
        let query = match limit {
            Some(limit) => format!("SELECT * FROM images ORDER BY rowid LIMIT {limit}"),
            None => "SELECT * FROM images ORDER BY rowid".to_string(),
        };
        let rows = sqlx::query(&query)
            .fetch_all(&pool)
            .await
            .map_err(backend_err)?;

        let mut images = Vec::with_capacity(rows.len());
        for row in &rows {
            images.push(Self::image_from_row(row)?);
        }
        debug!(images = images.len(), "listed images");
        Ok(images)
    }

    async fn get_document_by_id(&self, document_id: &str) -> Result<Option<DocumentDetail>> {
        let pool = self.pool().await?;
        let rows = sqlx::query(
            "SELECT chunk_id, content, chunk_index, metadata FROM chunks \
             WHERE document_id = ?1 ORDER BY chunk_index",
        )
        .bind(document_id)
        .fetch_all(&pool)
        .await
        .map_err(backend_err)?;

        if rows.is_empty() {
            return Ok(None);
        }

        let mut chunks = Vec::with_capacity(rows.len());
        let mut document_name = "Unknown".to_string();
        let mut source = "Unknown".to_string();
        let mut doc_type = "Unknown".to_string();

        for (i, row) in rows.iter().enumerate() {
            let chunk_id: String = row.get("chunk_id");
            let content: String = row.get("content");
            let chunk_index: i64 = row.get("chunk_index");
            let metadata_json: String = row.get("metadata");
            let metadata: Metadata = serde_json::from_str(&metadata_json).unwrap_or_default();

            if i == 0 {
                document_name = meta_str_or(&metadata, "document_name", "Unknown");
                source = meta_str_or(&metadata, "source", "Unknown");
                doc_type = meta_str_or(&metadata, "doc_type", "Unknown");
            }

            chunks.push(ChunkSummary {
                chunk_id,
                size: content.chars().count(),
                content,
                chunk_index: chunk_index as usize,
                start_char: meta_usize(&metadata, "start_char"),
                end_char: meta_usize(&metadata, "end_char"),
            });
        }

        let total_size = chunks.iter().map(|c| c.size).sum();
        Ok(Some(DocumentDetail {
            document_id: document_id.to_string(),
            document_name,
            source,
            doc_type,
            chunk_count: chunks.len(),
            total_size,
            chunks,
        }))
    }

    async fn get_image_by_id(&self, image_id: &str) -> Result<Option<ImageDocument>> {
        let pool = self.pool().await?;
        let row = sqlx::query("SELECT * FROM images WHERE image_id = ?1")
            .bind(image_id)
            .fetch_optional(&pool)
            .await
            .map_err(backend_err)?;

        match row {
            Some(row) => Ok(Some(Self::image_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn clear_collection(&self, collection: Collection) -> Result<()> {
        let pool = self.pool().await?;
        warn!(collection = collection.name(), "clearing collection");

        let drop_stmt = match collection {
            Collection::Documents => "DROP TABLE IF EXISTS chunks",
            Collection::Images => "DROP TABLE IF EXISTS images",
        };
        sqlx::query(drop_stmt)
            .execute(&pool)
            .await
            .map_err(backend_err)?;
        Self::create_tables(&pool).await?;

        info!(collection = collection.name(), "collection recreated");
        Ok(())
    }

    async fn count(&self, collection: Collection) -> Result<usize> {
        let pool = self.pool().await?;
        let query = match collection {
            Collection::Documents => "SELECT COUNT(*) AS count FROM chunks",
            Collection::Images => "SELECT COUNT(*) AS count FROM images",
        };
        let row = sqlx::query(query)
            .fetch_one(&pool)
            .await
            .map_err(backend_err)?;
        let count: i64 = row.get("count");
        Ok(count as usize)
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if state.closed {
            return Ok(());
        }
        if let Some(pool) = state.pool.take() {
            pool.close().await;
        }
        state.closed = true;
        info!("embedded vector store closed");
        Ok(())
    }
}

fn backend_err(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Backend(format!("invalid stored timestamp '{raw}': {e}")).into())
}

/// Calculate cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Serialize an embedding into a little-endian f32 BLOB
pub fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding
        .iter()
        .flat_map(|f| f.to_le_bytes().to_vec())
        .collect()
}

/// Deserialize an embedding from storage
pub fn deserialize_embedding(data: &[u8]) -> Vec<f32> {
    data.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn meta_str(metadata: &Metadata, key: &str) -> String {
    metadata
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn meta_str_or(metadata: &Metadata, key: &str, default: &str) -> String {
    metadata
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

fn meta_usize(metadata: &Metadata, key: &str) -> usize {
    metadata
        .get(key)
        .and_then(Value::as_u64)
        .unwrap_or(0) as usize
}
