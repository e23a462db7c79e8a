//! Remote vector store backed by a Qdrant server over gRPC
//!
//! Each logical collection maps to one Qdrant collection with cosine
//! distance. Point ids are UUIDv5 digests of the chunk/image id, which keeps
//! upserts idempotent; the original string id lives in the payload. The
//! embedding dimension is discovered by the caller from a probe embedding
//! and validated against existing collections at init.

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
use qdrant_client::qdrant::{
    point_id::PointIdOptions, points_selector::PointsSelectorOneOf, value::Kind,
    vectors_config::Config as VectorsKind, Condition, CountPoints, CreateCollection,
    DeleteCollection, DeletePoints, Distance, Filter as QdrantFilter, GetCollectionInfoRequest,
    ListValue, PointId, PointStruct, PointsIdsList, PointsSelector, RetrievedPoint, ScrollPoints,
    SearchPoints, Struct, UpsertPoints, Value as QdrantValue, VectorParams, VectorsConfig,
};
use qdrant_client::Qdrant;
use serde_json::{json, Number, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SCROLL_PAGE: u32 = 256;
/// Oversampling factor when a filter predicate cannot be pushed down
const CLIENT_FILTER_FACTOR: usize = 4;

struct ClientState {
    client: Option<Arc<Qdrant>>,
    closed: bool,
}

/// Qdrant-backed store for both collections
pub struct QdrantVectorStore {
    state: RwLock<ClientState>,
    url: String,
    api_key: Option<String>,
    dimension: usize,
}

impl QdrantVectorStore {
    pub fn new(config: &RagConfig, dimension: usize) -> Self {
        let qdrant = &config.store.qdrant;
        Self {
            state: RwLock::new(ClientState {
                client: None,
                closed: false,
            }),
            url: format!("http://{}:{}", qdrant.host, qdrant.port),
            api_key: qdrant.api_key.clone(),
            dimension,
        }
    }

    /// Configured embedding dimension
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    async fn client(&self) -> Result<Arc<Qdrant>> {
        let state = self.state.read().await;
        if state.closed {
            return Err(StoreError::Closed.into());
        }
        state
            .client
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

    async fn ensure_collection(&self, client: &Qdrant, name: &str) -> Result<()> {
        let collections = client.list_collections().await.map_err(backend_err)?;
        let exists = collections.collections.iter().any(|c| c.name == name);

        if !exists {
            info!(collection = name, dimension = self.dimension, "creating collection");
            client
                .create_collection(CreateCollection {
                    collection_name: name.to_string(),
                    vectors_config: Some(VectorsConfig {
                        config: Some(VectorsKind::Params(VectorParams {
                            size: self.dimension as u64,
                            distance: Distance::Cosine.into(),
                            ..Default::default()
                        })),
                    }),
                    ..Default::default()
                })
                .await
                .map_err(backend_err)?;
            return Ok(());
        }

        // Existing collection: the recorded dimension must match the probe
        let info = client
            .collection_info(GetCollectionInfoRequest {
                collection_name: name.to_string(),
            })
            .await
            .map_err(backend_err)?;

        let existing_size = info
            .result
            .and_then(|r| r.config)
            .and_then(|c| c.params)
            .and_then(|p| p.vectors_config)
            .and_then(|v| v.config)
            .and_then(|k| match k {
                VectorsKind::Params(params) => Some(params.size as usize),
                _ => None,
            });

        if let Some(size) = existing_size {
            if size != self.dimension {
                return Err(StoreError::DimensionMismatch {
                    expected: size,
                    actual: self.dimension,
                }
                .into());
            }
        }
        debug!(collection = name, "collection already exists");
        Ok(())
    }

    async fn collection_count(&self, client: &Qdrant, name: &str) -> Result<usize> {
        let response = client
            .count(CountPoints {
                collection_name: name.to_string(),
                exact: Some(true),
                ..Default::default()
            })
            .await
            .map_err(backend_err)?;
        Ok(response.result.map(|r| r.count as usize).unwrap_or(0))
    }

    /// Scroll every point of a collection, optionally filtered server-side
    async fn scroll_all(
        &self,
        client: &Qdrant,
        name: &str,
        filter: Option<QdrantFilter>,
        limit: Option<usize>,
    ) -> Result<Vec<RetrievedPoint>> {
        let mut points = Vec::new();
        let mut offset: Option<PointId> = None;

        loop {
            let response = client
                .scroll(ScrollPoints {
                    collection_name: name.to_string(),
                    filter: filter.clone(),
                    offset: offset.clone(),
                    limit: Some(SCROLL_PAGE),
                    with_payload: Some(true.into()),
                    with_vectors: Some(false.into()),
                    ..Default::default()
                })
                .await
                .map_err(backend_err)?;

            points.extend(response.result);
            if let Some(limit) = limit {
                if points.len() >= limit {
                    points.truncate(limit);
                    return Ok(points);
                }
            }
            match response.next_page_offset {
                Some(next) => offset = Some(next),
                None => return Ok(points),
            }
        }
    }

    /// Split a metadata filter into pushdown conditions and a client-side
    /// remainder for value types Qdrant match conditions cannot express
    fn split_filter(filter: &Filter) -> (Vec<Condition>, Filter) {
        let mut native = Vec::new();
        let mut client_side = Filter::new();
        for (key, value) in filter {
            match value {
                Value::String(s) => native.push(Condition::matches(key.clone(), s.clone())),
                Value::Bool(b) => native.push(Condition::matches(key.clone(), *b)),
                Value::Number(n) if n.is_i64() || n.is_u64() => {
                    native.push(Condition::matches(key.clone(), n.as_i64().unwrap_or(0)));
                }
                other => {
                    client_side.insert(key.clone(), other.clone());
                }
            }
        }
        (native, client_side)
    }

    fn image_from_payload(payload: &Metadata) -> Result<ImageDocument> {
        let created_raw = payload
            .get("created_at")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(ImageDocument {
            id: payload_str(payload, "id"),
            file_path: PathBuf::from(payload_str(payload, "file_path")),
            file_name: payload_str(payload, "file_name"),
            image_type: payload_str(payload, "image_type"),
            caption: payload_str(payload, "caption"),
            metadata: restore_metadata(&custom_only(payload)),
            created_at: parse_timestamp(&created_raw)?,
            image_data: None,
        })
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn init(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if state.closed {
            return Err(StoreError::Closed.into());
        }
        if state.client.is_some() {
            return Ok(());
        }

        info!(url = %self.url, "connecting to Qdrant");
        let mut builder = Qdrant::from_url(&self.url);
        if let Some(api_key) = &self.api_key {
            builder = builder.api_key(api_key.clone());
        }
        let client = builder.build().map_err(backend_err)?;

        self.ensure_collection(&client, Collection::Documents.name())
            .await?;
        self.ensure_collection(&client, Collection::Images.name())
            .await?;

        state.client = Some(Arc::new(client));
        info!(dimension = self.dimension, "Qdrant store ready");
        Ok(())
    }

    async fn upsert_chunks(&self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<()> {
        let client = self.client().await?;

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

        let mut points = Vec::with_capacity(chunks.len());
        for (chunk, embedding) in chunks.iter().zip(embeddings.iter()) {
            self.check_dimension(embedding)?;

            let mut payload: HashMap<String, QdrantValue> = HashMap::new();
            payload.insert("content".to_string(), json_to_qdrant(&json!(chunk.content)));
            for (key, value) in sanitize_metadata(&chunk.metadata) {
                payload.insert(key, json_to_qdrant(&value));
            }

            points.push(PointStruct {
                id: Some(point_id_for(&chunk.chunk_id)),
                vectors: Some(embedding.clone().into()),
                payload,
            });
        }

        client
            .upsert_points(UpsertPoints {
                collection_name: Collection::Documents.name().to_string(),
                wait: Some(true),
                points,
                ..Default::default()
            })
            .await
            .map_err(backend_err)?;

        info!(count = chunks.len(), "upserted chunks");
        Ok(())
    }

    async fn upsert_images(
        &self,
        images: &[ImageDocument],
        embeddings: &[Vec<f32>],
    ) -> Result<Vec<String>> {
        let client = self.client().await?;

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

        let mut points = Vec::with_capacity(images.len());
        let mut ids = Vec::with_capacity(images.len());
        for (image, embedding) in images.iter().zip(embeddings.iter()) {
            self.check_dimension(embedding)?;

            let mut payload: HashMap<String, QdrantValue> = HashMap::new();
            payload.insert("id".to_string(), json_to_qdrant(&json!(image.id)));
            payload.insert(
                "file_path".to_string(),
                json_to_qdrant(&json!(image.file_path.display().to_string())),
            );
            payload.insert(
                "file_name".to_string(),
                json_to_qdrant(&json!(image.file_name)),
            );
            payload.insert(
                "image_type".to_string(),
                json_to_qdrant(&json!(image.image_type)),
            );
            payload.insert("caption".to_string(), json_to_qdrant(&json!(image.caption)));
            payload.insert(
                "created_at".to_string(),
                json_to_qdrant(&json!(image.created_at.to_rfc3339())),
            );
            payload.insert("source".to_string(), json_to_qdrant(&json!("local")));
            for (key, value) in sanitize_metadata(&image.metadata) {
                payload.entry(key).or_insert_with(|| json_to_qdrant(&value));
            }

            points.push(PointStruct {
                id: Some(point_id_for(&image.id)),
                vectors: Some(embedding.clone().into()),
                payload,
            });
            ids.push(image.id.clone());
        }

        client
            .upsert_points(UpsertPoints {
                collection_name: Collection::Images.name().to_string(),
                wait: Some(true),
                points,
                ..Default::default()
            })
            .await
            .map_err(backend_err)?;

        info!(count = images.len(), "upserted images");
        Ok(ids)
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>> {
        let client = self.client().await?;
        self.check_dimension(query_embedding)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let (native, client_side) = filter.map(Self::split_filter).unwrap_or_default();
        let query_filter = (!native.is_empty()).then(|| QdrantFilter {
            must: native,
            ..Default::default()
        });
        let limit = if client_side.is_empty() {
            k
        } else {
            k * CLIENT_FILTER_FACTOR
        };

        debug!(k, "searching documents collection");
        let response = client
            .search_points(SearchPoints {
                collection_name: Collection::Documents.name().to_string(),
                vector: query_embedding.to_vec(),
                limit: limit as u64,
                filter: query_filter,
                with_payload: Some(true.into()),
                ..Default::default()
            })
            .await
            .map_err(backend_err)?;

        let mut results = Vec::new();
        for point in response.result {
            let metadata = payload_to_metadata(&point.payload);
            if !client_side.is_empty() && !matches_filter(&metadata, &client_side) {
                continue;
            }
            if results.len() >= k {
                break;
            }

            let chunk = Chunk::new(
                payload_str(&metadata, "content"),
                payload_str(&metadata, "chunk_id"),
                payload_str(&metadata, "document_id"),
                payload_usize(&metadata, "chunk_index"),
                payload_usize(&metadata, "start_char"),
                payload_usize(&metadata, "end_char"),
                metadata.clone(),
            );
            // Qdrant reports cosine similarity directly
            let score = clamp_score(point.score);
            results.push(SearchResult::text(
                chunk,
                score,
                payload_str_or(&metadata, "document_name", "Unknown"),
                payload_str_or(&metadata, "source", "Unknown"),
                results.len() + 1,
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
        let client = self.client().await?;
        self.check_dimension(query_embedding)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let (native, client_side) = filter.map(Self::split_filter).unwrap_or_default();
        let query_filter = (!native.is_empty()).then(|| QdrantFilter {
            must: native,
            ..Default::default()
        });
        let limit = if client_side.is_empty() {
            k
        } else {
            k * CLIENT_FILTER_FACTOR
        };

        debug!(k, "searching images collection");
        let response = client
            .search_points(SearchPoints {
                collection_name: Collection::Images.name().to_string(),
                vector: query_embedding.to_vec(),
                limit: limit as u64,
                filter: query_filter,
                with_payload: Some(true.into()),
                ..Default::default()
            })
            .await
            .map_err(backend_err)?;

        let mut results = Vec::new();
        for point in response.result {
            let metadata = payload_to_metadata(&point.payload);
            if !client_side.is_empty() && !matches_filter(&metadata, &client_side) {
                continue;
            }
            if results.len() >= k {
                break;
            }

            let score = clamp_score(point.score);
            results.push(SearchResult::image(
                payload_str(&metadata, "id"),
                payload_str(&metadata, "caption"),
                score,
                payload_str_or(&metadata, "file_name", "Unknown"),
                PathBuf::from(payload_str(&metadata, "file_path")),
                results.len() + 1,
                metadata,
            )?);
        }

        debug!(results = results.len(), "image search complete");
        Ok(results)
    }

    async fn delete(&self, selector: &DeleteSelector) -> Result<usize> {
        selector.validate()?;
        let client = self.client().await?;
        let collection = Collection::Documents.name();
        let before = self.collection_count(&client, collection).await?;

        match selector {
            DeleteSelector::ByDocumentId(document_id) => {
                info!(document_id = %document_id, "deleting document chunks");
                let filter = QdrantFilter {
                    must: vec![Condition::matches("document_id", document_id.clone())],
                    ..Default::default()
                };
                client
                    .delete_points(DeletePoints {
                        collection_name: collection.to_string(),
                        wait: Some(true),
                        points: Some(PointsSelector {
                            points_selector_one_of: Some(PointsSelectorOneOf::Filter(filter)),
                        }),
                        ..Default::default()
                    })
                    .await
                    .map_err(backend_err)?;
            }
            DeleteSelector::ByChunkIds(chunk_ids) => {
                info!(count = chunk_ids.len(), "deleting chunks by id");
                let ids: Vec<PointId> = chunk_ids.iter().map(|id| point_id_for(id)).collect();
                client
                    .delete_points(DeletePoints {
                        collection_name: collection.to_string(),
                        wait: Some(true),
                        points: Some(PointsSelector {
                            points_selector_one_of: Some(PointsSelectorOneOf::Points(
                                PointsIdsList { ids },
                            )),
                        }),
                        ..Default::default()
                    })
                    .await
                    .map_err(backend_err)?;
            }
            DeleteSelector::ByMetadata(filter) => {
                info!(?filter, "deleting chunks by metadata filter");
                let (native, client_side) = Self::split_filter(filter);
                if client_side.is_empty() {
                    let filter = QdrantFilter {
                        must: native,
                        ..Default::default()
                    };
                    client
                        .delete_points(DeletePoints {
                            collection_name: collection.to_string(),
                            wait: Some(true),
                            points: Some(PointsSelector {
                                points_selector_one_of: Some(PointsSelectorOneOf::Filter(filter)),
                            }),
                            ..Default::default()
                        })
                        .await
                        .map_err(backend_err)?;
                } else {
                    // Predicates Qdrant cannot match natively: scan and
                    // delete the matching ids
                    let points = self.scroll_all(&client, collection, None, None).await?;
                    let ids: Vec<PointId> = points
                        .into_iter()
                        .filter(|p| {
                            matches_filter(&payload_to_metadata(&p.payload), filter)
                        })
                        .filter_map(|p| p.id)
                        .collect();
                    if !ids.is_empty() {
                        client
                            .delete_points(DeletePoints {
                                collection_name: collection.to_string(),
                                wait: Some(true),
                                points: Some(PointsSelector {
                                    points_selector_one_of: Some(PointsSelectorOneOf::Points(
                                        PointsIdsList { ids },
                                    )),
                                }),
                                ..Default::default()
                            })
                            .await
                            .map_err(backend_err)?;
                    }
                }
            }
        }

        let after = self.collection_count(&client, collection).await?;
        let deleted = before.saturating_sub(after);
        info!(deleted, remaining = after, "chunk deletion complete");
        Ok(deleted)
    }

    async fn remove_image(&self, image_id: &str) -> Result<bool> {
        let client = self.client().await?;
        let collection = Collection::Images.name();

        let before = self.collection_count(&client, collection).await?;
        client
            .delete_points(DeletePoints {
                collection_name: collection.to_string(),
                wait: Some(true),
                points: Some(PointsSelector {
                    points_selector_one_of: Some(PointsSelectorOneOf::Points(PointsIdsList {
                        ids: vec![point_id_for(image_id)],
                    })),
                }),
                ..Default::default()
            })
            .await
            .map_err(backend_err)?;
        let after = self.collection_count(&client, collection).await?;

        let removed = after < before;
        if removed {
            info!(image_id = %image_id, "removed image");
        } else {
            warn!(image_id = %image_id, "image not found");
        }
        Ok(removed)
    }

    async fn list_documents(&self, limit: Option<usize>) -> Result<Vec<DocumentSummary>> {
        let client = self.client().await?;
        let points = self
            .scroll_all(&client, Collection::Documents.name(), None, None)
            .await?;

        let mut order: Vec<String> = Vec::new();
        let mut summaries: HashMap<String, DocumentSummary> = HashMap::new();

        for point in points {
            let metadata = payload_to_metadata(&point.payload);
            let document_id = payload_str_or(&metadata, "document_id", "unknown");

            let entry = summaries.entry(document_id.clone()).or_insert_with(|| {
                order.push(document_id.clone());
                DocumentSummary {
                    document_id: document_id.clone(),
                    document_name: payload_str_or(&metadata, "document_name", "Unknown"),
                    source: payload_str_or(&metadata, "source", "Unknown"),
                    doc_type: payload_str_or(&metadata, "doc_type", "Unknown"),
                    chunk_count: 0,
                    total_size: 0,
                }
            });
            entry.chunk_count += 1;
            entry.total_size += payload_usize(&metadata, "size");
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
        let client = self.client().await?;
        let points = self
            .scroll_all(&client, Collection::Images.name(), None, limit)
            .await?;

        let mut images = Vec::with_capacity(points.len());
        for point in points {
            images.push(Self::image_from_payload(&payload_to_metadata(
                &point.payload,
            ))?);
        }
        debug!(images = images.len(), "listed images");
        Ok(images)
    }

    async fn get_document_by_id(&self, document_id: &str) -> Result<Option<DocumentDetail>> {
        let client = self.client().await?;
        let filter = QdrantFilter {
            must: vec![Condition::matches("document_id", document_id.to_string())],
            ..Default::default()
        };
        let points = self
            .scroll_all(&client, Collection::Documents.name(), Some(filter), None)
            .await?;

        if points.is_empty() {
            return Ok(None);
        }

        let mut chunks: Vec<ChunkSummary> = Vec::with_capacity(points.len());
        let mut document_name = "Unknown".to_string();
        let mut source = "Unknown".to_string();
        let mut doc_type = "Unknown".to_string();

        for (i, point) in points.iter().enumerate() {
            let metadata = payload_to_metadata(&point.payload);
            if i == 0 {
                document_name = payload_str_or(&metadata, "document_name", "Unknown");
                source = payload_str_or(&metadata, "source", "Unknown");
                doc_type = payload_str_or(&metadata, "doc_type", "Unknown");
            }
            let content = payload_str(&metadata, "content");
            chunks.push(ChunkSummary {
                chunk_id: payload_str(&metadata, "chunk_id"),
                size: content.chars().count(),
                content,
                chunk_index: payload_usize(&metadata, "chunk_index"),
                start_char: payload_usize(&metadata, "start_char"),
                end_char: payload_usize(&metadata, "end_char"),
            });
        }
        chunks.sort_by_key(|c| c.chunk_index);

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
        let client = self.client().await?;
        let filter = QdrantFilter {
            must: vec![Condition::matches("id", image_id.to_string())],
            ..Default::default()
        };
        let points = self
            .scroll_all(&client, Collection::Images.name(), Some(filter), Some(1))
            .await?;

        match points.first() {
            Some(point) => Ok(Some(Self::image_from_payload(&payload_to_metadata(
                &point.payload,
            ))?)),
            None => Ok(None),
        }
    }

    async fn clear_collection(&self, collection: Collection) -> Result<()> {
        let client = self.client().await?;
        warn!(collection = collection.name(), "clearing collection");

        client
            .delete_collection(DeleteCollection {
                collection_name: collection.name().to_string(),
                ..Default::default()
            })
            .await
            .map_err(backend_err)?;
        self.ensure_collection(&client, collection.name()).await?;

        info!(collection = collection.name(), "collection recreated");
        Ok(())
    }

    async fn count(&self, collection: Collection) -> Result<usize> {
        let client = self.client().await?;
        self.collection_count(&client, collection.name()).await
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if state.closed {
            return Ok(());
        }
        state.client = None;
        state.closed = true;
        info!("Qdrant store closed");
        Ok(())
    }
}

fn backend_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Backend(format!("invalid stored timestamp '{raw}': {e}")).into())
}

/// Deterministic point id derived from the string chunk/image id
fn point_id_for(id: &str) -> PointId {
    let uuid = Uuid::new_v5(&Uuid::NAMESPACE_OID, id.as_bytes());
    PointId {
        point_id_options: Some(PointIdOptions::Uuid(uuid.to_string())),
    }
}

fn json_to_qdrant(value: &Value) -> QdrantValue {
    let kind = match value {
        Value::Null => Kind::NullValue(0),
        Value::Bool(b) => Kind::BoolValue(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Kind::IntegerValue(i),
            None => Kind::DoubleValue(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => Kind::StringValue(s.clone()),
        Value::Array(items) => Kind::ListValue(ListValue {
            values: items.iter().map(json_to_qdrant).collect(),
        }),
        Value::Object(map) => Kind::StructValue(Struct {
            fields: map
                .iter()
                .map(|(k, v)| (k.clone(), json_to_qdrant(v)))
                .collect(),
        }),
    };
    QdrantValue { kind: Some(kind) }
}

fn qdrant_to_json(value: &QdrantValue) -> Value {
    match &value.kind {
        Some(Kind::BoolValue(b)) => Value::Bool(*b),
        Some(Kind::IntegerValue(i)) => Value::Number((*i).into()),
        Some(Kind::DoubleValue(d)) => Number::from_f64(*d)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Some(Kind::StringValue(s)) => Value::String(s.clone()),
        Some(Kind::ListValue(list)) => {
            Value::Array(list.values.iter().map(qdrant_to_json).collect())
        }
        Some(Kind::StructValue(fields)) => Value::Object(
            fields
                .fields
                .iter()
                .map(|(k, v)| (k.clone(), qdrant_to_json(v)))
                .collect(),
        ),
        Some(Kind::NullValue(_)) | None => Value::Null,
    }
}

fn payload_to_metadata(payload: &HashMap<String, QdrantValue>) -> Metadata {
    payload
        .iter()
        .map(|(k, v)| (k.clone(), qdrant_to_json(v)))
        .collect()
}

fn custom_only(metadata: &Metadata) -> Metadata {
    const STRUCTURAL: [&str; 8] = [
        "id",
        "file_path",
        "file_name",
        "image_type",
        "caption",
        "created_at",
        "source",
        "content",
    ];
    metadata
        .iter()
        .filter(|(k, _)| !STRUCTURAL.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn payload_str(metadata: &Metadata, key: &str) -> String {
    metadata
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn payload_str_or(metadata: &Metadata, key: &str, default: &str) -> String {
    metadata
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

fn payload_usize(metadata: &Metadata, key: &str) -> usize {
    metadata.get(key).and_then(Value::as_u64).unwrap_or(0) as usize
}
