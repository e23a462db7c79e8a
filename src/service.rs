//! Document management facade shared by the CLI and the MCP server
//!
//! All ingestion and retrieval flows through this one service so both
//! surfaces behave identically.

use crate::config::RagConfig;
use crate::document::{is_image_file, DocumentLoader};
use crate::embedding::EmbeddingGenerator;
use crate::error::{IngestError, RagError, Result};
use crate::image::ImageLoader;
use crate::llm::LlmClient;
use crate::models::{DocumentDetail, DocumentSummary, ImageDocument, SearchResult};
use crate::retriever::Retriever;
use crate::store::{create_vector_store, Collection, DeleteSelector, VectorStore};
use crate::vision::VisionCaptioner;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of adding a text document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddedDocument {
    pub document_id: String,
    pub document_name: String,
    pub document_type: String,
    pub chunks_count: usize,
    pub total_size: usize,
}

/// Outcome of adding an image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddedImage {
    pub image_id: String,
    pub file_name: String,
    pub image_type: String,
    pub caption: String,
    pub tags: Vec<String>,
}

/// Outcome of `add_file`, by dispatched type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "item_type", rename_all = "lowercase")]
pub enum AddedItem {
    Document(AddedDocument),
    Image(AddedImage),
}

/// Combined listing over both collections
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentListing {
    pub documents: Vec<DocumentSummary>,
    pub images: Vec<ImageDocument>,
    pub total_count: usize,
}

/// Outcome of removing an item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemovedItem {
    pub item_type: String,
    pub item_id: String,
    pub name: String,
    /// Number of chunks removed; None for images
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_chunks: Option<usize>,
}

/// What kind of item a removal targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemType {
    Document,
    Image,
    Auto,
}

impl FromStr for ItemType {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "document" => Ok(ItemType::Document),
            "image" => Ok(ItemType::Image),
            "auto" => Ok(ItemType::Auto),
            other => Err(RagError::Config(format!(
                "item type must be document, image, or auto, got: {other}"
            ))),
        }
    }
}

/// A stored item fetched by id
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "item_type", rename_all = "lowercase")]
pub enum FoundItem {
    Document(DocumentDetail),
    Image(ImageDocument),
}

/// Outcome of clearing collections; partial failures are collected
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearOutcome {
    pub deleted_text_count: usize,
    pub deleted_image_count: usize,
    pub total_deleted: usize,
    pub errors: Vec<String>,
}

/// Summary of a directory ingestion pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryIngestOutcome {
    pub added: Vec<AddedImage>,
    pub skipped: usize,
    pub errors: Vec<String>,
}

/// Counts and configuration of the running service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub backend: String,
    pub embedding_model: String,
    pub total_chunks: usize,
    pub unique_documents: usize,
    pub total_images: usize,
}

/// Facade combining ingest, search, listing, removal, and clearing
pub struct DocumentService {
    store: Arc<dyn VectorStore>,
    backend: String,
    loader: DocumentLoader,
    embedder: Arc<EmbeddingGenerator>,
    captioner: Arc<VisionCaptioner>,
    image_loader: ImageLoader,
    retriever: Retriever,
}

impl DocumentService {
    /// Build the full stack: probe the embedding dimension, select and
    /// initialize the store, verify the vision model
    pub async fn new(config: &RagConfig, client: Arc<dyn LlmClient>) -> Result<Self> {
        let embedder = Arc::new(EmbeddingGenerator::new(config, Arc::clone(&client)));
        let dimension = embedder.dimension().await?;
        let store: Arc<dyn VectorStore> = Arc::from(create_vector_store(config, dimension)?);
        store.init().await?;
        Self::with_store(config, client, store, embedder).await
    }

    /// Build over an existing (initialized) store
    pub async fn with_store(
        config: &RagConfig,
        client: Arc<dyn LlmClient>,
        store: Arc<dyn VectorStore>,
        embedder: Arc<EmbeddingGenerator>,
    ) -> Result<Self> {
        let captioner = Arc::new(
            VisionCaptioner::new(config, Arc::clone(&client), Arc::clone(&embedder)).await?,
        );
        let image_loader = ImageLoader::new(config, Arc::clone(&captioner));
        let retriever = Retriever::new(Arc::clone(&embedder), Arc::clone(&store));

        info!("document service ready");
        Ok(Self {
            store,
            backend: config.store.backend.clone(),
            loader: DocumentLoader::new(config),
            embedder,
            captioner,
            image_loader,
            retriever,
        })
    }

    /// Counts and configuration of the running service
    pub async fn status(&self) -> Result<ServiceStatus> {
        let total_chunks = self.store.count(Collection::Documents).await?;
        let total_images = self.store.count(Collection::Images).await?;
        let unique_documents = self.store.list_documents(None).await?.len();

        Ok(ServiceStatus {
            backend: self.backend.clone(),
            embedding_model: self.embedder.model().to_string(),
            total_chunks,
            unique_documents,
            total_images,
        })
    }

    /// Shared vector store handle
    pub fn store(&self) -> Arc<dyn VectorStore> {
        Arc::clone(&self.store)
    }

    /// Shared embedding generator
    pub fn embedder(&self) -> Arc<EmbeddingGenerator> {
        Arc::clone(&self.embedder)
    }

    /// Add a file, routing by extension to the image or text path
    ///
    /// Directories are rejected at this layer.
    pub async fn add_file(
        &self,
        path: &Path,
        caption: Option<String>,
        tags: Option<Vec<String>>,
    ) -> Result<AddedItem> {
        if !path.exists() {
            return Err(IngestError::FileNotFound(path.display().to_string()).into());
        }
        if path.is_dir() {
            return Err(IngestError::IsADirectory(path.display().to_string()).into());
        }

        if is_image_file(path) {
            Ok(AddedItem::Image(self.add_image_file(path, caption, tags).await?))
        } else {
            Ok(AddedItem::Document(self.add_document_file(path, None).await?))
        }
    }

    /// Add a text document: load, chunk, embed, upsert
    pub async fn add_document_file(
        &self,
        path: &Path,
        document_id: Option<String>,
    ) -> Result<AddedDocument> {
        info!(path = %path.display(), "adding text document");

        let (document, chunks) = self.loader.process_document(path, document_id)?;
        if chunks.is_empty() {
            return Err(IngestError::FileEmpty(path.display().to_string()).into());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self.embedder.embed_documents(&texts).await?;
        self.store.upsert_chunks(&chunks, &embeddings).await?;

        info!(document = %document.name, chunks = chunks.len(), "document added");
        let total_size = document.size();
        Ok(AddedDocument {
            document_id: chunks[0].document_id.clone(),
            document_name: document.name,
            document_type: document.doc_type,
            chunks_count: chunks.len(),
            total_size,
        })
    }

    /// Add an image: validate, caption, caption-then-embed, upsert
    pub async fn add_image_file(
        &self,
        path: &Path,
        caption: Option<String>,
        tags: Option<Vec<String>>,
    ) -> Result<AddedImage> {
        info!(path = %path.display(), "adding image");

        let image = self
            .image_loader
            .load_image(path, caption, tags, false)
            .await?;
        let embedding = self.captioner.embed_image(&image.file_path).await?;
        let ids = self.store.upsert_images(&[image.clone()], &[embedding]).await?;

        info!(image = %image.file_name, "image added");
        Ok(AddedImage {
            image_id: ids.into_iter().next().unwrap_or_else(|| image.id.clone()),
            file_name: image.file_name,
            image_type: image.image_type,
            caption: image.caption,
            tags: image_tags(&image.metadata),
        })
    }

    /// Ingest every supported image under a directory, isolating per-file
    /// failures into the summary
    pub async fn add_images_from_directory(
        &self,
        dir_path: &Path,
        recursive: bool,
        tags: Option<Vec<String>>,
    ) -> Result<DirectoryIngestOutcome> {
        let loaded = self
            .image_loader
            .load_directory(dir_path, recursive, tags)
            .await?;

        let mut outcome = DirectoryIngestOutcome {
            added: Vec::new(),
            skipped: loaded.failed.len(),
            errors: loaded
                .failed
                .iter()
                .map(|(path, reason)| format!("{}: {reason}", path.display()))
                .collect(),
        };

        for image in loaded.loaded {
            let stored = async {
                let embedding = self.captioner.embed_image(&image.file_path).await?;
                self.store.upsert_images(&[image.clone()], &[embedding]).await
            }
            .await;

            match stored {
                Ok(_) => outcome.added.push(AddedImage {
                    image_id: image.id.clone(),
                    file_name: image.file_name.clone(),
                    image_type: image.image_type.clone(),
                    caption: image.caption.clone(),
                    tags: image_tags(&image.metadata),
                }),
                Err(e) => {
                    warn!(image = %image.file_name, error = %e, "skipping image");
                    outcome.skipped += 1;
                    outcome.errors.push(format!("{}: {e}", image.file_name));
                }
            }
        }

        info!(
            added = outcome.added.len(),
            skipped = outcome.skipped,
            "directory ingestion complete"
        );
        Ok(outcome)
    }

    /// List stored documents, optionally with images
    ///
    /// A failure on one side degrades to an empty list for that side.
    pub async fn list_documents(
        &self,
        limit: Option<usize>,
        include_images: bool,
    ) -> Result<DocumentListing> {
        let documents = match self.store.list_documents(limit).await {
            Ok(documents) => documents,
            Err(e) => {
                warn!(error = %e, "document listing failed");
                Vec::new()
            }
        };

        let images = if include_images {
            match self.store.list_images(limit).await {
                Ok(images) => images,
                Err(e) => {
                    warn!(error = %e, "image listing failed");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let total_count = documents.len() + images.len();
        Ok(DocumentListing {
            documents,
            images,
            total_count,
        })
    }

    /// Remove a document or image by id
    ///
    /// `Auto` tries the document collection first, then images; an explicit
    /// type fails directly when the item is missing from that collection.
    pub async fn remove_document(&self, item_id: &str, item_type: ItemType) -> Result<RemovedItem> {
        info!(item_id = %item_id, ?item_type, "removal requested");

        if matches!(item_type, ItemType::Document | ItemType::Auto) {
            match self.store.get_document_by_id(item_id).await {
                Ok(Some(detail)) => {
                    let deleted = self
                        .store
                        .delete(&DeleteSelector::ByDocumentId(item_id.to_string()))
                        .await?;
                    info!(document = %detail.document_name, deleted, "document removed");
                    return Ok(RemovedItem {
                        item_type: "document".to_string(),
                        item_id: item_id.to_string(),
                        name: detail.document_name,
                        deleted_chunks: Some(deleted),
                    });
                }
                Ok(None) => {}
                Err(e) if item_type == ItemType::Document => return Err(e),
                Err(e) => warn!(error = %e, "document lookup failed, trying image"),
            }
        }

        if matches!(item_type, ItemType::Image | ItemType::Auto) {
            match self.store.get_image_by_id(item_id).await {
                Ok(Some(image)) => {
                    if self.store.remove_image(item_id).await? {
                        info!(image = %image.file_name, "image removed");
                        return Ok(RemovedItem {
                            item_type: "image".to_string(),
                            item_id: item_id.to_string(),
                            name: image.file_name,
                            deleted_chunks: None,
                        });
                    }
                }
                Ok(None) => {}
                Err(e) if item_type == ItemType::Image => return Err(e),
                Err(e) => warn!(error = %e, "image lookup failed"),
            }
        }

        Err(RagError::NotFound(item_id.to_string()))
    }

    /// Semantic search over the documents collection
    pub async fn search_documents(&self, query: &str, k: usize) -> Result<Vec<SearchResult>> {
        self.retriever.retrieve(query, k, None).await
    }

    /// Semantic search over the images collection with a text query
    pub async fn search_images(&self, query: &str, k: usize) -> Result<Vec<SearchResult>> {
        self.retriever.retrieve_images(query, k, None).await
    }

    /// Fetch a stored item by id, documents first
    pub async fn get_document_by_id(&self, document_id: &str) -> Result<FoundItem> {
        if let Some(detail) = self.store.get_document_by_id(document_id).await? {
            return Ok(FoundItem::Document(detail));
        }
        if let Some(image) = self.store.get_image_by_id(document_id).await? {
            return Ok(FoundItem::Image(image));
        }
        Err(RagError::NotFound(document_id.to_string()))
    }

    /// Clear the selected collections; per-side failures are collected
    pub async fn clear_documents(&self, clear_text: bool, clear_images: bool) -> Result<ClearOutcome> {
        warn!(clear_text, clear_images, "clearing stored documents");

        let mut outcome = ClearOutcome {
            deleted_text_count: 0,
            deleted_image_count: 0,
            total_deleted: 0,
            errors: Vec::new(),
        };

        if clear_text {
            match self.store.list_documents(None).await {
                Ok(documents) => match self.store.clear_collection(Collection::Documents).await {
                    Ok(()) => outcome.deleted_text_count = documents.len(),
                    Err(e) => outcome.errors.push(format!("documents: {e}")),
                },
                Err(e) => outcome.errors.push(format!("documents: {e}")),
            }
        }

        if clear_images {
            match self.store.list_images(None).await {
                Ok(images) => match self.store.clear_collection(Collection::Images).await {
                    Ok(()) => outcome.deleted_image_count = images.len(),
                    Err(e) => outcome.errors.push(format!("images: {e}")),
                },
                Err(e) => outcome.errors.push(format!("images: {e}")),
            }
        }

        outcome.total_deleted = outcome.deleted_text_count + outcome.deleted_image_count;
        info!(
            total = outcome.total_deleted,
            errors = outcome.errors.len(),
            "clear complete"
        );
        Ok(outcome)
    }

    /// Release the backing store; mandatory on shutdown
    pub async fn close(&self) -> Result<()> {
        self.store.close().await
    }
}

fn image_tags(metadata: &crate::models::Metadata) -> Vec<String> {
    match metadata.get("tags") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        _ => Vec::new(),
    }
}
