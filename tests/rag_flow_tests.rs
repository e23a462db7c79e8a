//! End-to-end RAG flows over the embedded store with a deterministic
//! fake model backend

use async_trait::async_trait;
use local_rag::config::RagConfig;
use local_rag::embedding::EmbeddingGenerator;
use local_rag::engine::RagEngine;
use local_rag::error::Result;
use local_rag::llm::{
    EmbeddingResponse, GenerationResponse, LlmClient, Message,
};
use local_rag::multimodal::MultimodalRagEngine;
use local_rag::retriever::Retriever;
use local_rag::service::{AddedItem, DocumentService, ItemType};
use local_rag::store::{EmbeddedVectorStore, VectorStore};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

const DIM: usize = 32;

/// Word-bucket embedding: each word lands in one dimension, so texts that
/// share words have positive cosine similarity
fn word_embedding(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    for word in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let bucket: usize = word.bytes().map(|b| b as usize).sum::<usize>() % DIM;
        v[bucket] += 1.0;
    }
    if v.iter().all(|x| *x == 0.0) {
        v[0] = 1.0;
    }
    v
}

/// Fake Ollama backend: word-bucket embeddings, fixed captions for images,
/// echo-style answers for text chat
struct FakeOllama {
    caption: String,
}

impl FakeOllama {
    fn new(caption: &str) -> Self {
        Self {
            caption: caption.to_string(),
        }
    }
}

#[async_trait]
impl LlmClient for FakeOllama {
    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        _max_tokens: Option<u32>,
    ) -> Result<GenerationResponse> {
        let text = if messages[0].images.is_some() {
            self.caption.clone()
        } else {
            "generated answer".to_string()
        };
        Ok(GenerationResponse {
            text,
            tokens_used: None,
            model: model.to_string(),
            finish_reason: Some("stop".to_string()),
        })
    }

    async fn embed(&self, model: &str, text: &str) -> Result<EmbeddingResponse> {
        Ok(EmbeddingResponse {
            embedding: word_embedding(text),
            model: model.to_string(),
        })
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(vec![
            "gpt-oss".to_string(),
            "nomic-embed-text".to_string(),
            "llava:latest".to_string(),
            "gemma3".to_string(),
        ])
    }

    async fn is_model_available(&self, model: &str) -> Result<bool> {
        Ok(self.list_models().await?.iter().any(|m| m == model))
    }
}

fn test_config() -> RagConfig {
    let mut config = RagConfig::default();
    config.chunking.chunk_size = 100;
    config.chunking.chunk_overlap = 20;
    config
}

async fn service_with(caption: &str) -> (DocumentService, Arc<dyn LlmClient>) {
    let config = test_config();
    let client: Arc<dyn LlmClient> = Arc::new(FakeOllama::new(caption));
    let embedder = Arc::new(EmbeddingGenerator::new(&config, Arc::clone(&client)));
    let store = EmbeddedVectorStore::in_memory(DIM);
    store.init().await.unwrap();
    let service = DocumentService::with_store(&config, Arc::clone(&client), Arc::new(store), embedder)
        .await
        .unwrap();
    (service, client)
}

fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    path
}

/// A ~400 character document about Python
fn python_text() -> String {
    "Python is a language. It has simple syntax. ".repeat(9)
}

#[tokio::test]
async fn test_ingest_one_text_file_then_search() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "python.txt", &python_text());
    let (service, _) = service_with("unused").await;

    let added = service.add_file(&path, None, None).await.unwrap();
    let document = match added {
        AddedItem::Document(d) => d,
        other => panic!("expected a document, got {other:?}"),
    };
    assert!(
        document.chunks_count >= 4,
        "expected at least 4 chunks, got {}",
        document.chunks_count
    );

    let hits = service.search_documents("Python", 1).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].chunk.content.contains("Python"));
    assert!(hits[0].score > 0.0);

    service.close().await.unwrap();
}

#[tokio::test]
async fn test_delete_document_by_id() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "python.txt", &python_text());
    let (service, _) = service_with("unused").await;

    let added = match service.add_file(&path, None, None).await.unwrap() {
        AddedItem::Document(d) => d,
        _ => unreachable!(),
    };

    let removed = service
        .remove_document(&added.document_id, ItemType::Document)
        .await
        .unwrap();
    assert_eq!(removed.deleted_chunks, Some(added.chunks_count));

    let listing = service.list_documents(None, false).await.unwrap();
    assert!(listing
        .documents
        .iter()
        .all(|d| d.document_id != added.document_id));

    // No hit for the deleted document survives any search
    let hits = service.search_documents("Python", 10).await.unwrap();
    assert!(hits
        .iter()
        .all(|h| h.chunk.document_id != added.document_id));

    service.close().await.unwrap();
}

#[tokio::test]
async fn test_caption_driven_image_search() {
    let dir = TempDir::new().unwrap();
    let image_path = write_file(&dir, "red.png", "fake png bytes");
    let (service, _) = service_with("A solid red color square").await;

    let added = match service.add_file(&image_path, None, None).await.unwrap() {
        AddedItem::Image(i) => i,
        _ => unreachable!(),
    };
    assert!(added.caption.contains("red"));

    let hits = service.search_images("red color", 3).await.unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].chunk.chunk_id, added.image_id);
    assert!(
        hits[0].score > 0.3,
        "expected score above 0.3, got {}",
        hits[0].score
    );

    service.close().await.unwrap();
}

#[tokio::test]
async fn test_multimodal_fusion_weight_ordering() {
    let dir = TempDir::new().unwrap();
    let doc_path = write_file(&dir, "prog.txt", "Python programming");
    let image_path = write_file(&dir, "shot.png", "fake png bytes");
    let (service, client) = service_with("Python code on screen").await;

    service.add_file(&doc_path, None, None).await.unwrap();
    service.add_file(&image_path, None, None).await.unwrap();

    let config = test_config();
    let engine = MultimodalRagEngine::new(
        &config,
        service.store(),
        service.embedder(),
        client,
        None,
    )
    .await
    .unwrap();

    let text_heavy = engine
        .search_multimodal("Python", 2, Some(0.9), Some(0.1))
        .await
        .unwrap();
    assert_eq!(text_heavy.len(), 2);
    assert_eq!(
        text_heavy[0].result_type,
        local_rag::models::ResultType::Text
    );
    assert_eq!(text_heavy[0].rank, 1);
    assert!(text_heavy[0].score >= text_heavy[1].score);

    let image_heavy = engine
        .search_multimodal("Python", 2, Some(0.1), Some(0.9))
        .await
        .unwrap();
    assert_eq!(
        image_heavy[0].result_type,
        local_rag::models::ResultType::Image
    );

    service.close().await.unwrap();
}

#[tokio::test]
async fn test_chat_history_retention() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "python.txt", &python_text());
    let (service, client) = service_with("unused").await;
    service.add_file(&path, None, None).await.unwrap();

    let config = test_config();
    let retriever = Retriever::new(service.embedder(), service.store());
    let mut engine = RagEngine::new(&config, retriever, client, Some(4));

    engine.chat("first question", 3, None, false).await.unwrap();
    engine.chat("second question", 3, None, false).await.unwrap();
    let answer = engine.chat("third question", 3, None, false).await.unwrap();

    assert_eq!(answer.history_length, Some(4));
    let messages = &engine.chat_history().messages;
    assert_eq!(messages[0].content, "second question");
    assert_eq!(messages[2].content, "third question");

    service.close().await.unwrap();
}

#[tokio::test]
async fn test_mismatched_batch_leaves_store_unchanged() {
    let store = EmbeddedVectorStore::in_memory(DIM);
    store.init().await.unwrap();

    let chunk = local_rag::models::Chunk::new(
        "one chunk".to_string(),
        "d_chunk_0000".to_string(),
        "d".to_string(),
        0,
        0,
        9,
        local_rag::models::Metadata::new(),
    );
    let second = local_rag::models::Chunk::new(
        "two chunk".to_string(),
        "d_chunk_0001".to_string(),
        "d".to_string(),
        1,
        9,
        18,
        local_rag::models::Metadata::new(),
    );

    let err = store
        .upsert_chunks(&[chunk, second], &[word_embedding("only one vector")])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "LengthMismatch");
    assert_eq!(
        store
            .count(local_rag::store::Collection::Documents)
            .await
            .unwrap(),
        0
    );

    store.close().await.unwrap();
}

#[tokio::test]
async fn test_list_then_get_round_trip_counts() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "python.txt", &python_text());
    let (service, _) = service_with("unused").await;
    service.add_file(&path, None, None).await.unwrap();

    let listing = service.list_documents(None, false).await.unwrap();
    assert_eq!(listing.documents.len(), 1);
    let summary = &listing.documents[0];

    let found = service
        .get_document_by_id(&summary.document_id)
        .await
        .unwrap();
    match found {
        local_rag::service::FoundItem::Document(detail) => {
            assert_eq!(detail.chunk_count, summary.chunk_count);
            assert_eq!(detail.total_size, summary.total_size);
            let indices: Vec<usize> = detail.chunks.iter().map(|c| c.chunk_index).collect();
            let mut sorted = indices.clone();
            sorted.sort();
            assert_eq!(indices, sorted);
        }
        other => panic!("expected document detail, got {other:?}"),
    }

    service.close().await.unwrap();
}

#[tokio::test]
async fn test_multimodal_query_uses_retrieved_images() {
    let dir = TempDir::new().unwrap();
    let image_path = write_file(&dir, "diagram.png", "fake png bytes");
    let (service, client) = service_with("An architecture diagram with arrows").await;
    service.add_file(&image_path, None, None).await.unwrap();

    let config = test_config();
    let engine = MultimodalRagEngine::new(
        &config,
        service.store(),
        service.embedder(),
        client,
        None,
    )
    .await
    .unwrap();

    let answer = engine
        .query_with_images("architecture diagram", None, 3, None, true)
        .await
        .unwrap();
    // The stored image still exists on disk, so it was forwarded
    assert_eq!(answer.images_used, Some(1));
    assert_eq!(answer.context_count, 1);

    service.close().await.unwrap();
}
