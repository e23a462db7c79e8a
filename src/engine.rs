//! Text-only RAG engine: retrieve, assemble a grounded prompt, generate

use crate::config::RagConfig;
use crate::error::{RagError, Result};
use crate::llm::{user_message, LlmClient, Role};
use crate::models::{ChatHistory, Metadata, ResultType, SearchResult};
use crate::retriever::Retriever;
use crate::store::Filter;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

/// System preamble: answer from context only, admit when it is missing
pub const DEFAULT_SYSTEM_PROMPT: &str = "あなたは親切で知識豊富なアシスタントです。\n\
与えられたコンテキスト情報に基づいて、ユーザーの質問に正確に答えてください。\n\
コンテキストに情報がない場合は、正直にそう伝えてください。";

/// Q&A template with `{context}` and `{question}` slots
pub const DEFAULT_QA_TEMPLATE: &str = "コンテキスト情報:\n{context}\n\n質問: {question}\n\n\
上記のコンテキスト情報に基づいて質問に答えてください。\n\
コンテキストに関連情報がない場合は、「提供された情報では回答できません」と答えてください。\n\n回答:";

const NO_CONTEXT_NOTICE: &str = "関連する情報が見つかりませんでした。";
const DEFAULT_MAX_CHAT_HISTORY: usize = 10;

/// One deduplicated provenance entry on an answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub name: String,
    pub source: String,
    pub score: f32,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub result_type: Option<ResultType>,
}

/// A generated answer with its grounding facts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub answer: String,
    pub context_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<SourceRef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images_used: Option<usize>,
}

/// Retrieval-augmented question answering with optional chat history
///
/// Not safe for concurrent calls on one instance: `chat` mutates the
/// history. Give each session its own engine.
pub struct RagEngine {
    retriever: Retriever,
    llm: Arc<dyn LlmClient>,
    llm_model: String,
    max_tokens: u32,
    chat_history: ChatHistory,
}

impl RagEngine {
    pub fn new(
        config: &RagConfig,
        retriever: Retriever,
        llm: Arc<dyn LlmClient>,
        max_chat_history: Option<usize>,
    ) -> Self {
        let max = max_chat_history.unwrap_or(DEFAULT_MAX_CHAT_HISTORY);
        info!(model = %config.ollama.llm_model, "RAG engine initialized");
        Self {
            retriever,
            llm,
            llm_model: config.ollama.llm_model.clone(),
            max_tokens: config.ollama.max_tokens,
            chat_history: ChatHistory::new(Some(max)),
        }
    }

    /// Retrieve context for a question
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>> {
        self.retriever.retrieve(query, k, filter).await
    }

    /// Answer a single question from retrieved context
    pub async fn query(
        &self,
        question: &str,
        k: usize,
        filter: Option<&Filter>,
        include_sources: bool,
    ) -> Result<Answer> {
        if question.trim().is_empty() {
            return Err(RagError::QuestionEmpty);
        }

        let hits = self.retriever.retrieve(question, k, filter).await?;
        self.generate_answer(question, &hits, None, include_sources)
            .await
    }

    /// Generate an answer from already retrieved context
    ///
    /// `qa_template` overrides the default template; it receives the same
    /// `{context}` and `{question}` slots.
    pub async fn generate_answer(
        &self,
        question: &str,
        context_hits: &[SearchResult],
        qa_template: Option<&str>,
        include_sources: bool,
    ) -> Result<Answer> {
        if question.trim().is_empty() {
            return Err(RagError::QuestionEmpty);
        }

        let context_text = render_context(context_hits);
        let prompt = qa_template
            .unwrap_or(DEFAULT_QA_TEMPLATE)
            .replace("{context}", &context_text)
            .replace("{question}", question);
        debug!(prompt_len = prompt.chars().count(), "assembled QA prompt");

        let response = self
            .llm
            .chat(&self.llm_model, &[user_message(prompt)], Some(self.max_tokens))
            .await
            .map_err(RagError::generation)?;

        info!(context_count = context_hits.len(), "answer generated");
        Ok(Answer {
            answer: response.text,
            context_count: context_hits.len(),
            sources: include_sources.then(|| collect_sources(context_hits, false)),
            history_length: None,
            images_used: None,
        })
    }

    /// Answer in chat mode, retaining bounded history
    ///
    /// The user turn is recorded before retrieval; when generation fails it
    /// stays in the log with no assistant turn, so the caller can retry.
    pub async fn chat(
        &mut self,
        message: &str,
        k: usize,
        filter: Option<&Filter>,
        include_sources: bool,
    ) -> Result<Answer> {
        if message.trim().is_empty() {
            return Err(RagError::QuestionEmpty);
        }

        self.chat_history
            .add_message(Role::User, message, Metadata::new());

        let hits = self.retriever.retrieve(message, k, filter).await?;
        let context_text = render_context(&hits);

        let mut prompt_parts = vec![DEFAULT_SYSTEM_PROMPT.to_string()];
        if self.chat_history.len() > 1 {
            prompt_parts.push("\n過去の会話:".to_string());
            for turn in &self.chat_history.messages[..self.chat_history.len() - 1] {
                prompt_parts.push(format!("{}: {}", turn.role, turn.content));
            }
        }
        prompt_parts.push(format!("\nコンテキスト情報:\n{context_text}"));
        prompt_parts.push(format!("\n質問: {message}"));
        prompt_parts
            .push("\n上記のコンテキスト情報と会話履歴に基づいて質問に答えてください。\n\n回答:".to_string());
        let prompt = prompt_parts.join("\n");

        let response = self
            .llm
            .chat(&self.llm_model, &[user_message(prompt)], Some(self.max_tokens))
            .await
            .map_err(RagError::generation)?;

        let mut turn_metadata = Metadata::new();
        turn_metadata.insert("context_count".to_string(), json!(hits.len()));
        self.chat_history
            .add_message(Role::Assistant, response.text.clone(), turn_metadata);

        info!(
            context_count = hits.len(),
            history = self.chat_history.len(),
            "chat answer generated"
        );
        Ok(Answer {
            answer: response.text,
            context_count: hits.len(),
            sources: include_sources.then(|| collect_sources(&hits, false)),
            history_length: Some(self.chat_history.len()),
            images_used: None,
        })
    }

    /// Drop all chat turns
    pub fn clear_chat_history(&mut self) {
        self.chat_history.clear();
        info!("chat history cleared");
    }

    /// Current chat history
    pub fn chat_history(&self) -> &ChatHistory {
        &self.chat_history
    }
}

/// Number retrieved hits `[1], [2], …` with a name header then content
pub(crate) fn render_context(hits: &[SearchResult]) -> String {
    if hits.is_empty() {
        return NO_CONTEXT_NOTICE.to_string();
    }
    let parts: Vec<String> = hits
        .iter()
        .enumerate()
        .map(|(i, hit)| format!("[{}] {}\n{}\n", i + 1, hit.document_name, hit.chunk.content))
        .collect();
    parts.join("\n")
}

/// Deduplicate hits by source, preserving first-occurrence order
pub(crate) fn collect_sources(hits: &[SearchResult], with_type: bool) -> Vec<SourceRef> {
    let mut seen = std::collections::HashSet::new();
    let mut sources = Vec::new();
    for hit in hits {
        if seen.insert(hit.document_source.clone()) {
            sources.push(SourceRef {
                name: hit.document_name.clone(),
                source: hit.document_source.clone(),
                score: hit.score,
                result_type: with_type.then_some(hit.result_type),
            });
        }
    }
    sources
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingGenerator;
    use crate::llm::{EmbeddingResponse, GenerationResponse, MockLlmClient};
    use crate::models::Chunk;
    use crate::store::{EmbeddedVectorStore, VectorStore};

    const DIM: usize = 4;

    fn chunk(doc: &str, index: usize, content: &str) -> Chunk {
        let mut metadata = Metadata::new();
        metadata.insert("document_name".to_string(), json!(format!("{doc}.txt")));
        metadata.insert("source".to_string(), json!(format!("/tmp/{doc}.txt")));
        metadata.insert("doc_type".to_string(), json!("txt"));
        Chunk::new(
            content.to_string(),
            format!("{doc}_chunk_{index:04}"),
            doc.to_string(),
            index,
            0,
            content.chars().count(),
            metadata,
        )
    }

    async fn engine_with(mock: MockLlmClient, max_history: Option<usize>) -> RagEngine {
        let config = RagConfig::default();
        let client: Arc<dyn LlmClient> = Arc::new(mock);
        let embedder = Arc::new(EmbeddingGenerator::new(&config, Arc::clone(&client)));

        let store = EmbeddedVectorStore::in_memory(DIM);
        store.init().await.unwrap();
        store
            .upsert_chunks(
                &[
                    chunk("python", 0, "Python is a programming language."),
                    chunk("rust", 0, "Rust is a systems language."),
                ],
                &[vec![1.0, 0.0, 0.0, 0.0], vec![0.0, 1.0, 0.0, 0.0]],
            )
            .await
            .unwrap();

        let retriever = Retriever::new(embedder, Arc::new(store));
        RagEngine::new(&config, retriever, client, max_history)
    }

    fn mock_embed(mock: &mut MockLlmClient) {
        mock.expect_embed().returning(|model, _| {
            Ok(EmbeddingResponse {
                embedding: vec![1.0, 0.0, 0.0, 0.0],
                model: model.to_string(),
            })
        });
    }

    fn generation(text: &str) -> GenerationResponse {
        GenerationResponse {
            text: text.to_string(),
            tokens_used: Some(5),
            model: "gpt-oss".to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }

    #[tokio::test]
    async fn test_query_builds_grounded_prompt() {
        let mut mock = MockLlmClient::new();
        mock_embed(&mut mock);
        mock.expect_chat()
            .withf(|model, messages, _| {
                let prompt = &messages[0].content;
                model == "gpt-oss"
                    && prompt.contains("コンテキスト情報:")
                    && prompt.contains("[1] python.txt")
                    && prompt.contains("Python is a programming language.")
                    && prompt.contains("質問: What is Python?")
            })
            .times(1)
            .returning(|_, _, _| Ok(generation("Python is a programming language.")));

        let engine = engine_with(mock, None).await;
        let answer = engine.query("What is Python?", 2, None, true).await.unwrap();

        assert_eq!(answer.answer, "Python is a programming language.");
        assert_eq!(answer.context_count, 2);
        let sources = answer.sources.unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].source, "/tmp/python.txt");
        assert!(answer.history_length.is_none());
    }

    #[tokio::test]
    async fn test_empty_question_rejected() {
        let engine = engine_with(MockLlmClient::new(), None).await;
        let err = engine.query("  ", 3, None, false).await.unwrap_err();
        assert_eq!(err.kind(), "QuestionEmpty");
    }

    #[tokio::test]
    async fn test_custom_template_override() {
        let mut mock = MockLlmClient::new();
        mock_embed(&mut mock);
        mock.expect_chat()
            .withf(|_, messages, _| {
                let prompt = &messages[0].content;
                prompt.starts_with("Answer briefly.") && prompt.contains("Q: why?")
            })
            .times(1)
            .returning(|_, _, _| Ok(generation("because")));

        let engine = engine_with(mock, None).await;
        let hits = engine.retrieve("why", 1, None).await.unwrap();
        let answer = engine
            .generate_answer(
                "why?",
                &hits,
                Some("Answer briefly.\n{context}\nQ: {question}"),
                false,
            )
            .await
            .unwrap();
        assert_eq!(answer.answer, "because");
        assert_eq!(answer.context_count, 1);
    }

    #[tokio::test]
    async fn test_generation_failure_is_wrapped() {
        let mut mock = MockLlmClient::new();
        mock_embed(&mut mock);
        mock.expect_chat().returning(|_, _, _| {
            Err(crate::error::LlmError::GenerationFailed("model crashed".to_string()).into())
        });

        let engine = engine_with(mock, None).await;
        let err = engine.query("What is Python?", 2, None, false).await.unwrap_err();
        assert_eq!(err.kind(), "GenerationFailed");
    }

    #[tokio::test]
    async fn test_chat_retains_bounded_history() {
        let mut mock = MockLlmClient::new();
        mock_embed(&mut mock);
        mock.expect_chat()
            .times(3)
            .returning(|_, _, _| Ok(generation("the answer")));

        let mut engine = engine_with(mock, Some(4)).await;
        engine.chat("first question", 2, None, false).await.unwrap();
        engine.chat("second question", 2, None, false).await.unwrap();
        let answer = engine.chat("third question", 2, None, false).await.unwrap();

        // 6 turns appended, cap 4: first user/assistant pair evicted
        assert_eq!(answer.history_length, Some(4));
        let messages = &engine.chat_history().messages;
        assert_eq!(messages[0].content, "second question");
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[2].content, "third question");
        assert_eq!(messages[3].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_chat_prompt_includes_prior_turns() {
        let mut mock = MockLlmClient::new();
        mock_embed(&mut mock);
        mock.expect_chat()
            .times(1)
            .returning(|_, _, _| Ok(generation("hello")));
        mock.expect_chat()
            .withf(|_, messages, _| {
                let prompt = &messages[0].content;
                prompt.contains("過去の会話:")
                    && prompt.contains("user: hi there")
                    && prompt.contains("assistant: hello")
                    && !prompt.contains("過去の会話:\nuser: follow-up")
            })
            .times(1)
            .returning(|_, _, _| Ok(generation("again")));

        let mut engine = engine_with(mock, None).await;
        engine.chat("hi there", 2, None, false).await.unwrap();
        engine.chat("follow-up", 2, None, false).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_generation_keeps_user_turn_only() {
        let mut mock = MockLlmClient::new();
        mock_embed(&mut mock);
        mock.expect_chat().returning(|_, _, _| {
            Err(crate::error::LlmError::Timeout.into())
        });

        let mut engine = engine_with(mock, None).await;
        let err = engine.chat("doomed question", 2, None, false).await.unwrap_err();
        assert_eq!(err.kind(), "GenerationFailed");

        let messages = &engine.chat_history().messages;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "doomed question");
    }

    #[test]
    fn test_render_context_empty_and_numbered() {
        assert_eq!(render_context(&[]), NO_CONTEXT_NOTICE);
    }

    #[tokio::test]
    async fn test_sources_deduplicated_by_source() {
        let hits = vec![
            SearchResult::text(
                chunk("python", 0, "a"),
                0.9,
                "python.txt".to_string(),
                "/tmp/python.txt".to_string(),
                1,
            )
            .unwrap(),
            SearchResult::text(
                chunk("python", 1, "b"),
                0.8,
                "python.txt".to_string(),
                "/tmp/python.txt".to_string(),
                2,
            )
            .unwrap(),
            SearchResult::text(
                chunk("rust", 0, "c"),
                0.7,
                "rust.txt".to_string(),
                "/tmp/rust.txt".to_string(),
                3,
            )
            .unwrap(),
        ];

        let sources = collect_sources(&hits, false);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].source, "/tmp/python.txt");
        assert_eq!(sources[0].score, 0.9);
        assert_eq!(sources[1].source, "/tmp/rust.txt");
    }
}
