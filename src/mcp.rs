//! MCP (Model Context Protocol) server over stdio JSON-RPC
//!
//! Exposes the document service as MCP tools and resources. Tool handlers
//! never propagate errors: every response is a JSON object with a `success`
//! flag, carrying the error kind when something went wrong.

use crate::error::RagError;
use crate::service::{AddedItem, DocumentService, FoundItem, ItemType};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, warn};

const PROTOCOL_VERSION: &str = "2024-11-05";
const SERVER_NAME: &str = "local-rag";

/// JSON-RPC 2.0 request
#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

/// JSON-RPC 2.0 response
#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

impl JsonRpcResponse {
    fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn failure(id: Value, code: i64, message: String) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError { code, message }),
        }
    }
}

/// MCP server dispatching tool and resource calls into the service facade
pub struct McpServer {
    service: Arc<DocumentService>,
}

impl McpServer {
    pub fn new(service: Arc<DocumentService>) -> Self {
        Self { service }
    }

    /// Serve JSON-RPC requests over stdin/stdout until EOF
    pub async fn run_stdio(&self) -> crate::error::Result<()> {
        info!("MCP server listening on stdio");
        let stdin = tokio::io::stdin();
        let mut stdout = tokio::io::stdout();
        let mut lines = BufReader::new(stdin).lines();

        while let Some(line) = lines.next_line().await? {
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            if let Some(response) = self.handle_line(&line).await {
                let mut payload = serde_json::to_vec(&response)?;
                payload.push(b'\n');
                stdout.write_all(&payload).await?;
                stdout.flush().await?;
            }
        }

        info!("MCP stdin closed, shutting down");
        Ok(())
    }

    async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let request: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "unparseable JSON-RPC request");
                return Some(JsonRpcResponse::failure(
                    Value::Null,
                    -32700,
                    format!("parse error: {e}"),
                ));
            }
        };

        debug!(method = %request.method, "handling request");
        let id = request.id.clone();
        let result = self.dispatch(&request).await;

        // Notifications (no id) get no response
        let id = id?;
        Some(match result {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err((code, message)) => JsonRpcResponse::failure(id, code, message),
        })
    }

    async fn dispatch(&self, request: &JsonRpcRequest) -> Result<Value, (i64, String)> {
        match request.method.as_str() {
            "initialize" => Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {}, "resources": {} },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": crate::VERSION,
                },
            })),
            "ping" => Ok(json!({})),
            "notifications/initialized" => Ok(Value::Null),
            "tools/list" => Ok(json!({ "tools": tool_definitions() })),
            "tools/call" => {
                let name = request.params["name"].as_str().unwrap_or_default();
                let arguments = request.params.get("arguments").cloned().unwrap_or(json!({}));
                let result = self.handle_tool_call(name, &arguments).await;
                let text = serde_json::to_string_pretty(&result)
                    .unwrap_or_else(|_| result.to_string());
                Ok(json!({
                    "content": [{ "type": "text", "text": text }],
                    "isError": !result["success"].as_bool().unwrap_or(false),
                }))
            }
            "resources/list" => Ok(json!({
                "resources": [{
                    "uri": "resource://documents/list",
                    "name": "Document list",
                    "description": "All documents and images registered in the RAG store",
                    "mimeType": "application/json",
                }]
            })),
            "resources/read" => {
                let uri = request.params["uri"].as_str().unwrap_or_default();
                let result = self.handle_resource_read(uri).await;
                let text = serde_json::to_string_pretty(&result)
                    .unwrap_or_else(|_| result.to_string());
                Ok(json!({
                    "contents": [{
                        "uri": uri,
                        "mimeType": "application/json",
                        "text": text,
                    }]
                }))
            }
            other => Err((-32601, format!("method not found: {other}"))),
        }
    }

    /// Execute one tool; the returned object always carries `success`
    pub async fn handle_tool_call(&self, name: &str, arguments: &Value) -> Value {
        match name {
            "add_document" => self.tool_add_document(arguments).await,
            "list_documents" => self.tool_list_documents(arguments).await,
            "search" => self.tool_search(arguments).await,
            "search_images" => self.tool_search_images(arguments).await,
            "remove_document" => self.tool_remove_document(arguments).await,
            "clear_documents" => self.tool_clear_documents(arguments).await,
            other => {
                error!(tool = other, "unknown tool");
                json!({
                    "success": false,
                    "error": "UnknownTool",
                    "message": format!("unknown tool: {other}"),
                })
            }
        }
    }

    async fn tool_add_document(&self, arguments: &Value) -> Value {
        let Some(file_path) = arguments["file_path"].as_str() else {
            return missing_argument("file_path");
        };
        let caption = arguments["caption"].as_str().map(String::from);
        let tags = arguments["tags"].as_array().map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect::<Vec<_>>()
        });

        match self
            .service
            .add_file(std::path::Path::new(file_path), caption, tags)
            .await
        {
            Ok(AddedItem::Document(d)) => json!({
                "success": true,
                "item_type": "document",
                "document_id": d.document_id,
                "document_name": d.document_name,
                "document_type": d.document_type,
                "chunks_count": d.chunks_count,
                "total_size": d.total_size,
                "message": format!("Added document '{}'", d.document_name),
            }),
            Ok(AddedItem::Image(i)) => json!({
                "success": true,
                "item_type": "image",
                "image_id": i.image_id,
                "file_name": i.file_name,
                "image_type": i.image_type,
                "caption": i.caption,
                "tags": i.tags,
                "message": format!("Added image '{}'", i.file_name),
            }),
            Err(e) => error_response(&e),
        }
    }

    async fn tool_list_documents(&self, arguments: &Value) -> Value {
        let limit = arguments["limit"].as_u64().map(|v| v as usize);
        let include_images = arguments["include_images"].as_bool().unwrap_or(true);

        match self.service.list_documents(limit, include_images).await {
            Ok(listing) => json!({
                "success": true,
                "documents": listing.documents,
                "images": listing.images,
                "total_count": listing.total_count,
                "message": format!("Found {} items", listing.total_count),
            }),
            Err(e) => error_response(&e),
        }
    }

    async fn tool_search(&self, arguments: &Value) -> Value {
        let Some(query) = arguments["query"].as_str() else {
            return missing_argument("query");
        };
        let top_k = arguments["top_k"].as_u64().unwrap_or(5) as usize;

        match self.service.search_documents(query, top_k).await {
            Ok(hits) => {
                let results: Vec<Value> = hits
                    .iter()
                    .map(|hit| {
                        json!({
                            "content": hit.chunk.content,
                            "score": hit.score,
                            "rank": hit.rank,
                            "document_name": hit.document_name,
                            "document_id": hit.chunk.document_id,
                            "chunk_index": hit.chunk.chunk_index,
                            "metadata": hit.metadata,
                        })
                    })
                    .collect();
                json!({
                    "success": true,
                    "query": query,
                    "results": results,
                    "count": results.len(),
                    "message": format!("Found {} results", results.len()),
                })
            }
            Err(e) => error_response(&e),
        }
    }

    async fn tool_search_images(&self, arguments: &Value) -> Value {
        let Some(query) = arguments["query"].as_str() else {
            return missing_argument("query");
        };
        let top_k = arguments["top_k"].as_u64().unwrap_or(5) as usize;

        match self.service.search_images(query, top_k).await {
            Ok(hits) => {
                let results: Vec<Value> = hits
                    .iter()
                    .map(|hit| {
                        json!({
                            "image_id": hit.chunk.chunk_id,
                            "file_name": hit.document_name,
                            "file_path": hit
                                .image_path
                                .as_ref()
                                .map(|p| p.display().to_string())
                                .unwrap_or_else(|| hit.document_source.clone()),
                            "caption": hit.caption,
                            "score": hit.score,
                            "rank": hit.rank,
                            "metadata": hit.metadata,
                        })
                    })
                    .collect();
                json!({
                    "success": true,
                    "query": query,
                    "results": results,
                    "count": results.len(),
                    "message": format!("Found {} images", results.len()),
                })
            }
            Err(e) => error_response(&e),
        }
    }

    async fn tool_remove_document(&self, arguments: &Value) -> Value {
        let Some(item_id) = arguments["item_id"].as_str() else {
            return missing_argument("item_id");
        };
        let item_type = match ItemType::from_str(arguments["item_type"].as_str().unwrap_or("auto"))
        {
            Ok(item_type) => item_type,
            Err(e) => return error_response(&e),
        };

        match self.service.remove_document(item_id, item_type).await {
            Ok(removed) => json!({
                "success": true,
                "item_type": removed.item_type,
                "item_id": removed.item_id,
                "name": removed.name,
                "deleted_chunks": removed.deleted_chunks,
                "message": format!("Removed {} '{}'", removed.item_type, removed.name),
            }),
            Err(e) => error_response(&e),
        }
    }

    async fn tool_clear_documents(&self, arguments: &Value) -> Value {
        let clear_text = arguments["clear_text"].as_bool().unwrap_or(true);
        let clear_images = arguments["clear_images"].as_bool().unwrap_or(true);

        match self.service.clear_documents(clear_text, clear_images).await {
            Ok(outcome) => json!({
                "success": outcome.errors.is_empty(),
                "deleted_text_count": outcome.deleted_text_count,
                "deleted_image_count": outcome.deleted_image_count,
                "total_deleted": outcome.total_deleted,
                "errors": outcome.errors,
                "message": format!("Deleted {} items", outcome.total_deleted),
            }),
            Err(e) => error_response(&e),
        }
    }

    /// Read one resource; errors come back as a `success: false` object
    pub async fn handle_resource_read(&self, uri: &str) -> Value {
        if uri == "resource://documents/list" {
            return match self.service.list_documents(None, true).await {
                Ok(listing) => json!({
                    "success": true,
                    "documents": listing.documents,
                    "images": listing.images,
                    "total_count": listing.total_count,
                }),
                Err(e) => error_response(&e),
            };
        }

        if let Some(id) = uri.strip_prefix("resource://documents/") {
            return match self.service.get_document_by_id(id).await {
                Ok(FoundItem::Document(detail)) => json!({
                    "success": true,
                    "item_type": "document",
                    "document": detail,
                }),
                Ok(FoundItem::Image(image)) => json!({
                    "success": true,
                    "item_type": "image",
                    "image": image,
                }),
                Err(e) => error_response(&e),
            };
        }

        json!({
            "success": false,
            "error": "UnknownResource",
            "message": format!("unknown resource uri: {uri}"),
        })
    }
}

fn tool_definitions() -> Vec<Value> {
    vec![
        json!({
            "name": "add_document",
            "description": "Add a text document or image file to the RAG store. Images are captioned and indexed for text search.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "file_path": { "type": "string", "description": "Path of the file to add" },
                    "caption": { "type": "string", "description": "Manual caption for image files" },
                    "tags": { "type": "array", "items": { "type": "string" }, "description": "Tags attached to image files" }
                },
                "required": ["file_path"]
            }
        }),
        json!({
            "name": "list_documents",
            "description": "List documents registered in the RAG store, including images.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "limit": { "type": "integer", "minimum": 1, "description": "Maximum number of entries to return" },
                    "include_images": { "type": "boolean", "default": true, "description": "Include images in the listing" }
                }
            }
        }),
        json!({
            "name": "search",
            "description": "Semantic search over stored text documents.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search query" },
                    "top_k": { "type": "integer", "minimum": 1, "default": 5, "description": "Maximum number of results" }
                },
                "required": ["query"]
            }
        }),
        json!({
            "name": "search_images",
            "description": "Search stored images by text query over their captions.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search query" },
                    "top_k": { "type": "integer", "minimum": 1, "default": 5, "description": "Maximum number of results" }
                },
                "required": ["query"]
            }
        }),
        json!({
            "name": "remove_document",
            "description": "Remove a document or image by id.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "item_id": { "type": "string", "description": "Document or image id" },
                    "item_type": { "type": "string", "enum": ["document", "image", "auto"], "default": "auto" }
                },
                "required": ["item_id"]
            }
        }),
        json!({
            "name": "clear_documents",
            "description": "Delete all stored documents and/or images.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "clear_text": { "type": "boolean", "default": true },
                    "clear_images": { "type": "boolean", "default": true }
                }
            }
        }),
    ]
}

fn error_response(error: &RagError) -> Value {
    let mut response = json!({
        "success": false,
        "error": error.kind(),
        "message": error.to_string(),
    });
    if let Some(hint) = error.remediation() {
        response["hint"] = json!(hint);
    }
    response
}

fn missing_argument(name: &str) -> Value {
    json!({
        "success": false,
        "error": "InvalidArguments",
        "message": format!("missing required argument: {name}"),
    })
}
