//! Thin CLI over the RAG document service and engines
//!
//! Exit codes: 0 success, 1 error, 130 user interrupt.

use local_rag::{
    AddedItem, DocumentService, FoundItem, ItemType, McpServer, MultimodalRagEngine, OllamaClient,
    RagConfig, RagEngine, RagError, Retriever,
};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

const USAGE: &str = "\
Usage: ragctl <command> [options]

Commands:
  add <path> [--caption TEXT] [--tags a,b,c]   Add a document or image
  add-dir <path> [--recursive] [--tags a,b]    Add every image in a directory
  list [--limit N] [--no-images]               List stored documents
  get <id>                                     Show one document or image
  search <query> [--top-k N]                   Search text documents
  search-images <query> [--top-k N]            Search images by text
  query <question> [--top-k N] [--no-sources]  Ask a question over documents
  multimodal <question> [--image PATH ...]     Ask with text+image context
  chat                                         Interactive chat session
  remove <id> [--type document|image|auto]     Remove a document or image
  clear [--text-only | --images-only]          Delete stored items
  status                                       Show store counts and config
  mcp                                          Serve MCP over stdio

Configuration comes from environment variables or a .env file
(OLLAMA_BASE_URL, VECTOR_DB_TYPE, CHUNK_SIZE, ...).";

#[tokio::main]
async fn main() {
    let code = run().await;
    std::process::exit(code);
}

async fn run() -> i32 {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() || args[0] == "--help" || args[0] == "-h" {
        println!("{USAGE}");
        return 0;
    }

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => return fail(&e),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.tracing_directive().into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match dispatch(&config, &args).await {
        Ok(code) => code,
        Err(e) => fail(&e),
    }
}

fn load_config() -> Result<RagConfig, RagError> {
    if Path::new(".env").exists() {
        RagConfig::from_env_file(".env")
    } else {
        RagConfig::from_env()
    }
}

async fn dispatch(config: &RagConfig, args: &[String]) -> Result<i32, RagError> {
    let command = args[0].as_str();
    let rest = &args[1..];

    match command {
        "add" => cmd_add(config, rest).await,
        "add-dir" => cmd_add_dir(config, rest).await,
        "list" => cmd_list(config, rest).await,
        "get" => cmd_get(config, rest).await,
        "search" => cmd_search(config, rest, false).await,
        "search-images" => cmd_search(config, rest, true).await,
        "query" => cmd_query(config, rest).await,
        "multimodal" => cmd_multimodal(config, rest).await,
        "chat" => cmd_chat(config).await,
        "remove" => cmd_remove(config, rest).await,
        "clear" => cmd_clear(config, rest).await,
        "status" => cmd_status(config).await,
        "mcp" => cmd_mcp(config).await,
        other => {
            eprintln!("unknown command: {other}\n\n{USAGE}");
            Ok(1)
        }
    }
}

async fn build_service(config: &RagConfig) -> Result<DocumentService, RagError> {
    let client = Arc::new(OllamaClient::new(&config.ollama)?);
    DocumentService::new(config, client).await
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn flag_values(args: &[String], flag: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag {
            if let Some(value) = args.get(i + 1) {
                values.push(value.clone());
                i += 1;
            }
        }
        i += 1;
    }
    values
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

fn positional(args: &[String]) -> Option<&String> {
    args.iter().find(|a| !a.starts_with("--"))
}

fn parse_tags(args: &[String]) -> Option<Vec<String>> {
    flag_value(args, "--tags").map(|raw| {
        raw.split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    })
}

fn top_k(args: &[String], default: usize) -> usize {
    flag_value(args, "--top-k")
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

async fn cmd_add(config: &RagConfig, args: &[String]) -> Result<i32, RagError> {
    let Some(path) = positional(args) else {
        eprintln!("add: missing file path");
        return Ok(1);
    };

    let service = build_service(config).await?;
    let result = service
        .add_file(
            Path::new(path),
            flag_value(args, "--caption"),
            parse_tags(args),
        )
        .await;
    service.close().await?;

    match result? {
        AddedItem::Document(d) => {
            println!(
                "✓ Added document '{}' ({} chunks, {} chars, id: {})",
                d.document_name, d.chunks_count, d.total_size, d.document_id
            );
        }
        AddedItem::Image(i) => {
            println!("✓ Added image '{}' (id: {})", i.file_name, i.image_id);
            println!("  caption: {}", i.caption);
        }
    }
    Ok(0)
}

async fn cmd_add_dir(config: &RagConfig, args: &[String]) -> Result<i32, RagError> {
    let Some(path) = positional(args) else {
        eprintln!("add-dir: missing directory path");
        return Ok(1);
    };

    let service = build_service(config).await?;
    let outcome = service
        .add_images_from_directory(Path::new(path), has_flag(args, "--recursive"), parse_tags(args))
        .await;
    service.close().await?;
    let outcome = outcome?;

    println!(
        "✓ Added {} images, skipped {}",
        outcome.added.len(),
        outcome.skipped
    );
    for error in &outcome.errors {
        eprintln!("  skipped: {error}");
    }
    // Success as long as something was ingested
    Ok(if outcome.added.is_empty() && !outcome.errors.is_empty() {
        1
    } else {
        0
    })
}

async fn cmd_list(config: &RagConfig, args: &[String]) -> Result<i32, RagError> {
    let limit = flag_value(args, "--limit").and_then(|v| v.parse().ok());
    let include_images = !has_flag(args, "--no-images");

    let service = build_service(config).await?;
    let listing = service.list_documents(limit, include_images).await;
    service.close().await?;
    let listing = listing?;

    if listing.total_count == 0 {
        println!("no documents stored");
        return Ok(0);
    }

    if !listing.documents.is_empty() {
        println!("Documents:");
        for doc in &listing.documents {
            println!(
                "  {}  {} ({}, {} chunks, {} chars)",
                doc.document_id, doc.document_name, doc.doc_type, doc.chunk_count, doc.total_size
            );
        }
    }
    if !listing.images.is_empty() {
        println!("Images:");
        for image in &listing.images {
            println!("  {}  {} ({})", image.id, image.file_name, image.image_type);
        }
    }
    println!("{} items total", listing.total_count);
    Ok(0)
}

async fn cmd_get(config: &RagConfig, args: &[String]) -> Result<i32, RagError> {
    let Some(id) = positional(args) else {
        eprintln!("get: missing id");
        return Ok(1);
    };

    let service = build_service(config).await?;
    let found = service.get_document_by_id(id).await;
    service.close().await?;

    match found? {
        FoundItem::Document(detail) => {
            println!(
                "{} ({}, {} chunks, {} chars)",
                detail.document_name, detail.doc_type, detail.chunk_count, detail.total_size
            );
            for chunk in &detail.chunks {
                println!("--- chunk {} [{}..{}]", chunk.chunk_index, chunk.start_char, chunk.end_char);
                println!("{}", chunk.content);
            }
        }
        FoundItem::Image(image) => {
            println!("{} ({})", image.file_name, image.image_type);
            println!("path: {}", image.file_path.display());
            println!("caption: {}", image.caption);
        }
    }
    Ok(0)
}

async fn cmd_search(config: &RagConfig, args: &[String], images: bool) -> Result<i32, RagError> {
    let Some(query) = positional(args) else {
        eprintln!("search: missing query");
        return Ok(1);
    };
    let k = top_k(args, 5);

    let service = build_service(config).await?;
    let hits = if images {
        service.search_images(query, k).await
    } else {
        service.search_documents(query, k).await
    };
    service.close().await?;
    let hits = hits?;

    if hits.is_empty() {
        println!("no results");
        return Ok(0);
    }
    for hit in &hits {
        println!("[{}] {} (score: {:.3})", hit.rank, hit.document_name, hit.score);
        if images {
            if let Some(caption) = &hit.caption {
                println!("    {caption}");
            }
        } else {
            let preview: String = hit.chunk.content.chars().take(120).collect();
            println!("    {preview}");
        }
    }
    Ok(0)
}

async fn cmd_query(config: &RagConfig, args: &[String]) -> Result<i32, RagError> {
    let Some(question) = positional(args) else {
        eprintln!("query: missing question");
        return Ok(1);
    };
    let k = top_k(args, 5);
    let include_sources = !has_flag(args, "--no-sources");

    let service = build_service(config).await?;
    let client = Arc::new(OllamaClient::new(&config.ollama)?);
    let retriever = Retriever::new(service.embedder(), service.store());
    let engine = RagEngine::new(config, retriever, client, None);

    let answer = engine.query(question, k, None, include_sources).await;
    service.close().await?;
    let answer = answer?;

    println!("{}", answer.answer);
    print_sources(answer.sources.as_deref());
    Ok(0)
}

async fn cmd_multimodal(config: &RagConfig, args: &[String]) -> Result<i32, RagError> {
    let Some(question) = positional(args) else {
        eprintln!("multimodal: missing question");
        return Ok(1);
    };
    let k = top_k(args, 5);
    let images: Vec<PathBuf> = flag_values(args, "--image")
        .into_iter()
        .map(PathBuf::from)
        .collect();

    let service = build_service(config).await?;
    let client = Arc::new(OllamaClient::new(&config.ollama)?);
    let engine = MultimodalRagEngine::new(
        config,
        service.store(),
        service.embedder(),
        client,
        None,
    )
    .await?;

    let answer = engine
        .query_with_images(
            question,
            (!images.is_empty()).then_some(images.as_slice()),
            k,
            None,
            true,
        )
        .await;
    service.close().await?;
    let answer = answer?;

    println!("{}", answer.answer);
    if let Some(used) = answer.images_used {
        println!("({used} images considered)");
    }
    print_sources(answer.sources.as_deref());
    Ok(0)
}

async fn cmd_chat(config: &RagConfig) -> Result<i32, RagError> {
    let service = build_service(config).await?;
    let client = Arc::new(OllamaClient::new(&config.ollama)?);
    let retriever = Retriever::new(service.embedder(), service.store());
    let mut engine = RagEngine::new(config, retriever, client, None);

    println!("chat mode, empty line or Ctrl-C to exit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                service.close().await?;
                return Ok(130);
            }
        };

        let Some(line) = line else { break };
        let message = line.trim();
        if message.is_empty() {
            break;
        }

        match engine.chat(message, 3, None, true).await {
            Ok(answer) => {
                println!("{}", answer.answer);
                print_sources(answer.sources.as_deref());
            }
            Err(e) => {
                print_error(&e);
                if !e.is_retryable() {
                    service.close().await?;
                    return Ok(1);
                }
            }
        }
    }

    service.close().await?;
    Ok(0)
}

async fn cmd_remove(config: &RagConfig, args: &[String]) -> Result<i32, RagError> {
    let Some(id) = positional(args) else {
        eprintln!("remove: missing id");
        return Ok(1);
    };
    let item_type = match flag_value(args, "--type") {
        Some(raw) => ItemType::from_str(&raw)?,
        None => ItemType::Auto,
    };

    let service = build_service(config).await?;
    let removed = service.remove_document(id, item_type).await;
    service.close().await?;
    let removed = removed?;

    match removed.deleted_chunks {
        Some(chunks) => println!("✓ Removed document '{}' ({chunks} chunks)", removed.name),
        None => println!("✓ Removed image '{}'", removed.name),
    }
    Ok(0)
}

async fn cmd_clear(config: &RagConfig, args: &[String]) -> Result<i32, RagError> {
    let clear_text = !has_flag(args, "--images-only");
    let clear_images = !has_flag(args, "--text-only");

    let service = build_service(config).await?;
    let outcome = service.clear_documents(clear_text, clear_images).await;
    service.close().await?;
    let outcome = outcome?;

    println!(
        "✓ Deleted {} items ({} documents, {} images)",
        outcome.total_deleted, outcome.deleted_text_count, outcome.deleted_image_count
    );
    for error in &outcome.errors {
        eprintln!("  error: {error}");
    }
    Ok(if outcome.errors.is_empty() { 0 } else { 1 })
}

async fn cmd_status(config: &RagConfig) -> Result<i32, RagError> {
    let service = build_service(config).await?;
    let status = service.status().await;
    service.close().await?;
    let status = status?;

    println!("backend:          {}", status.backend);
    println!("embedding model:  {}", status.embedding_model);
    println!("documents:        {}", status.unique_documents);
    println!("chunks:           {}", status.total_chunks);
    println!("images:           {}", status.total_images);
    Ok(0)
}

async fn cmd_mcp(config: &RagConfig) -> Result<i32, RagError> {
    let service = Arc::new(build_service(config).await?);
    let server = McpServer::new(Arc::clone(&service));

    tokio::select! {
        result = server.run_stdio() => {
            service.close().await?;
            result?;
            Ok(0)
        }
        _ = tokio::signal::ctrl_c() => {
            service.close().await?;
            Ok(130)
        }
    }
}

fn print_sources(sources: Option<&[local_rag::SourceRef]>) {
    if let Some(sources) = sources {
        if !sources.is_empty() {
            println!("sources:");
            for source in sources {
                println!("  - {} ({:.3})", source.source, source.score);
            }
        }
    }
}

fn print_error(error: &RagError) {
    eprintln!("\x1b[31m✗ {}: {}\x1b[0m", error.kind(), error);
    if let Some(hint) = error.remediation() {
        eprintln!("  {hint}");
    }
}

fn fail(error: &RagError) -> i32 {
    print_error(error);
    1
}
