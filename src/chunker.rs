//! Recursive character splitting of documents into overlapping chunks

use crate::config::ChunkingConfig;
use crate::models::{Chunk, Document, Metadata};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Candidate separators, coarsest first; the empty string marks the hard
/// character-slice fallback
const SEPARATORS: [&str; 6] = ["\n\n", "\n", "。", ".", " ", ""];

/// Splits document text into overlapping chunks with stable ids
///
/// Sizes and offsets are measured in characters, not bytes or tokens.
pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextChunker {
    pub fn new(config: &ChunkingConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
        }
    }

    /// Split text into chunks of at most `chunk_size` characters
    ///
    /// Walks the separator list coarsest-to-finest, greedily packs the
    /// resulting fragments, and carries the last `chunk_overlap` characters
    /// of each chunk into the next. Every produced chunk is a contiguous
    /// substring of the input.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }
        if char_len(text) <= self.chunk_size {
            return vec![text.to_string()];
        }

        let units = self.split_units(text, 0);
        let chunks = self.merge_units(units);
        debug!(
            chunks = chunks.len(),
            chunk_size = self.chunk_size,
            "split text into chunks"
        );
        chunks
    }

    /// Break text into contiguous fragments no longer than `chunk_size`
    fn split_units(&self, text: &str, separator_index: usize) -> Vec<String> {
        if char_len(text) <= self.chunk_size {
            return vec![text.to_string()];
        }

        let separator = SEPARATORS[separator_index];
        if separator.is_empty() {
            return self.hard_slices(text);
        }
        if !text.contains(separator) {
            return self.split_units(text, separator_index + 1);
        }

        let mut units = Vec::new();
        for piece in split_keep_separator(text, separator) {
            if char_len(&piece) <= self.chunk_size {
                units.push(piece);
            } else {
                units.extend(self.split_units(&piece, separator_index + 1));
            }
        }
        units
    }

    /// Fallback when no separator yields small enough pieces: slice at
    /// character boundaries, leaving room for the overlap carry
    fn hard_slices(&self, text: &str) -> Vec<String> {
        let window = (self.chunk_size - self.chunk_overlap).max(1);
        let chars: Vec<char> = text.chars().collect();
        chars
            .chunks(window)
            .map(|w| w.iter().collect())
            .collect()
    }

    /// Greedily pack contiguous units into chunks, carrying the overlap
    /// suffix of each emitted chunk as the prefix of the next
    fn merge_units(&self, units: Vec<String>) -> Vec<String> {
        let mut chunks: Vec<String> = Vec::new();
        let mut current = String::new();
        let mut current_len = 0usize;

        for unit in units {
            let unit_len = char_len(&unit);
            if current_len > 0 && current_len + unit_len > self.chunk_size {
                chunks.push(std::mem::take(&mut current));
                // The carry must leave room for the next unit inside chunk_size
                let room = self.chunk_size.saturating_sub(unit_len);
                let carry_len = self.chunk_overlap.min(room);
                let emitted = chunks.last().map(String::as_str).unwrap_or("");
                current = tail_chars(emitted, carry_len).to_string();
                current_len = char_len(&current);
            }
            current.push_str(&unit);
            current_len += unit_len;
        }

        if !current.is_empty() {
            chunks.push(current);
        }
        chunks.retain(|c| !c.trim().is_empty());
        chunks
    }

    /// Split a document into chunks with ids, offsets, and metadata
    pub fn create_chunks(&self, document: &Document, document_id: Option<String>) -> Vec<Chunk> {
        let document_id =
            document_id.unwrap_or_else(|| generate_document_id(&document.source, document));
        let pieces = self.split_text(&document.content);

        let mut chunks = Vec::with_capacity(pieces.len());
        // Byte cursor just past the start of the previous match; the
        // first-match policy can mis-locate repeated content, so offsets
        // are advisory.
        let mut search_from = 0usize;

        for (chunk_index, piece) in pieces.into_iter().enumerate() {
            let start_byte = document.content[search_from..]
                .find(&piece)
                .map(|pos| search_from + pos);

            let start_char = match start_byte {
                Some(byte_pos) => {
                    search_from = byte_pos + piece.chars().next().map_or(0, char::len_utf8);
                    char_len(&document.content[..byte_pos])
                }
                None => char_len(&document.content[..search_from]),
            };
            let end_char = start_char + char_len(&piece);

            let mut metadata: Metadata = document.metadata.clone();
            metadata.insert("document_name".to_string(), json!(document.name));
            metadata.insert("source".to_string(), json!(document.source));
            metadata.insert("doc_type".to_string(), json!(document.doc_type));
            metadata.insert(
                "timestamp".to_string(),
                json!(document.timestamp.to_rfc3339()),
            );

            chunks.push(Chunk::new(
                piece,
                chunk_id(&document_id, chunk_index),
                document_id.clone(),
                chunk_index,
                start_char,
                end_char,
                metadata,
            ));
        }

        chunks
    }
}

/// 16-hex-char document id from source path and timestamp
pub fn generate_document_id(source: &str, document: &Document) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(b"_");
    hasher.update(document.timestamp.to_rfc3339().as_bytes());
    let digest = hasher.finalize();
    hex_prefix(&digest, 16)
}

/// Chunk id: `<doc-id>_chunk_<4-digit-index>`
fn chunk_id(document_id: &str, chunk_index: usize) -> String {
    format!("{document_id}_chunk_{chunk_index:04}")
}

pub(crate) fn hex_prefix(digest: &[u8], len: usize) -> String {
    let mut out = String::with_capacity(len);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
        if out.len() >= len {
            break;
        }
    }
    out.truncate(len);
    out
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Last `n` characters of a string, respecting char boundaries
fn tail_chars(s: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    let total = char_len(s);
    if total <= n {
        return s;
    }
    let skip = total - n;
    match s.char_indices().nth(skip) {
        Some((byte_idx, _)) => &s[byte_idx..],
        None => "",
    }
}

/// Split on a separator, keeping the separator attached to the preceding
/// piece so concatenation reproduces the input
fn split_keep_separator(text: &str, separator: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut rest = text;
    while let Some(pos) = rest.find(separator) {
        let end = pos + separator.len();
        parts.push(rest[..end].to_string());
        rest = &rest[end..];
    }
    if !rest.is_empty() {
        parts.push(rest.to_string());
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::path::PathBuf;

    fn chunker(chunk_size: usize, chunk_overlap: usize) -> TextChunker {
        TextChunker::new(&ChunkingConfig {
            chunk_size,
            chunk_overlap,
        })
    }

    fn document(content: &str) -> Document {
        Document {
            file_path: PathBuf::from("/tmp/sample.txt"),
            name: "sample.txt".to_string(),
            content: content.to_string(),
            doc_type: "txt".to_string(),
            source: "/tmp/sample.txt".to_string(),
            timestamp: Utc::now(),
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        assert!(chunker(100, 20).split_text("").is_empty());
    }

    #[test]
    fn test_short_input_yields_single_chunk() {
        let text = "This is a short text.";
        let chunks = chunker(100, 20).split_text(text);
        assert_eq!(chunks, vec![text.to_string()]);
    }

    #[test]
    fn test_long_text_respects_chunk_size() {
        let text = "This is sentence one. This is sentence two. This is sentence three. \
                    This is sentence four. This is sentence five."
            .repeat(4);
        let chunks = chunker(100, 20).split_text(&text);

        assert!(chunks.len() > 1, "long text should be chunked");
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 100, "oversized chunk: {chunk:?}");
        }
    }

    #[test]
    fn test_chunks_are_substrings_of_source() {
        let text = "Paragraph one about databases.\n\nParagraph two about indexing. \
                    More words follow here to force splitting into several pieces."
            .repeat(3);
        let chunks = chunker(60, 10).split_text(&text);
        for chunk in &chunks {
            assert!(text.contains(chunk), "chunk not found in source: {chunk:?}");
        }
    }

    #[test]
    fn test_consecutive_chunks_overlap() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda mu \
                    nu xi omicron pi rho sigma tau upsilon phi chi psi omega";
        let overlap = 10;
        let chunks = chunker(40, overlap).split_text(text);
        assert!(chunks.len() > 1);

        for pair in chunks.windows(2) {
            let prev = &pair[0];
            let next = &pair[1];
            if prev.chars().count() <= overlap || next.chars().count() <= overlap {
                continue;
            }
            let shared = (1..=overlap.min(next.chars().count()))
                .rev()
                .find(|&n| {
                    let prefix: String = next.chars().take(n).collect();
                    prev.ends_with(&prefix)
                })
                .unwrap_or(0);
            assert!(
                shared >= overlap / 2,
                "expected at least {} shared chars, got {shared} between {prev:?} and {next:?}",
                overlap / 2
            );
        }
    }

    #[test]
    fn test_hard_slice_fallback_without_separators() {
        let text = "x".repeat(350);
        let chunks = chunker(100, 20).split_text(&text);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 100);
        }
        // Contiguous slices cover the whole input
        let covered: usize = chunks
            .iter()
            .map(|c| c.chars().count())
            .sum::<usize>();
        assert!(covered >= 350);
    }

    #[test]
    fn test_japanese_sentence_separator() {
        let text = "これは最初の文です。これは二番目の文です。これは三番目の文です。".repeat(5);
        let chunks = chunker(100, 20).split_text(&text);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 100);
            assert!(text.contains(chunk.as_str()));
        }
    }

    #[test]
    fn test_create_chunks_assigns_ids_and_offsets() {
        let doc = document(
            "Python is a programming language. It has simple syntax. \
             It is widely used for data science and automation tasks.",
        );
        let chunks = chunker(100, 20).create_chunks(&doc, Some("doc42".to_string()));

        assert!(!chunks.is_empty());
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_id, format!("doc42_chunk_{i:04}"));
            assert_eq!(chunk.document_id, "doc42");
            assert_eq!(chunk.chunk_index, i);
            assert!(chunk.end_char > chunk.start_char);
            assert_eq!(chunk.end_char - chunk.start_char, chunk.size());
            assert_eq!(chunk.metadata["document_name"], json!("sample.txt"));
            assert_eq!(chunk.metadata["doc_type"], json!("txt"));
        }
    }

    #[test]
    fn test_generated_document_id_is_stable_hex() {
        let doc = document("content");
        let id = generate_document_id(&doc.source, &doc);
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        // Same document yields the same id
        assert_eq!(id, generate_document_id(&doc.source, &doc));
    }

    #[test]
    fn test_offsets_track_repeated_content() {
        let doc = document(&"repeated phrase. ".repeat(20));
        let chunks = chunker(100, 10).create_chunks(&doc, None);
        let mut last_start = 0;
        for chunk in &chunks {
            // Offsets move forward even though every chunk looks alike
            assert!(chunk.start_char >= last_start);
            last_start = chunk.start_char;
        }
    }
}
