//! Paragraph-boundary text chunker.
//!
//! Splits document text into [`Chunk`]s that respect a configurable
//! `max_tokens` limit. Splitting occurs on paragraph boundaries (blank
//! lines, with `\r\n` treated as `\n`) and on corpus-file headers (`=== name ===`), so passages from two
//! extracted Word documents never share a chunk.
//!
//! Each chunk receives a deterministic UUID derived from its document ID
//! and index, plus a SHA-256 hash of its text. The indexer uses the hash to
//! embed identical passages only once.
//!
//! # Example
//!
//! ```rust
//! use docforge::chunk::chunk_text;
//!
//! let chunks = chunk_text("careers.txt", "Hello world.\n\nSecond paragraph.", 512);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].chunk_index, 0);
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split text into chunks on paragraph and header boundaries.
///
/// Returns chunks with contiguous indices starting at 0. Whitespace-only
/// text produces no chunks. Oversized paragraphs are hard-split at the
/// nearest newline or space.
pub fn chunk_text(document_id: &str, text: &str, max_tokens: usize) -> Vec<Chunk> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let text = text.replace("\r\n", "\n");
    let mut pieces: Vec<String> = Vec::new();

    for section in split_sections(&text) {
        let mut current_buf = String::new();

        for para in section.split("\n\n") {
            let trimmed = para.trim();
            if trimmed.is_empty() {
                continue;
            }

            let would_be = if current_buf.is_empty() {
                trimmed.len()
            } else {
                current_buf.len() + 2 + trimmed.len()
            };

            if would_be > max_chars && !current_buf.is_empty() {
                pieces.push(std::mem::take(&mut current_buf));
            }

            if trimmed.len() > max_chars {
                hard_split(trimmed, max_chars, &mut pieces);
            } else {
                if !current_buf.is_empty() {
                    current_buf.push_str("\n\n");
                }
                current_buf.push_str(trimmed);
            }
        }

        if !current_buf.is_empty() {
            pieces.push(current_buf);
        }
    }

    pieces
        .iter()
        .enumerate()
        .map(|(i, text)| make_chunk(document_id, i as i64, text))
        .collect()
}

/// Split a corpus file into sections, each starting at a `=== name ===` line.
fn split_sections(text: &str) -> Vec<&str> {
    let mut sections = Vec::new();
    let mut start = 0;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        if is_header_line(line) && offset > start {
            sections.push(&text[start..offset]);
            start = offset;
        }
        offset += line.len();
    }
    if start < text.len() {
        sections.push(&text[start..]);
    }
    sections
}

fn is_header_line(line: &str) -> bool {
    let line = line.trim();
    line.len() > 8 && line.starts_with("=== ") && line.ends_with(" ===")
}

fn hard_split(paragraph: &str, max_chars: usize, out: &mut Vec<String>) {
    let mut remaining = paragraph;
    while !remaining.is_empty() {
        let limit = snap_to_char_boundary(remaining, remaining.len().min(max_chars));
        let split_at = if limit < remaining.len() {
            remaining[..limit]
                .rfind('\n')
                .or_else(|| remaining[..limit].rfind(' '))
                .map(|pos| pos + 1)
                .unwrap_or(limit)
        } else {
            limit
        };
        // Always make progress, even when the first char is wider than max_chars.
        let split_at = if split_at == 0 {
            remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len())
        } else {
            split_at
        };

        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        remaining = &remaining[split_at..];
    }
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn make_chunk(document_id: &str, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    let id = Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{}#{}", document_id, index).as_bytes(),
    );

    Chunk {
        id: id.to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}
