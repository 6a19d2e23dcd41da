//! Paragraph-boundary text chunker.
//!
//! Splits document text into [`Chunk`]s that respect a `max_tokens` limit.
//! Splitting occurs on paragraph boundaries (`\n\n`); a paragraph longer than
//! the limit is cut at the last newline or space before it.
//!
//! Chunk ids are UUIDv5 over `(document_id, index)`, so re-chunking the same
//! document yields the same ids. Each chunk also carries the SHA-256 of its text.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use gated_context_core::models::Chunk;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split text into chunks with contiguous indices starting at 0.
///
/// Always returns at least one chunk (empty for empty input).
pub fn chunk_text(document_id: &str, text: &str, max_tokens: usize) -> Vec<Chunk> {
    let max_chars = (max_tokens * CHARS_PER_TOKEN).max(1);
    let mut pieces: Vec<String> = Vec::new();
    let mut current_buf = String::new();

    for para in text.split("\n\n") {
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
    if pieces.is_empty() {
        pieces.push(text.trim().to_string());
    }

    pieces
        .iter()
        .enumerate()
        .map(|(i, p)| make_chunk(document_id, i as i64, p))
        .collect()
}

fn hard_split(paragraph: &str, max_chars: usize, out: &mut Vec<String>) {
    let mut remaining = paragraph;
    while !remaining.is_empty() {
        if remaining.len() <= max_chars {
            out.push(remaining.trim().to_string());
            break;
        }
        let mut limit = max_chars;
        while !remaining.is_char_boundary(limit) {
            limit -= 1;
        }
        if limit == 0 {
            // One character wider than the limit.
            limit = remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len());
        }
        let split_at = remaining[..limit]
            .rfind('\n')
            .or_else(|| remaining[..limit].rfind(' '))
            .map(|pos| pos + 1)
            .unwrap_or(limit);
        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        remaining = &remaining[split_at..];
    }
}

fn make_chunk(document_id: &str, index: i64, text: &str) -> Chunk {
    let hash = format!("{:x}", Sha256::digest(text.as_bytes()));
    let id = Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{}:{}", document_id, index).as_bytes(),
    );

    Chunk {
        id: id.to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}
