//! Splits document text into overlapping token windows (§4.2).
//!
//! Token boundaries are approximated by whitespace splits — not a real
//! tokenizer — which is sufficient for windowing since the embedder does its
//! own tokenization downstream. Chunks snap to line boundaries: a chunk
//! starts at the line containing its first token and ends at the line
//! containing its last.

use sha2::{Digest, Sha256};

use crate::models::{chunk_id, Chunk};

struct Token<'a> {
    text: &'a str,
    line: usize,
}

fn tokenize_with_lines(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    for (line_idx, line) in text.split('\n').enumerate() {
        for word in line.split_whitespace() {
            tokens.push(Token { text: word, line: line_idx });
        }
    }
    tokens
}

fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn make_chunk(doc_id: &str, index: i64, text: &str, start_line: usize, end_line: usize, token_count: usize) -> Chunk {
    Chunk {
        chunk_id: chunk_id(doc_id, index),
        doc_id: doc_id.to_string(),
        chunk_index: index,
        start_line,
        end_line,
        token_count,
        content_hash: content_hash(text),
        text: text.to_string(),
    }
}

/// Splits `text` into chunks for `doc_id`. When `enabled` is false, emits one
/// chunk covering the whole document regardless of `max_tokens`/`overlap`.
pub fn chunk_document(
    doc_id: &str,
    text: &str,
    enabled: bool,
    max_tokens: usize,
    overlap_tokens: usize,
) -> Vec<Chunk> {
    let lines = text.split('\n').count().max(1);

    if !enabled {
        let token_count = text.split_whitespace().count();
        return vec![make_chunk(doc_id, 0, text, 0, lines.saturating_sub(1), token_count)];
    }

    let tokens = tokenize_with_lines(text);
    if tokens.is_empty() {
        return vec![make_chunk(doc_id, 0, text, 0, lines.saturating_sub(1), 0)];
    }

    let mut chunks = Vec::new();
    let mut chunk_index: i64 = 0;
    let mut start = 0usize;

    while start < tokens.len() {
        let end = (start + max_tokens).min(tokens.len());
        let window = &tokens[start..end];

        let window_text = window.iter().map(|t| t.text).collect::<Vec<_>>().join(" ");
        let start_line = window.first().map(|t| t.line).unwrap_or(0);
        let end_line = window.last().map(|t| t.line).unwrap_or(start_line);

        chunks.push(make_chunk(doc_id, chunk_index, &window_text, start_line, end_line, window.len()));
        chunk_index += 1;

        if end >= tokens.len() {
            break;
        }
        // Advance by a full window minus the overlap suffix carried forward.
        let advance = max_tokens.saturating_sub(overlap_tokens).max(1);
        start += advance;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_chunking_yields_single_chunk() {
        let text = "line one\nline two\nline three";
        let chunks = chunk_document("doc1", text, false, 512, 50);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].start_line, 0);
        assert_eq!(chunks[0].end_line, 2);
    }

    #[test]
    fn empty_text_yields_one_chunk() {
        let chunks = chunk_document("doc1", "", true, 10, 2);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].token_count, 0);
    }

    #[test]
    fn windows_respect_max_tokens() {
        let text = (0..50).map(|i| format!("tok{i}")).collect::<Vec<_>>().join(" ");
        let chunks = chunk_document("doc1", &text, true, 10, 2);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.token_count <= 10);
        }
    }

    #[test]
    fn chunk_indices_are_contiguous() {
        let text = (0..100).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let chunks = chunk_document("doc1", &text, true, 20, 5);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
        }
    }

    #[test]
    fn line_boundaries_track_token_windows() {
        let text = "a b c\nd e f\ng h i";
        let chunks = chunk_document("doc1", text, true, 4, 0);
        assert_eq!(chunks[0].start_line, 0);
        assert!(chunks[0].end_line >= 0);
        // Every chunk's end_line must be >= its start_line.
        for c in &chunks {
            assert!(c.end_line >= c.start_line);
        }
    }

    #[test]
    fn deterministic_across_runs() {
        let text = "alpha beta gamma delta epsilon zeta";
        let a = chunk_document("doc1", text, true, 3, 1);
        let b = chunk_document("doc1", text, true, 3, 1);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.content_hash, y.content_hash);
            assert_eq!(x.chunk_id, y.chunk_id);
        }
    }
}
