//! Paragraph-boundary text chunker.
//!
//! Splits extracted text into [`ContentChunk`]s that respect a `max_tokens`
//! limit. Splitting occurs on paragraph boundaries (`\n\n`); a paragraph
//! longer than the limit is hard-split at the last newline or space that
//! fits.

use headwater_api::siphon::ContentChunk;

/// Approximate chars-per-token ratio. Matches the estimating tokenizer.
pub const CHARS_PER_TOKEN: usize = crate::tokenize::CHARS_PER_TOKEN;

pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Split text into chunks with contiguous indices starting at 0.
/// Whitespace-only input yields no chunks.
pub fn chunk_text(text: &str, max_tokens: usize) -> Vec<ContentChunk> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let mut chunks = Vec::new();
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
            push_chunk(&mut chunks, &current_buf);
            current_buf.clear();
        }

        if trimmed.len() > max_chars {
            let mut remaining = trimmed;
            while !remaining.is_empty() {
                let split_at = split_point(remaining, max_chars);
                push_chunk(&mut chunks, remaining[..split_at].trim());
                remaining = remaining[split_at..].trim_start();
            }
        } else {
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(trimmed);
        }
    }

    if !current_buf.is_empty() {
        push_chunk(&mut chunks, &current_buf);
    }

    chunks
}

/// Byte offset to cut `text` at, never past `max_chars` and never inside a
/// UTF-8 sequence.
fn split_point(text: &str, max_chars: usize) -> usize {
    if text.len() <= max_chars {
        return text.len();
    }
    let mut limit = max_chars;
    while !text.is_char_boundary(limit) {
        limit -= 1;
    }
    if limit == 0 {
        // A single character wider than the limit.
        return text.chars().next().map(char::len_utf8).unwrap_or(text.len());
    }
    text[..limit]
        .rfind('\n')
        .or_else(|| text[..limit].rfind(' '))
        .filter(|&pos| pos > 0)
        .map(|pos| pos + 1)
        .unwrap_or(limit)
}

fn push_chunk(chunks: &mut Vec<ContentChunk>, text: &str) {
    if text.is_empty() {
        return;
    }
    chunks.push(ContentChunk {
        index: chunks.len(),
        text: text.to_string(),
        token_estimate: estimate_tokens(text),
    });
}
