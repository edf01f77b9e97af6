//! Page-aware paragraph chunker.
//!
//! Splits extracted page text into [`Chunk`]s that respect a `max_tokens`
//! limit. Splitting happens on paragraph boundaries (`\n\n`) inside each
//! page and never crosses a page break, so every chunk can cite exactly
//! one page. Each chunk records the byte offset of its first character
//! within the page text.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Text of one page (or of the whole file for unpaged formats).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    /// 1-based page number; `None` when the format has no pages.
    pub page: Option<i64>,
    pub text: String,
}

impl PageText {
    pub fn new(page: Option<i64>, text: impl Into<String>) -> Self {
        Self {
            page,
            text: text.into(),
        }
    }
}

/// True when no page carries any non-whitespace text.
pub fn is_blank(pages: &[PageText]) -> bool {
    pages.iter().all(|p| p.text.trim().is_empty())
}

/// Split pages into chunks. Indices are contiguous from 0 across the
/// whole document. Blank pages produce no chunks.
pub fn chunk_pages(doc_hash: &str, pages: &[PageText], max_tokens: usize) -> Vec<Chunk> {
    let max_chars = (max_tokens * CHARS_PER_TOKEN).max(1);
    let mut chunks = Vec::new();

    for page in pages {
        let mut buf = String::new();
        let mut buf_offset = 0usize;

        for (para_start, para) in paragraphs(&page.text) {
            let trimmed = para.trim();
            if trimmed.is_empty() {
                continue;
            }
            let lead = para.len() - para.trim_start().len();
            let offset = para_start + lead;

            let would_be = if buf.is_empty() {
                trimmed.len()
            } else {
                buf.len() + 2 + trimmed.len()
            };

            if would_be > max_chars && !buf.is_empty() {
                push_chunk(&mut chunks, doc_hash, page.page, buf_offset, &buf);
                buf.clear();
            }

            if trimmed.len() > max_chars {
                let mut remaining = trimmed;
                let mut consumed = 0usize;
                while !remaining.is_empty() {
                    let split_at = floor_char_boundary(remaining, remaining.len().min(max_chars));
                    let actual = if split_at < remaining.len() {
                        remaining[..split_at]
                            .rfind('\n')
                            .or_else(|| remaining[..split_at].rfind(' '))
                            .map(|pos| pos + 1)
                            .filter(|pos| *pos > 0)
                            .unwrap_or(split_at)
                    } else {
                        split_at
                    };
                    let actual = if actual == 0 {
                        next_char_boundary(remaining)
                    } else {
                        actual
                    };
                    let piece = &remaining[..actual];
                    let piece_lead = piece.len() - piece.trim_start().len();
                    if !piece.trim().is_empty() {
                        push_chunk(
                            &mut chunks,
                            doc_hash,
                            page.page,
                            offset + consumed + piece_lead,
                            piece.trim(),
                        );
                    }
                    consumed += actual;
                    remaining = &remaining[actual..];
                }
            } else {
                if buf.is_empty() {
                    buf_offset = offset;
                } else {
                    buf.push_str("\n\n");
                }
                buf.push_str(trimmed);
            }
        }

        if !buf.is_empty() {
            push_chunk(&mut chunks, doc_hash, page.page, buf_offset, &buf);
        }
    }

    chunks
}

/// Paragraphs of `text` with the byte offset each one starts at.
fn paragraphs(text: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut start = 0usize;
    for para in text.split("\n\n") {
        out.push((start, para));
        start += para.len() + 2;
    }
    out
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn next_char_boundary(s: &str) -> usize {
    s.chars().next().map(|c| c.len_utf8()).unwrap_or(s.len())
}

fn push_chunk(
    chunks: &mut Vec<Chunk>,
    doc_hash: &str,
    page: Option<i64>,
    offset: usize,
    text: &str,
) {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    chunks.push(Chunk {
        id: Uuid::new_v4().to_string(),
        doc_hash: doc_hash.to_string(),
        chunk_index: chunks.len() as i64,
        text: text.to_string(),
        page,
        offset: offset as i64,
        hash,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_page(text: &str) -> Vec<PageText> {
        vec![PageText::new(Some(1), text)]
    }

    #[test]
    fn small_text_single_chunk() {
        let chunks = chunk_pages("d1", &one_page("Hello, tender!"), 700);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].page, Some(1));
        assert_eq!(chunks[0].offset, 0);
        assert_eq!(chunks[0].text, "Hello, tender!");
    }

    #[test]
    fn blank_pages_produce_nothing() {
        let pages = vec![PageText::new(Some(1), "  \n\n "), PageText::new(Some(2), "")];
        assert!(is_blank(&pages));
        assert!(chunk_pages("d1", &pages, 700).is_empty());
    }

    #[test]
    fn chunks_never_cross_pages() {
        let pages = vec![
            PageText::new(Some(1), "Scope of works."),
            PageText::new(Some(2), "Bid security of 2%."),
        ];
        let chunks = chunk_pages("d1", &pages, 700);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].page, Some(1));
        assert_eq!(chunks[1].page, Some(2));
        assert_eq!(chunks[1].chunk_index, 1);
    }

    #[test]
    fn offsets_point_into_page_text() {
        // max_tokens=5 => max_chars=20
        let text = "First paragraph here.\n\n  Second paragraph text.";
        let chunks = chunk_pages("d1", &one_page(text), 5);
        assert!(chunks.len() >= 2);
        for c in &chunks {
            let at = c.offset as usize;
            assert!(
                text[at..].starts_with(&c.text),
                "chunk {:?} not found at offset {}",
                c.text,
                at
            );
        }
    }

    #[test]
    fn long_paragraph_hard_split_keeps_offsets() {
        let text = "word ".repeat(40);
        let chunks = chunk_pages("d1", &one_page(&text), 5);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
            assert!(c.text.len() <= 20);
            assert!(text[c.offset as usize..].starts_with(&c.text));
        }
    }

    #[test]
    fn multibyte_text_does_not_panic() {
        let text = "é".repeat(50);
        let chunks = chunk_pages("d1", &one_page(&text), 2);
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn deterministic_text_and_hashes() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let a = chunk_pages("d1", &one_page(text), 2);
        let b = chunk_pages("d1", &one_page(text), 2);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.text, y.text);
            assert_eq!(x.hash, y.hash);
            assert_eq!(x.offset, y.offset);
        }
    }
}
