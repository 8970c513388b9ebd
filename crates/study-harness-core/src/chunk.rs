//! Page-bounded paragraph chunker.
//!
//! Splits the extracted pages of a document into [`Chunk`]s of at most
//! `max_tokens` (approximated as `max_tokens × 4` characters). Chunks never
//! cross a page boundary, so every chunk keeps the page number it came from.
//!
//! # Algorithm
//!
//! 1. For each page, split the text on blank lines (`\n\n`).
//! 2. Greedily pack paragraphs into a buffer while it stays under the limit.
//! 3. A paragraph that is larger than the limit on its own is hard-split at
//!    the last newline or space before the limit (or mid-word if none).
//! 4. Empty pages produce no chunks; an empty document produces none at all.
//!
//! # Example
//!
//! ```rust
//! use study_harness_core::chunk::chunk_pages;
//! use study_harness_core::models::PageText;
//!
//! let pages = vec![
//!     PageText { page: 1, text: "Morphemes.\n\nPhonemes.".into() },
//!     PageText { page: 2, text: "Syntax.".into() },
//! ];
//! let chunks = chunk_pages("ling.pdf", &pages, 700);
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[1].page, 2);
//! ```

use sha2::{Digest, Sha256};

use crate::models::{Chunk, PageText};

/// Rough characters-per-token ratio used to size chunks.
const CHARS_PER_TOKEN: usize = 4;

/// Chunk every page of a document, keeping page provenance.
///
/// `chunk_index` runs contiguously across the whole document, starting at 0.
pub fn chunk_pages(filename: &str, pages: &[PageText], max_tokens: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for page in pages {
        for text in chunk_text(&page.text, max_tokens) {
            chunks.push(make_chunk(filename, page.page, chunks.len(), text));
        }
    }
    chunks
}

/// Split a single run of text into trimmed, non-empty pieces.
pub fn chunk_text(text: &str, max_tokens: usize) -> Vec<String> {
    let max_chars = (max_tokens * CHARS_PER_TOKEN).max(1);
    let mut pieces = Vec::new();
    let mut buf = String::new();

    for para in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let projected = if buf.is_empty() {
            para.len()
        } else {
            buf.len() + 2 + para.len()
        };

        if projected > max_chars && !buf.is_empty() {
            pieces.push(std::mem::take(&mut buf));
        }

        if para.len() > max_chars {
            hard_split(para, max_chars, &mut pieces);
            continue;
        }

        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(para);
    }

    if !buf.is_empty() {
        pieces.push(buf);
    }
    pieces
}

/// Cut an oversized paragraph into pieces no longer than `max_chars` bytes,
/// preferring to break after a newline or space.
fn hard_split(para: &str, max_chars: usize, out: &mut Vec<String>) {
    let mut rest = para;
    while !rest.is_empty() {
        let cut = if rest.len() <= max_chars {
            rest.len()
        } else {
            let limit = floor_char_boundary(rest, max_chars);
            let natural = rest[..limit]
                .rfind(['\n', ' '])
                .map(|pos| pos + 1)
                .unwrap_or(limit);
            if natural == 0 {
                // A single character wider than the limit; take it whole.
                rest.chars().next().map(char::len_utf8).unwrap_or(rest.len())
            } else {
                natural
            }
        };
        let piece = rest[..cut].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        rest = &rest[cut..];
    }
}

/// Largest char boundary that is `<= index`.
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn make_chunk(filename: &str, page: u32, chunk_index: usize, text: String) -> Chunk {
    let hash = format!("{:x}", Sha256::digest(text.as_bytes()));
    Chunk {
        filename: filename.to_string(),
        page,
        chunk_index,
        text,
        hash,
    }
}
