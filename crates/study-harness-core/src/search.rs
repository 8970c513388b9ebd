//! Nearest-neighbour retrieval over a [`VectorIndex`].
//!
//! [`query`] ranks every indexed chunk by cosine distance to a query vector
//! and returns the `k` nearest, nearest first. Ties keep corpus order. An
//! absent or empty index yields an empty result, which callers treat as
//! valid (no context), not as an error.
//!
//! [`retrieve`] is the text entry point: it embeds the query with the same
//! provider that built the index and then calls [`query`].
//!
//! [`format_context`] renders retrieved chunks into the context block used
//! in prompts, each followed by its `[Source: <file>, Page: <n>]` citation.

use anyhow::Result;
use serde::Serialize;

use crate::embedding::{cosine_distance, embed_one, EmbeddingProvider};
use crate::index::VectorIndex;

/// Default number of chunks retrieved per query.
pub const DEFAULT_TOP_K: usize = 3;

/// A chunk returned by the retriever, with provenance and distance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub text: String,
    pub filename: String,
    pub page: u32,
    /// Cosine distance to the query; smaller is nearer.
    pub distance: f32,
    /// Position of the chunk within the index.
    pub ordinal: usize,
}

/// Rank indexed chunks by distance to `query_vec` and keep the `k` nearest.
pub fn query(index: Option<&VectorIndex>, query_vec: &[f32], k: usize) -> Vec<RetrievedChunk> {
    let index = match index {
        Some(index) if !index.is_empty() && k > 0 => index,
        _ => return Vec::new(),
    };

    let mut scored: Vec<(f32, usize)> = index
        .entries()
        .iter()
        .enumerate()
        .map(|(i, e)| (cosine_distance(query_vec, &e.vector), i))
        .collect();

    // `sort_by` is stable, so equal distances keep corpus order. NaN
    // distances sort after every real one.
    scored.sort_by(|a, b| {
        a.0.is_nan()
            .cmp(&b.0.is_nan())
            .then_with(|| a.0.total_cmp(&b.0))
    });
    scored.truncate(k);

    scored
        .into_iter()
        .map(|(distance, i)| {
            let entry = &index.entries()[i];
            RetrievedChunk {
                text: entry.chunk.text.clone(),
                filename: entry.chunk.filename.clone(),
                page: entry.chunk.page,
                distance,
                ordinal: entry.ordinal,
            }
        })
        .collect()
}

/// Embed `text` and return its `k` nearest chunks.
///
/// A blank query or an empty index returns an empty result without calling
/// the provider.
pub async fn retrieve(
    index: Option<&VectorIndex>,
    provider: &dyn EmbeddingProvider,
    text: &str,
    k: usize,
) -> Result<Vec<RetrievedChunk>> {
    if text.trim().is_empty() || index.map_or(true, VectorIndex::is_empty) || k == 0 {
        return Ok(Vec::new());
    }
    let query_vec = embed_one(provider, text).await?;
    Ok(query(index, &query_vec, k))
}

/// Render chunks as a prompt context block with source citations.
pub fn format_context(chunks: &[RetrievedChunk]) -> String {
    let mut context = String::new();
    for c in chunks {
        context.push_str(&format!(
            "\n{}\n[Source: {}, Page: {}]\n",
            c.text, c.filename, c.page
        ));
    }
    context
}
