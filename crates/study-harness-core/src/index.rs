//! In-memory, generation-tagged vector index.
//!
//! A [`VectorIndex`] is built wholesale from the chunks of every loaded
//! document by [`build_index`]. There is no incremental update: any change
//! to the document set produces a new index with the next generation
//! number. Entries keep corpus order, which the retriever uses to break
//! distance ties.
//!
//! # Failure policy
//!
//! Embedding failures never abort a build. Chunks are embedded in batches;
//! when a batch call fails, its chunks are retried one at a time and the
//! ones that still fail are dropped. Chunks without provenance or text are
//! rejected before any embedding call is made.

use crate::embedding::EmbeddingProvider;
use crate::models::Chunk;

/// A chunk together with its embedding and its position in the corpus.
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub ordinal: usize,
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// Similarity-searchable collection of embedded chunks.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    generation: u64,
    model: String,
    dims: usize,
    entries: Vec<IndexedChunk>,
}

impl VectorIndex {
    pub fn empty(generation: u64) -> Self {
        Self {
            generation,
            model: String::new(),
            dims: 0,
            entries: Vec::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Dimensionality shared by every vector in the index (0 when empty).
    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexedChunk] {
        &self.entries
    }

    /// Number of indexed chunks that came from `filename`.
    pub fn chunks_for(&self, filename: &str) -> usize {
        self.entries
            .iter()
            .filter(|e| e.chunk.filename == filename)
            .count()
    }
}

/// Result of a full index rebuild.
#[derive(Debug, Clone)]
pub struct IndexBuild {
    pub index: VectorIndex,
    /// Chunks dropped because their embedding could not be computed.
    pub dropped: usize,
    /// Chunks rejected for missing provenance or empty text.
    pub rejected: usize,
    /// Last embedding error seen, for logging.
    pub last_error: Option<String>,
}

/// Build a fresh index over `chunks`.
///
/// `batch_size` is the number of texts sent per embedding call (minimum 1).
pub async fn build_index(
    generation: u64,
    chunks: Vec<Chunk>,
    provider: &dyn EmbeddingProvider,
    batch_size: usize,
) -> IndexBuild {
    let total = chunks.len();
    let chunks: Vec<Chunk> = chunks
        .into_iter()
        .filter(|c| c.provenance().is_valid() && !c.text.trim().is_empty())
        .collect();
    let rejected = total - chunks.len();

    let mut vectors: Vec<Option<Vec<f32>>> = vec![None; chunks.len()];
    let mut last_error = None;

    for (batch_no, batch) in chunks.chunks(batch_size.max(1)).enumerate() {
        let offset = batch_no * batch_size.max(1);
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();

        match provider.embed(&texts).await {
            Ok(batch_vecs) if batch_vecs.len() == texts.len() => {
                for (i, v) in batch_vecs.into_iter().enumerate() {
                    vectors[offset + i] = Some(v);
                }
                continue;
            }
            Ok(batch_vecs) => {
                last_error = Some(format!(
                    "provider returned {} vectors for {} texts",
                    batch_vecs.len(),
                    texts.len()
                ));
            }
            Err(e) => last_error = Some(e.to_string()),
        }

        // Isolate the failing chunks.
        for (i, text) in texts.iter().enumerate() {
            match provider.embed(std::slice::from_ref(text)).await {
                Ok(mut one) if one.len() == 1 => vectors[offset + i] = one.pop(),
                Ok(_) => {}
                Err(e) => last_error = Some(e.to_string()),
            }
        }
    }

    let dims = vectors
        .iter()
        .flatten()
        .map(Vec::len)
        .find(|len| *len > 0)
        .unwrap_or(0);

    let mut entries = Vec::with_capacity(chunks.len());
    let mut dropped = 0;
    for (chunk, vector) in chunks.into_iter().zip(vectors) {
        match vector {
            Some(v) if !v.is_empty() && v.len() == dims => entries.push(IndexedChunk {
                ordinal: entries.len(),
                chunk,
                vector: v,
            }),
            _ => dropped += 1,
        }
    }

    IndexBuild {
        index: VectorIndex {
            generation,
            model: provider.model_name().to_string(),
            dims,
            entries,
        },
        dropped,
        rejected,
        last_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_pages;
    use crate::embedding::HashEmbedder;
    use crate::models::PageText;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails any batch that contains a text with `poison` in it.
    struct PoisonEmbedder {
        inner: HashEmbedder,
        poison: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for PoisonEmbedder {
        fn model_name(&self) -> &str {
            "poison"
        }
        fn dims(&self) -> usize {
            self.inner.dims()
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if texts.iter().any(|t| t.contains(self.poison)) {
                bail!("embedding service rejected input");
            }
            self.inner.embed(texts).await
        }
    }

    fn sample_chunks() -> Vec<Chunk> {
        let pages = vec![
            PageText {
                page: 1,
                text: "Morphemes are units of meaning.".to_string(),
            },
            PageText {
                page: 2,
                text: "POISON page.".to_string(),
            },
            PageText {
                page: 3,
                text: "Phonemes are units of sound.".to_string(),
            },
        ];
        chunk_pages("ling.pdf", &pages, 700)
    }

    #[tokio::test]
    async fn test_build_embeds_every_chunk() {
        let chunks = sample_chunks();
        let build = build_index(1, chunks, &HashEmbedder::new(32), 2).await;
        assert_eq!(build.index.len(), 3);
        assert_eq!(build.dropped, 0);
        assert_eq!(build.index.generation(), 1);
        assert_eq!(build.index.dims(), 32);
        for (i, e) in build.index.entries().iter().enumerate() {
            assert_eq!(e.ordinal, i);
            assert!(e.chunk.provenance().is_valid());
        }
    }

    #[tokio::test]
    async fn test_failed_chunks_are_dropped_not_fatal() {
        let provider = PoisonEmbedder {
            inner: HashEmbedder::new(32),
            poison: "POISON",
            calls: AtomicUsize::new(0),
        };
        let build = build_index(4, sample_chunks(), &provider, 8).await;
        assert_eq!(build.index.len(), 2);
        assert_eq!(build.dropped, 1);
        assert!(build.last_error.is_some());
        let pages: Vec<u32> = build.index.entries().iter().map(|e| e.chunk.page).collect();
        assert_eq!(pages, vec![1, 3]);
        // one failed batch call + three single retries
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_chunks_without_provenance_are_rejected() {
        let mut chunks = sample_chunks();
        chunks[0].filename = String::new();
        chunks[2].page = 0;
        let build = build_index(1, chunks, &HashEmbedder::new(8), 16).await;
        assert_eq!(build.rejected, 2);
        assert_eq!(build.index.len(), 1);
    }

    #[tokio::test]
    async fn test_rebuild_is_idempotent_in_size() {
        let a = build_index(1, sample_chunks(), &HashEmbedder::new(16), 1).await;
        let b = build_index(2, sample_chunks(), &HashEmbedder::new(16), 1).await;
        assert_eq!(a.index.len(), b.index.len());
        assert_eq!(b.index.generation(), 2);
    }

    #[tokio::test]
    async fn test_empty_input_builds_empty_index() {
        let build = build_index(7, Vec::new(), &HashEmbedder::new(16), 4).await;
        assert!(build.index.is_empty());
        assert_eq!(build.index.dims(), 0);
        assert_eq!(build.index.generation(), 7);
    }
}
