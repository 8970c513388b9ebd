//! Ingestion pipeline orchestration.
//!
//! Coordinates the upload flow: PDF bytes → extracted pages → relevance
//! check → document set. Index rebuilds chunk every loaded document and
//! embed the result from scratch (see [`rebuild_index`]). Per-document
//! failures are logged and skipped; they never abort a batch.

use anyhow::{Context, Result};
use std::path::Path;

use study_harness_core::chunk::chunk_pages;
use study_harness_core::embedding::EmbeddingProvider;
use study_harness_core::index::{build_index, IndexBuild};
use study_harness_core::models::{Chunk, Document};

use crate::classify::classify;
use crate::completion::CompletionProvider;
use crate::config::{ChunkingConfig, ClassifierConfig, Config, EmbeddingConfig};
use crate::error::StudyError;
use crate::extract::extract_pages;

/// A file as received at the upload boundary.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
        }
    }

    /// Read a PDF from disk, using its file name as the upload name.
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { filename, bytes })
    }
}

/// Extract and classify one upload.
///
/// An unreadable file is an [`StudyError::Upload`]; the caller skips it.
/// A readable file without any text is accepted and contributes no chunks.
pub async fn prepare_upload(
    classifier: &ClassifierConfig,
    completer: &dyn CompletionProvider,
    upload: Upload,
) -> Result<Document, StudyError> {
    let pages = extract_pages(&upload.filename, &upload.bytes)?;
    if pages.is_empty() {
        tracing::warn!(filename = %upload.filename, "document has no extractable text");
    }

    let document = Document::from_pages(upload.filename, upload.bytes, pages);
    let relevance = classify(classifier, completer, &document).await;
    Ok(document.with_relevance(relevance))
}

/// Load the built-in document named in `[session]`, if one is configured.
///
/// The built-in document is trusted and never classified. Failing to read
/// it is a configuration error.
pub fn load_default_document(config: &Config) -> Result<Option<Document>> {
    let Some(path) = config.session.default_document.as_ref() else {
        return Ok(None);
    };
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read default document: {}", path.display()))?;
    let filename = config
        .session
        .default_document_name()
        .unwrap_or_else(|| path.display().to_string());
    let pages = extract_pages(&filename, &bytes)
        .with_context(|| format!("Default document is not a readable PDF: {}", path.display()))?;

    tracing::info!(filename = %filename, pages = pages.len(), "loaded default document");
    Ok(Some(Document::from_pages(filename, bytes, pages)))
}

/// Chunk every document, in document order.
pub fn collect_chunks<'a>(
    documents: impl IntoIterator<Item = &'a Document>,
    chunking: &ChunkingConfig,
) -> Vec<Chunk> {
    documents
        .into_iter()
        .flat_map(|doc| chunk_pages(&doc.filename, &doc.pages, chunking.max_tokens))
        .collect()
}

/// Build generation `generation` of the index over `documents`.
pub async fn rebuild_index<'a>(
    generation: u64,
    documents: impl IntoIterator<Item = &'a Document>,
    chunking: &ChunkingConfig,
    embedding: &EmbeddingConfig,
    embedder: &dyn EmbeddingProvider,
) -> IndexBuild {
    let chunks = collect_chunks(documents, chunking);
    let total = chunks.len();

    let build = build_index(generation, chunks, embedder, embedding.batch_size).await;

    if build.dropped > 0 || build.rejected > 0 {
        tracing::warn!(
            generation,
            dropped = build.dropped,
            rejected = build.rejected,
            last_error = build.last_error.as_deref().unwrap_or(""),
            "some chunks were left out of the index"
        );
    }
    tracing::info!(
        generation,
        chunks = total,
        indexed = build.index.len(),
        model = build.index.model(),
        "index rebuilt"
    );
    build
}
