//! Per-user session state.
//!
//! A [`Session`] owns everything one user has accumulated: the built-in
//! document, their uploads, the current vector index and the conversation.
//! Nothing is shared between sessions, and nothing outlives one.
//!
//! Every change to the document set rebuilds the index from scratch, so
//! the index generation counts rebuilds.

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;

use study_harness_core::embedding::EmbeddingProvider;
use study_harness_core::index::VectorIndex;
use study_harness_core::models::{Conversation, Document};
use study_harness_core::search::{retrieve, RetrievedChunk};

use crate::completion::CompletionProvider;
use crate::config::Config;
use crate::error::StudyError;
use crate::ingest::{load_default_document, prepare_upload, rebuild_index, Upload};

/// Where the chat orchestrator is in handling a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatState {
    Idle,
    AwaitingUserInput,
    ContextRetrieved,
    StreamingResponse,
}

/// Counts from the most recent index rebuild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BuildSummary {
    pub generation: u64,
    pub chunks: usize,
    pub dropped: usize,
    pub rejected: usize,
}

/// What happened to a batch of uploads.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadReport {
    pub accepted: Vec<String>,
    pub flagged: Vec<String>,
    pub skipped: Vec<SkippedUpload>,
    /// Present when the batch changed the document set.
    pub build: Option<BuildSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedUpload {
    pub filename: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentStatus {
    pub filename: String,
    pub builtin: bool,
    pub flagged: bool,
    pub pages: usize,
    pub chunks: usize,
}

/// Snapshot of what a session has loaded.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub documents: Vec<DocumentStatus>,
    pub flagged: Vec<String>,
    pub upload_history: Vec<String>,
    pub generation: u64,
    pub chunks: usize,
    pub dropped: usize,
    pub turns: usize,
    pub chat_state: ChatState,
}

/// The built-in document and its first-generation index, built once and
/// shared by every session that starts from it.
#[derive(Clone)]
pub struct Baseline {
    pub document: Arc<Document>,
    pub index: Arc<VectorIndex>,
    pub build: BuildSummary,
}

impl Baseline {
    /// Chunk and embed `document` as generation 1.
    pub async fn build(
        config: &Config,
        embedder: &dyn EmbeddingProvider,
        document: Document,
    ) -> Self {
        let build = rebuild_index(
            1,
            std::iter::once(&document),
            &config.chunking,
            &config.embedding,
            embedder,
        )
        .await;

        Self {
            build: BuildSummary {
                generation: 1,
                chunks: build.index.len(),
                dropped: build.dropped,
                rejected: build.rejected,
            },
            index: Arc::new(build.index),
            document: Arc::new(document),
        }
    }

    /// Load and index the document named in `[session]`, if any.
    pub async fn load(config: &Config, embedder: &dyn EmbeddingProvider) -> Result<Option<Self>> {
        match load_default_document(config)? {
            Some(document) => Ok(Some(Self::build(config, embedder, document).await)),
            None => Ok(None),
        }
    }
}

pub struct Session {
    config: Arc<Config>,
    embedder: Arc<dyn EmbeddingProvider>,
    completer: Arc<dyn CompletionProvider>,
    default_document: Option<Arc<Document>>,
    uploads: Vec<Document>,
    upload_history: Vec<String>,
    index: Option<Arc<VectorIndex>>,
    last_build: BuildSummary,
    pub(crate) conversation: Conversation,
    pub(crate) chat_state: ChatState,
}

impl Session {
    /// An empty session: no documents, no index.
    pub fn new(
        config: Arc<Config>,
        embedder: Arc<dyn EmbeddingProvider>,
        completer: Arc<dyn CompletionProvider>,
    ) -> Self {
        Self {
            config,
            embedder,
            completer,
            default_document: None,
            uploads: Vec::new(),
            upload_history: Vec::new(),
            index: None,
            last_build: BuildSummary::default(),
            conversation: Conversation::new(),
            chat_state: ChatState::Idle,
        }
    }

    /// A session that starts from a shared baseline. Nothing is embedded
    /// until the document set changes.
    pub fn with_baseline(
        config: Arc<Config>,
        embedder: Arc<dyn EmbeddingProvider>,
        completer: Arc<dyn CompletionProvider>,
        baseline: &Baseline,
    ) -> Self {
        let mut session = Self::new(config, embedder, completer);
        session.upload_history.push(baseline.document.filename.clone());
        session.default_document = Some(baseline.document.clone());
        session.index = Some(baseline.index.clone());
        session.last_build = baseline.build;
        session
    }

    /// A session preloaded with the configured default document and its index.
    pub async fn start(
        config: Arc<Config>,
        embedder: Arc<dyn EmbeddingProvider>,
        completer: Arc<dyn CompletionProvider>,
    ) -> Result<Self> {
        match Baseline::load(&config, embedder.as_ref()).await? {
            Some(baseline) => Ok(Self::with_baseline(config, embedder, completer, &baseline)),
            None => Ok(Self::new(config, embedder, completer)),
        }
    }

    /// Extract, classify and add a batch of uploads, then rebuild once.
    ///
    /// An upload with the same filename as an earlier one replaces it.
    /// Files that cannot be read are reported and skipped.
    pub async fn add_documents(&mut self, uploads: Vec<Upload>) -> UploadReport {
        let mut report = UploadReport::default();

        for upload in uploads {
            let filename = upload.filename.clone();
            if self.is_default(&filename) {
                report.skipped.push(SkippedUpload {
                    filename,
                    reason: "a built-in document with this name is already loaded".to_string(),
                });
                continue;
            }

            match prepare_upload(&self.config.classifier, self.completer.as_ref(), upload).await
            {
                Ok(document) => {
                    if document.relevance.is_flagged() {
                        report.flagged.push(filename.clone());
                    }
                    self.add_prepared(document);
                    report.accepted.push(filename);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "skipping upload");
                    report.skipped.push(SkippedUpload {
                        filename,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if !report.accepted.is_empty() {
            report.build = Some(self.rebuild().await);
        }
        report
    }

    /// Insert an already extracted and classified document without rebuilding.
    pub fn add_prepared(&mut self, document: Document) {
        if !self.upload_history.contains(&document.filename) {
            self.upload_history.push(document.filename.clone());
        }
        match self
            .uploads
            .iter_mut()
            .find(|d| d.filename == document.filename)
        {
            Some(existing) => *existing = document,
            None => self.uploads.push(document),
        }
    }

    /// Remove an uploaded document and rebuild.
    ///
    /// Returns `Ok(None)` when no upload has that name. The built-in
    /// document cannot be removed.
    pub async fn remove_document(
        &mut self,
        filename: &str,
    ) -> Result<Option<BuildSummary>, StudyError> {
        if self.is_default(filename) {
            return Err(StudyError::Upload {
                filename: filename.to_string(),
                reason: "the built-in document cannot be removed".to_string(),
            });
        }
        let before = self.uploads.len();
        self.uploads.retain(|d| d.filename != filename);
        if self.uploads.len() == before {
            return Ok(None);
        }
        self.upload_history.retain(|name| name != filename);
        Ok(Some(self.rebuild().await))
    }

    /// Rebuild the index over the current document set.
    pub async fn rebuild(&mut self) -> BuildSummary {
        let generation = self.last_build.generation + 1;
        let build = rebuild_index(
            generation,
            self.documents(),
            &self.config.chunking,
            &self.config.embedding,
            self.embedder.as_ref(),
        )
        .await;

        self.last_build = BuildSummary {
            generation,
            chunks: build.index.len(),
            dropped: build.dropped,
            rejected: build.rejected,
        };
        self.index = Some(Arc::new(build.index));
        self.last_build
    }

    /// Top-`k` chunks for `text` from the current index.
    pub async fn retrieve(&self, text: &str, k: usize) -> Result<Vec<RetrievedChunk>, StudyError> {
        retrieve(self.index.as_deref(), self.embedder.as_ref(), text, k)
            .await
            .map_err(|e| StudyError::Embedding(e.to_string()))
    }

    /// The built-in document first, then uploads in upload order.
    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.default_document
            .as_deref()
            .into_iter()
            .chain(self.uploads.iter())
    }

    pub fn flagged(&self) -> Vec<String> {
        self.uploads
            .iter()
            .filter(|d| d.relevance.is_flagged())
            .map(|d| d.filename.clone())
            .collect()
    }

    pub fn status(&self) -> SessionStatus {
        let documents = self
            .documents()
            .map(|d| DocumentStatus {
                filename: d.filename.clone(),
                builtin: self.is_default(&d.filename),
                flagged: d.relevance.is_flagged(),
                pages: d.pages.len(),
                chunks: self
                    .index
                    .as_ref()
                    .map_or(0, |index| index.chunks_for(&d.filename)),
            })
            .collect();

        SessionStatus {
            documents,
            flagged: self.flagged(),
            upload_history: self.upload_history.clone(),
            generation: self.last_build.generation,
            chunks: self.last_build.chunks,
            dropped: self.last_build.dropped,
            turns: self.conversation.len(),
            chat_state: self.chat_state,
        }
    }

    pub fn index(&self) -> Option<&VectorIndex> {
        self.index.as_deref()
    }

    pub fn generation(&self) -> u64 {
        self.last_build.generation
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn chat_state(&self) -> ChatState {
        self.chat_state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    pub fn completer(&self) -> &Arc<dyn CompletionProvider> {
        &self.completer
    }

    fn is_default(&self, filename: &str) -> bool {
        self.default_document
            .as_ref()
            .is_some_and(|d| d.filename == filename)
    }
}
