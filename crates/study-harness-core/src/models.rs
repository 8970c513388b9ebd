//! Core data models shared by the ingestion, retrieval and chat pipeline.
//!
//! These types describe the documents a session has loaded, the
//! page-bounded chunks derived from them, and the conversation the
//! session accumulates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of topical classification for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relevance {
    Relevant,
    NotRelevant,
}

impl Relevance {
    pub fn is_flagged(&self) -> bool {
        matches!(self, Relevance::NotRelevant)
    }
}

/// Text of a single page, numbered from 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub page: u32,
    pub text: String,
}

/// An uploaded (or built-in) document.
///
/// Holds the raw bytes as uploaded, the pages extracted from them once at
/// load time, and the relevance verdict of the classifier. Documents are
/// immutable after creation and live only as long as their session.
#[derive(Debug, Clone)]
pub struct Document {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub pages: Vec<PageText>,
    pub relevance: Relevance,
}

impl Document {
    /// Build a document from already extracted pages. Relevance defaults
    /// to [`Relevance::Relevant`] until a classifier says otherwise.
    pub fn from_pages(filename: impl Into<String>, bytes: Vec<u8>, pages: Vec<PageText>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
            pages,
            relevance: Relevance::Relevant,
        }
    }

    pub fn with_relevance(mut self, relevance: Relevance) -> Self {
        self.relevance = relevance;
        self
    }

    /// Concatenated page text, capped at `max_chars` characters.
    pub fn text_sample(&self, max_chars: usize) -> String {
        let mut sample = String::new();
        for page in &self.pages {
            if !sample.is_empty() {
                sample.push('\n');
            }
            sample.push_str(page.text.trim());
            if sample.chars().count() >= max_chars {
                break;
            }
        }
        sample.chars().take(max_chars).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.iter().all(|p| p.text.trim().is_empty())
    }
}

/// Where a chunk came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Provenance {
    pub filename: String,
    pub page: u32,
}

impl Provenance {
    pub fn is_valid(&self) -> bool {
        !self.filename.trim().is_empty() && self.page >= 1
    }
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, Page: {}", self.filename, self.page)
    }
}

/// A page-bounded span of document text.
///
/// `chunk_index` counts chunks within the source document; the position
/// of the chunk within a whole index is assigned by the index builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub filename: String,
    pub page: u32,
    pub chunk_index: usize,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

impl Chunk {
    pub fn provenance(&self) -> Provenance {
        Provenance {
            filename: self.filename.clone(),
            page: self.page,
        }
    }
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// How an assistant turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    /// The completion stream finished normally.
    Complete,
    /// The stream failed or was cancelled after some text arrived.
    Partial,
    /// Nothing usable arrived; `content` holds a user-facing error message.
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub status: TurnStatus,
    pub created_at: DateTime<Utc>,
}

/// Append-only chat history owned by a single session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(Role::User, content.into(), TurnStatus::Complete);
    }

    pub fn push_assistant(&mut self, content: impl Into<String>, status: TurnStatus) {
        self.push(Role::Assistant, content.into(), status);
    }

    fn push(&mut self, role: Role, content: String, status: TurnStatus) {
        self.turns.push(Turn {
            role,
            content,
            status,
            created_at: Utc::now(),
        });
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }
}
