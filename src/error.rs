//! Failure taxonomy for the session pipeline.
//!
//! Every external-service failure is caught at the component that made the
//! call and turned into one of these variants. Components then degrade
//! (skip a document, assume relevance, drop chunks) or surface the message
//! to the user; none of them tears down a session.

use thiserror::Error;

use crate::completion::LlmError;

#[derive(Debug, Error)]
pub enum StudyError {
    /// Uploaded bytes could not be read as a PDF. The document is skipped.
    #[error("could not read '{filename}': {reason}")]
    Upload { filename: String, reason: String },

    /// The relevance check failed. The document is treated as relevant.
    #[error("classification of '{filename}' failed: {source}")]
    Classification {
        filename: String,
        #[source]
        source: LlmError,
    },

    /// The embedding service failed for a query or a set of chunks.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// The completion service failed during chat or study generation.
    #[error("the language model request failed: {0}")]
    Completion(String),

    /// Study material generation was requested without a topic.
    #[error("Please enter a topic first.")]
    EmptyTopic,

    /// A chat message with no text was submitted.
    #[error("message must not be empty")]
    EmptyMessage,
}

impl From<LlmError> for StudyError {
    fn from(e: LlmError) -> Self {
        StudyError::Completion(e.to_string())
    }
}
