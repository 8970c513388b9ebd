//! Chat completion providers.
//!
//! A [`CompletionProvider`] turns a list of [`Message`]s into either a
//! stream of [`StreamEvent`]s (chat) or a single string (classification and
//! study material generation). Two implementations ship:
//!
//! - **[`DisabledCompletion`]**: every call fails with [`LlmError::NotConfigured`].
//! - **[`OpenAICompletion`]**: OpenAI-compatible `/v1/chat/completions`,
//!   streamed over server-sent events.
//!
//! Streams end with exactly one terminal item: a [`StreamEvent::MessageEnd`],
//! a [`StreamEvent::Error`], or an `Err`.

mod openai;
pub mod sse;

pub use openai::OpenAICompletion;

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

use study_harness_core::models::Role;

use crate::config::CompletionConfig;
use crate::http::HttpFailure;

/// One prompt message in OpenAI chat format.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Incremental output of a streaming completion.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TextDelta { text: String },
    MessageEnd { finish_reason: Option<String> },
    /// The provider reported a failure inside an otherwise healthy stream.
    Error { message: String },
}

pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send>>;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (HTTP {status}): {body}")]
    Api { status: u16, body: String },

    #[error("could not parse model output: {0}")]
    Parse(String),

    #[error("stream interrupted: {0}")]
    Stream(String),

    #[error("{0}")]
    NotConfigured(String),
}

impl From<HttpFailure> for LlmError {
    fn from(failure: HttpFailure) -> Self {
        match failure {
            HttpFailure::Status { status, body } => LlmError::Api { status, body },
            HttpFailure::Network(e) => LlmError::Http(e),
        }
    }
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn model_name(&self) -> &str;

    /// Start a streaming completion.
    async fn stream(&self, messages: Vec<Message>) -> Result<CompletionStream, LlmError>;

    /// Run a completion to the end and return the full text.
    async fn complete(&self, messages: Vec<Message>) -> Result<String, LlmError> {
        let mut stream = self.stream(messages).await?;
        let mut text = String::new();
        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::TextDelta { text: delta } => text.push_str(&delta),
                StreamEvent::MessageEnd { .. } => return Ok(text),
                StreamEvent::Error { message } => return Err(LlmError::Stream(message)),
            }
        }
        Err(LlmError::Stream(
            "stream ended before the message finished".to_string(),
        ))
    }
}

/// Provider used when no completion backend is configured.
pub struct DisabledCompletion;

#[async_trait]
impl CompletionProvider for DisabledCompletion {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn stream(&self, _messages: Vec<Message>) -> Result<CompletionStream, LlmError> {
        Err(LlmError::NotConfigured(
            "completion provider is disabled".to_string(),
        ))
    }
}

pub fn create_completion_provider(
    config: &CompletionConfig,
) -> Result<Arc<dyn CompletionProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledCompletion)),
        "openai" => Ok(Arc::new(OpenAICompletion::new(config)?)),
        other => bail!("Unknown completion provider: {}", other),
    }
}
