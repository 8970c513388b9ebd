//! OpenAI-compatible chat completions.
//!
//! Requires `OPENAI_API_KEY`. The base URL can be pointed at any server
//! speaking the same protocol via `completion.url`.

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

use super::sse::{parse_line, LineBuffer};
use super::{CompletionProvider, CompletionStream, LlmError, Message, StreamEvent};
use crate::config::CompletionConfig;
use crate::http::send_with_retry;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

pub struct OpenAICompletion {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAICompletion {
    pub fn new(config: &CompletionConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            LlmError::NotConfigured("OPENAI_API_KEY environment variable not set".to_string())
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }

    async fn send(&self, messages: &[Message], stream: bool) -> Result<reqwest::Response, LlmError> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream,
        };
        let url = self.endpoint();

        tracing::debug!(model = %self.model, messages = messages.len(), stream, "sending chat request");

        let response = send_with_retry("openai chat", self.max_retries, || {
            self.client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;
        Ok(response)
    }
}

struct StreamState {
    bytes: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    lines: LineBuffer,
    pending: VecDeque<StreamEvent>,
    closed: bool,
    finished: bool,
}

#[async_trait]
impl CompletionProvider for OpenAICompletion {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream(&self, messages: Vec<Message>) -> Result<CompletionStream, LlmError> {
        let response = self.send(&messages, true).await?;

        let state = StreamState {
            bytes: response.bytes_stream().map(|r| r.map(|b| b.to_vec())).boxed(),
            lines: LineBuffer::default(),
            pending: VecDeque::new(),
            closed: false,
            finished: false,
        };

        let events = stream::unfold(state, |mut state| async move {
            loop {
                if let Some(event) = state.pending.pop_front() {
                    if matches!(
                        event,
                        StreamEvent::MessageEnd { .. } | StreamEvent::Error { .. }
                    ) {
                        state.finished = true;
                        state.pending.clear();
                    }
                    return Some((Ok(event), state));
                }
                if state.finished {
                    return None;
                }
                if state.closed {
                    state.finished = true;
                    return Some((
                        Err(LlmError::Stream(
                            "connection closed before the response finished".to_string(),
                        )),
                        state,
                    ));
                }

                match state.bytes.next().await {
                    Some(Ok(chunk)) => {
                        state.lines.push(&chunk);
                        while let Some(line) = state.lines.next_line() {
                            state.pending.extend(parse_line(&line));
                        }
                    }
                    Some(Err(e)) => {
                        state.finished = true;
                        return Some((Err(LlmError::Http(e)), state));
                    }
                    None => {
                        state.closed = true;
                        if let Some(line) = state.lines.finish() {
                            state.pending.extend(parse_line(&line));
                        }
                    }
                }
            }
        });

        Ok(Box::pin(events))
    }

    async fn complete(&self, messages: Vec<Message>) -> Result<String, LlmError> {
        let response = self.send(&messages, false).await?;
        let body: ChatResponse = response.json().await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::Parse("response contained no message content".to_string()))
    }
}
