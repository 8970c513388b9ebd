//! Parsing of OpenAI chat-completion server-sent events.
//!
//! The stream is a sequence of `data: {json}` lines separated by blank
//! lines and terminated by `data: [DONE]`. Each JSON payload carries a
//! `choices[0].delta.content` fragment and, on the last chunk, a
//! `finish_reason`.

use serde::Deserialize;

use super::StreamEvent;

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<StreamErrorBody>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<Delta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamErrorBody {
    #[serde(default)]
    message: String,
}

/// Translate one SSE line into zero or more stream events.
///
/// Comments, `event:` lines, blank lines and undecodable payloads produce
/// nothing.
pub fn parse_line(line: &str) -> Vec<StreamEvent> {
    let Some(data) = line.strip_prefix("data:") else {
        return Vec::new();
    };
    let data = data.trim();

    if data == "[DONE]" {
        return vec![StreamEvent::MessageEnd {
            finish_reason: None,
        }];
    }

    let chunk: StreamChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::debug!(error = %e, "ignoring undecodable SSE payload");
            return Vec::new();
        }
    };

    if let Some(error) = chunk.error {
        return vec![StreamEvent::Error {
            message: error.message,
        }];
    }

    let mut events = Vec::new();
    if let Some(choice) = chunk.choices.into_iter().next() {
        if let Some(text) = choice.delta.and_then(|d| d.content) {
            if !text.is_empty() {
                events.push(StreamEvent::TextDelta { text });
            }
        }
        if let Some(reason) = choice.finish_reason {
            events.push(StreamEvent::MessageEnd {
                finish_reason: Some(reason),
            });
        }
    }
    events
}

/// Splits a byte stream into lines.
///
/// Bytes are buffered until a newline arrives, so multi-byte characters
/// split across network chunks decode intact.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete line, without its terminator.
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|b| *b == b'\n')?;
        let raw: Vec<u8> = self.buf.drain(..=pos).collect();
        Some(decode_line(&raw))
    }

    /// Whatever remains after the stream closed, if anything.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.buf);
        let line = decode_line(&raw);
        (!line.is_empty()).then_some(line)
    }
}

fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(|c| c == '\r' || c == '\n')
        .to_string()
}
