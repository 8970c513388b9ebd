#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::{stream, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use study_harness::completion::{
    CompletionProvider, CompletionStream, LlmError, Message, StreamEvent,
};
use study_harness_core::embedding::{EmbeddingProvider, HashEmbedder};

/// Build a PDF with one page per entry in `pages`. Each line of a page's
/// text is drawn on its own baseline in 12pt Helvetica.
pub fn pdf_with_pages(pages: &[&str]) -> Vec<u8> {
    let page_count = pages.len();
    // 1: catalog, 2: page tree, 3: font, then a (page, content) pair per page.
    let page_obj = |i: usize| 4 + 2 * i;
    let content_obj = |i: usize| 5 + 2 * i;
    let total_objects = 3 + 2 * page_count;

    let mut out = Vec::new();
    let mut offsets = Vec::with_capacity(total_objects);
    out.extend_from_slice(b"%PDF-1.4\n");

    offsets.push(out.len());
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");

    offsets.push(out.len());
    let kids: Vec<String> = (0..page_count)
        .map(|i| format!("{} 0 R", page_obj(i)))
        .collect();
    out.extend_from_slice(
        format!(
            "2 0 obj << /Type /Pages /Kids [{}] /Count {} >> endobj\n",
            kids.join(" "),
            page_count
        )
        .as_bytes(),
    );

    offsets.push(out.len());
    out.extend_from_slice(
        b"3 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );

    for (i, text) in pages.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(
            format!(
                "{} 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents {} 0 R /Resources << /Font << /F1 3 0 R >> >> >> endobj\n",
                page_obj(i),
                content_obj(i)
            )
            .as_bytes(),
        );

        let mut content = String::new();
        for (n, line) in text.lines().enumerate() {
            content.push_str(&format!(
                "BT /F1 12 Tf 72 {} Td ({}) Tj ET\n",
                720 - 16 * n,
                escape(line)
            ));
        }
        offsets.push(out.len());
        out.extend_from_slice(
            format!(
                "{} 0 obj << /Length {} >> stream\n{}endstream endobj\n",
                content_obj(i),
                content.len(),
                content
            )
            .as_bytes(),
        );
    }

    let xref_start = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", total_objects + 1).as_bytes());
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in &offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer << /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            total_objects + 1,
            xref_start
        )
        .as_bytes(),
    );
    out
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('(', "\\(")
        .replace(')', "\\)")
}

pub const PHONETICS_PAGE: &str = "Phonetics studies speech sounds.\nVowels and consonants differ in airflow.";
pub const MORPHEME_PAGE: &str = "A morpheme is the smallest unit of meaning.\nWords like unhappiness contain three morphemes.";
pub const RECIPE_PAGE: &str = "Preheat the oven to 200 degrees.\nBake the bread for forty minutes.";

// ============ Provider doubles ============

pub enum Script {
    /// The request fails before any event.
    Refuse(&'static str),
    /// Emit these events, then end the stream.
    Events(Vec<Result<StreamEvent, LlmError>>),
    /// Emit these events, then never produce another one.
    EventsThenHang(Vec<Result<StreamEvent, LlmError>>),
}

/// Completion provider that replays queued stream scripts and answers.
#[derive(Default)]
pub struct ScriptedCompletion {
    streams: Mutex<VecDeque<Script>>,
    answers: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<Vec<Message>>>,
    calls: AtomicUsize,
}

impl ScriptedCompletion {
    pub fn with_streams(scripts: Vec<Script>) -> Self {
        Self {
            streams: Mutex::new(scripts.into()),
            ..Self::default()
        }
    }

    pub fn answer(self, text: &str) -> Self {
        self.answers.lock().unwrap().push_back(text.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Vec<Message> {
        self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedCompletion {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, messages: Vec<Message>) -> Result<CompletionStream, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(messages);
        let script = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Refuse("no script left"));
        match script {
            Script::Refuse(reason) => Err(LlmError::Api {
                status: 503,
                body: reason.to_string(),
            }),
            Script::Events(events) => Ok(Box::pin(stream::iter(events))),
            Script::EventsThenHang(events) => {
                Ok(Box::pin(stream::iter(events).chain(stream::pending())))
            }
        }
    }

    async fn complete(&self, messages: Vec<Message>) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(messages);
        Ok(self
            .answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "YES".to_string()))
    }
}

/// Hash embeddings with a call counter, a failure switch and a poison word.
pub struct CountingEmbedder {
    inner: HashEmbedder,
    calls: AtomicUsize,
    pub failing: AtomicBool,
}

impl CountingEmbedder {
    pub fn new() -> Self {
        Self {
            inner: HashEmbedder::new(128),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for CountingEmbedder {
    fn model_name(&self) -> &str {
        "counting-hash"
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("embedding service unavailable"));
        }
        if texts.iter().any(|t| t.contains("poison")) {
            return Err(anyhow!("refusing to embed poison"));
        }
        self.inner.embed(texts).await
    }
}

pub fn delta(text: &str) -> Result<StreamEvent, LlmError> {
    Ok(StreamEvent::TextDelta {
        text: text.to_string(),
    })
}

pub fn end() -> Result<StreamEvent, LlmError> {
    Ok(StreamEvent::MessageEnd {
        finish_reason: Some("stop".to_string()),
    })
}
