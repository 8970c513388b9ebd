//! Study material generation.
//!
//! For a topic, retrieve the most relevant chunks, ask the model for a
//! summary, key concepts, a quiz and flashcards as one JSON object, and
//! parse the answer into [`StudyMaterials`]. A blank topic is rejected
//! before any external call.

use serde::{Deserialize, Serialize};

use study_harness_core::embedding::EmbeddingProvider;
use study_harness_core::index::VectorIndex;
use study_harness_core::models::Provenance;
use study_harness_core::search::{format_context, retrieve, RetrievedChunk};

use crate::chat::SYSTEM_PROMPT;
use crate::completion::{CompletionProvider, Message};
use crate::error::StudyError;
use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyConcept {
    pub term: String,
    #[serde(default)]
    pub definition: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flashcard {
    pub front: String,
    #[serde(default)]
    pub back: String,
}

/// Generated study content for one topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyMaterials {
    pub topic: String,
    pub summary: String,
    pub key_concepts: Vec<KeyConcept>,
    pub quiz: Vec<QuizQuestion>,
    pub flashcards: Vec<Flashcard>,
    /// Pages the material was generated from, in retrieval order.
    pub sources: Vec<Provenance>,
}

/// The part of [`StudyMaterials`] the model writes.
#[derive(Deserialize)]
struct Generated {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    key_concepts: Vec<KeyConcept>,
    #[serde(default)]
    quiz: Vec<QuizQuestion>,
    #[serde(default)]
    flashcards: Vec<Flashcard>,
}

const INSTRUCTIONS: &str = r#"Create study materials for the topic below using the provided context.
Respond with a single JSON object and nothing else, in this shape:
{
  "summary": "a few paragraphs",
  "key_concepts": [{"term": "...", "definition": "..."}],
  "quiz": [{"question": "...", "options": ["...", "...", "...", "..."], "answer": "...", "explanation": "..."}],
  "flashcards": [{"front": "...", "back": "..."}]
}
Include 5 to 8 key concepts, 5 quiz questions and 8 flashcards."#;

/// Generate study materials for `topic` from the session's documents.
pub async fn generate_for_session(
    session: &Session,
    topic: &str,
) -> Result<StudyMaterials, StudyError> {
    generate(
        session.index(),
        session.embedder().as_ref(),
        session.completer().as_ref(),
        topic,
        session.config().study.context_k,
    )
    .await
}

pub async fn generate(
    index: Option<&VectorIndex>,
    embedder: &dyn EmbeddingProvider,
    completer: &dyn CompletionProvider,
    topic: &str,
    context_k: usize,
) -> Result<StudyMaterials, StudyError> {
    let topic = topic.trim();
    if topic.is_empty() {
        tracing::warn!("study materials requested without a topic");
        return Err(StudyError::EmptyTopic);
    }

    let chunks = match retrieve(index, embedder, topic, context_k).await {
        Ok(chunks) => chunks,
        Err(e) => {
            tracing::warn!(error = %e, topic, "retrieval failed; generating without context");
            Vec::new()
        }
    };

    let messages = vec![
        Message::system(SYSTEM_PROMPT),
        Message::user(format!(
            "{}\n\nTopic: {}\n\nContext from documents:{}",
            INSTRUCTIONS,
            topic,
            format_context(&chunks)
        )),
    ];

    tracing::info!(topic, context_chunks = chunks.len(), "generating study materials");
    let raw = completer.complete(messages).await.map_err(|e| {
        tracing::warn!(error = %e, topic, "study material generation failed");
        StudyError::from(e)
    })?;

    parse_materials(topic, &raw, sources_of(&chunks))
}

/// Parse the model's JSON answer, tolerating a surrounding code fence.
pub fn parse_materials(
    topic: &str,
    raw: &str,
    sources: Vec<Provenance>,
) -> Result<StudyMaterials, StudyError> {
    let body = strip_code_fence(raw);
    let generated: Generated = serde_json::from_str(body).map_err(|e| {
        tracing::warn!(error = %e, "model returned malformed study materials");
        StudyError::Completion(format!("could not parse study materials: {}", e))
    })?;

    if generated.summary.trim().is_empty()
        && generated.key_concepts.is_empty()
        && generated.quiz.is_empty()
        && generated.flashcards.is_empty()
    {
        return Err(StudyError::Completion(
            "the model returned empty study materials".to_string(),
        ));
    }

    Ok(StudyMaterials {
        topic: topic.to_string(),
        summary: generated.summary,
        key_concepts: generated.key_concepts,
        quiz: generated.quiz,
        flashcards: generated.flashcards,
        sources,
    })
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening fence line.
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// Distinct pages among `chunks`, first occurrence first.
fn sources_of(chunks: &[RetrievedChunk]) -> Vec<Provenance> {
    let mut sources: Vec<Provenance> = Vec::new();
    for chunk in chunks {
        let provenance = Provenance {
            filename: chunk.filename.clone(),
            page: chunk.page,
        };
        if !sources.contains(&provenance) {
            sources.push(provenance);
        }
    }
    sources
}
