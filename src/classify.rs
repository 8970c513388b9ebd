//! Topical relevance check for uploaded documents.
//!
//! One non-streaming completion call per document decides whether its
//! opening text belongs to the configured subject area. The verdict only
//! flags a document for display; flagged documents are still indexed.
//! Any failure resolves to [`Relevance::Relevant`].

use study_harness_core::models::{Document, Relevance};

use crate::completion::{CompletionProvider, LlmError, Message};
use crate::config::ClassifierConfig;
use crate::error::StudyError;

/// Classify `document`, falling back to relevant when the check cannot run.
pub async fn classify(
    config: &ClassifierConfig,
    completer: &dyn CompletionProvider,
    document: &Document,
) -> Relevance {
    if !config.enabled {
        return Relevance::Relevant;
    }

    let sample = document.text_sample(config.sample_chars);
    if sample.trim().is_empty() {
        tracing::debug!(filename = %document.filename, "no text to classify; assuming relevant");
        return Relevance::Relevant;
    }

    match try_classify(config, completer, &document.filename, &sample).await {
        Ok(relevance) => {
            tracing::info!(filename = %document.filename, ?relevance, "classified document");
            relevance
        }
        Err(e) => {
            tracing::warn!(error = %e, "classification failed; assuming relevant");
            Relevance::Relevant
        }
    }
}

/// Ask the model for a verdict on `sample`.
///
/// Fails when the call fails or the answer is neither yes nor no.
pub async fn try_classify(
    config: &ClassifierConfig,
    completer: &dyn CompletionProvider,
    filename: &str,
    sample: &str,
) -> Result<Relevance, StudyError> {
    let answer = completer
        .complete(classification_prompt(&config.topic, sample))
        .await
        .map_err(|source| StudyError::Classification {
            filename: filename.to_string(),
            source,
        })?;

    parse_verdict(&answer).ok_or_else(|| StudyError::Classification {
        filename: filename.to_string(),
        source: LlmError::Parse(format!("expected YES or NO, got '{}'", answer.trim())),
    })
}

fn classification_prompt(topic: &str, sample: &str) -> Vec<Message> {
    vec![
        Message::system(format!(
            "You decide whether a document is about {topic}. \
             Answer with a single word: YES if it is, NO if it is not."
        )),
        Message::user(format!("Document excerpt:\n\n{sample}")),
    ]
}

/// Read a YES/NO answer, ignoring case, whitespace and trailing punctuation.
pub fn parse_verdict(answer: &str) -> Option<Relevance> {
    let word: String = answer
        .trim()
        .chars()
        .take_while(|c| c.is_alphabetic())
        .collect::<String>()
        .to_ascii_lowercase();

    match word.as_str() {
        "yes" | "relevant" => Some(Relevance::Relevant),
        "no" | "irrelevant" => Some(Relevance::NotRelevant),
        _ => None,
    }
}
