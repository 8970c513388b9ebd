//! Retrieval-augmented chat over a session's documents.
//!
//! [`send_message`] drives one exchange through the session's chat state
//! machine:
//!
//! ```text
//! Idle → AwaitingUserInput → ContextRetrieved → StreamingResponse → Idle
//! ```
//!
//! The user turn is recorded before anything external happens. The
//! assistant turn is recorded exactly once, when the stream ends, fails or
//! is cancelled, so every accepted user turn is answered by exactly one
//! assistant turn.

use futures::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use study_harness_core::models::{Turn, TurnStatus};
use study_harness_core::search::{format_context, RetrievedChunk};

use crate::completion::{Message, StreamEvent};
use crate::error::StudyError;
use crate::session::{ChatState, Session};

pub const SYSTEM_PROMPT: &str = "You are an educational AI assistant specializing in NLP. \
Base your responses on the provided context and cite sources when possible.";

const CANCELLED_MESSAGE: &str = "Response cancelled before any text arrived.";

/// Result of one chat exchange.
#[derive(Debug, Clone, Serialize)]
pub struct ChatOutcome {
    /// Text committed as the assistant turn.
    pub reply: String,
    pub status: TurnStatus,
    /// Chunks the answer was grounded on.
    pub sources: Vec<RetrievedChunk>,
    /// Why the response stopped early, if it did.
    pub error: Option<String>,
    pub cancelled: bool,
}

enum StreamEnd {
    Finished,
    Failed(String),
    Cancelled,
}

/// Answer `text` from the session's documents.
///
/// `on_delta` sees each fragment of the response as it arrives. Only a
/// blank message is an error; completion failures and cancellation are
/// reported through [`ChatOutcome`] and leave the session usable.
pub async fn send_message<F>(
    session: &mut Session,
    text: &str,
    mut on_delta: F,
    cancel: &CancellationToken,
) -> Result<ChatOutcome, StudyError>
where
    F: FnMut(&str) + Send,
{
    if text.trim().is_empty() {
        return Err(StudyError::EmptyMessage);
    }

    session.chat_state = ChatState::AwaitingUserInput;
    session.conversation.push_user(text);

    let top_k = session.config().retrieval.top_k;
    let sources = match session.retrieve(text, top_k).await {
        Ok(sources) => sources,
        Err(e) => {
            tracing::warn!(error = %e, "retrieval failed; answering without context");
            Vec::new()
        }
    };
    session.chat_state = ChatState::ContextRetrieved;

    let messages = build_messages(&format_context(&sources), session.conversation.turns());
    let completer = session.completer().clone();

    session.chat_state = ChatState::StreamingResponse;
    let mut reply = String::new();

    let end = tokio::select! {
        biased;
        _ = cancel.cancelled() => StreamEnd::Cancelled,
        opened = completer.stream(messages) => match opened {
            Err(e) => StreamEnd::Failed(e.to_string()),
            Ok(mut stream) => loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break StreamEnd::Cancelled,
                    next = stream.next() => next,
                };
                match next {
                    Some(Ok(StreamEvent::TextDelta { text })) => {
                        reply.push_str(&text);
                        on_delta(&text);
                    }
                    Some(Ok(StreamEvent::MessageEnd { .. })) => break StreamEnd::Finished,
                    Some(Ok(StreamEvent::Error { message })) => break StreamEnd::Failed(message),
                    Some(Err(e)) => break StreamEnd::Failed(e.to_string()),
                    None => {
                        break StreamEnd::Failed(
                            "stream ended before the message finished".to_string(),
                        )
                    }
                }
            },
        },
    };

    let (status, error, cancelled) = match end {
        StreamEnd::Finished => (TurnStatus::Complete, None, false),
        StreamEnd::Failed(message) => {
            let err = StudyError::Completion(message);
            tracing::warn!(error = %err, received = reply.len(), "chat response failed");
            if reply.is_empty() {
                reply = format!("Error: {}", err);
                (TurnStatus::Error, Some(err.to_string()), false)
            } else {
                (TurnStatus::Partial, Some(err.to_string()), false)
            }
        }
        StreamEnd::Cancelled => {
            tracing::info!(received = reply.len(), "chat response cancelled");
            if reply.is_empty() {
                reply = CANCELLED_MESSAGE.to_string();
                (TurnStatus::Error, None, true)
            } else {
                (TurnStatus::Partial, None, true)
            }
        }
    };

    session.conversation.push_assistant(reply.clone(), status);
    session.chat_state = ChatState::Idle;

    Ok(ChatOutcome {
        reply,
        status,
        sources,
        error,
        cancelled,
    })
}

/// Assemble the prompt: instructions, retrieved context, then the history.
///
/// Assistant turns that only carry an error message are left out.
pub fn build_messages(context: &str, history: &[Turn]) -> Vec<Message> {
    let mut messages = vec![
        Message::system(SYSTEM_PROMPT),
        Message::assistant(format!("Context from documents: {}", context)),
    ];
    messages.extend(
        history
            .iter()
            .filter(|turn| turn.status != TurnStatus::Error)
            .map(|turn| Message {
                role: turn.role,
                content: turn.content.clone(),
            }),
    );
    messages
}
