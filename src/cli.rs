//! Command implementations for the `study` binary.
//!
//! Each command opens a one-off session (the configured default document
//! plus any `--pdf` files), does its work and prints to stdout. Logs go to
//! stderr.

use anyhow::{bail, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio_util::sync::CancellationToken;

use study_harness_core::models::TurnStatus;

use crate::chat::send_message;
use crate::completion::create_completion_provider;
use crate::config::Config;
use crate::embedding::create_provider;
use crate::error::StudyError;
use crate::export::{render_all, write_downloads, Format};
use crate::ingest::Upload;
use crate::session::{Session, UploadReport};
use crate::study::generate_for_session;

/// Start a session and load `pdfs` into it.
pub async fn open_session(config: &Config, pdfs: &[PathBuf]) -> Result<Session> {
    if config.session.default_document.is_none() {
        tracing::warn!("session.default_document is not set; starting without a built-in document");
        eprintln!(
            "Warning: no built-in document configured; set default_document under [session] in the config."
        );
    }
    let embedder = create_provider(&config.embedding)?;
    let completer = create_completion_provider(&config.completion)?;
    let mut session = Session::start(Arc::new(config.clone()), embedder, completer).await?;

    if !pdfs.is_empty() {
        let uploads = pdfs
            .iter()
            .map(|p| Upload::from_path(p))
            .collect::<Result<Vec<_>>>()?;
        let report = session.add_documents(uploads).await;
        print_upload_report(&report);
    }
    Ok(session)
}

fn print_upload_report(report: &UploadReport) {
    for skipped in &report.skipped {
        eprintln!("Skipped {}: {}", skipped.filename, skipped.reason);
    }
    if !report.flagged.is_empty() {
        println!("The following files were flagged as non-NLP relevant:");
        for name in &report.flagged {
            println!("  {}", name);
        }
        println!();
    }
}

pub async fn run_status(config: &Config, pdfs: &[PathBuf]) -> Result<()> {
    let session = open_session(config, pdfs).await?;
    let status = session.status();

    println!("Current Learning Materials");
    if status.documents.is_empty() {
        println!("  (none)");
    }
    for doc in &status.documents {
        let mut tags = Vec::new();
        if doc.builtin {
            tags.push("built-in");
        }
        if doc.flagged {
            tags.push("flagged");
        }
        let tags = if tags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", tags.join(", "))
        };
        println!(
            "  - {} ({} pages, {} chunks){}",
            doc.filename, doc.pages, doc.chunks, tags
        );
    }
    println!();
    println!("index generation: {}", status.generation);
    println!("chunks indexed:   {}", status.chunks);
    if status.dropped > 0 {
        println!("chunks dropped:   {}", status.dropped);
    }
    Ok(())
}

pub async fn run_search(
    config: &Config,
    query: &str,
    pdfs: &[PathBuf],
    k: Option<usize>,
) -> Result<()> {
    if query.trim().is_empty() {
        bail!("query must not be empty");
    }
    let session = open_session(config, pdfs).await?;
    let k = k.unwrap_or(config.retrieval.top_k);
    let results = session.retrieve(query, k).await?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        println!(
            "{}. [{:.3}] {}, Page: {}",
            i + 1,
            result.distance,
            result.filename,
            result.page
        );
        println!(
            "    excerpt: \"{}\"",
            excerpt(&result.text, 240).replace('\n', " ").trim()
        );
        println!();
    }
    Ok(())
}

pub async fn run_ask(config: &Config, question: &str, pdfs: &[PathBuf]) -> Result<()> {
    if question.trim().is_empty() {
        bail!(StudyError::EmptyMessage);
    }
    let mut session = open_session(config, pdfs).await?;
    let mut interrupts = interrupts();
    let status = ask_once(&mut session, question, &mut interrupts).await?;
    if status == TurnStatus::Error {
        bail!("no answer was produced");
    }
    Ok(())
}

/// Interactive chat on stdin. Ctrl-C cancels the response being streamed,
/// or leaves when pressed at the prompt; so do `exit`, `quit` and end of
/// input.
pub async fn run_chat(config: &Config, pdfs: &[PathBuf]) -> Result<()> {
    let mut session = open_session(config, pdfs).await?;
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    println!("Ask anything about NLP (type 'exit' to quit).");
    chat_loop(&mut session, stdin, &mut interrupts()).await
}

/// Forward every Ctrl-C for the rest of the process to one channel.
///
/// Listening replaces the default SIGINT handler, so the listener is
/// installed once and interrupts are interpreted by whoever is reading.
fn interrupts() -> UnboundedReceiver<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if tx.send(()).is_err() {
                break;
            }
        }
    });
    rx
}

async fn chat_loop<R>(
    session: &mut Session,
    input: R,
    interrupts: &mut UnboundedReceiver<()>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = interrupts.recv() => None,
        };
        let Some(line) = line else {
            println!();
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }
        ask_once(session, line, interrupts).await?;
    }
    Ok(())
}

/// Stream one answer to stdout and print its sources. An interrupt while
/// streaming cancels the answer.
async fn ask_once(
    session: &mut Session,
    question: &str,
    interrupts: &mut UnboundedReceiver<()>,
) -> Result<TurnStatus> {
    let cancel = CancellationToken::new();
    let mut stdout = std::io::stdout();
    let chat = send_message(
        session,
        question,
        |delta| {
            let _ = stdout.write_all(delta.as_bytes());
            let _ = stdout.flush();
        },
        &cancel,
    );
    tokio::pin!(chat);

    let outcome = loop {
        tokio::select! {
            outcome = &mut chat => break outcome?,
            Some(()) = interrupts.recv(), if !cancel.is_cancelled() => cancel.cancel(),
        }
    };

    match outcome.status {
        TurnStatus::Complete => println!(),
        TurnStatus::Partial => {
            println!();
            if outcome.cancelled {
                eprintln!("(response cancelled)");
            }
        }
        TurnStatus::Error => {}
    }
    if let Some(error) = &outcome.error {
        eprintln!("Error: {}", error);
    } else if outcome.status == TurnStatus::Error {
        eprintln!("{}", outcome.reply);
    }

    if !outcome.sources.is_empty() && outcome.status != TurnStatus::Error {
        println!();
        println!("Sources:");
        for source in &outcome.sources {
            println!("  [Source: {}, Page: {}]", source.filename, source.page);
        }
    }
    println!();
    Ok(outcome.status)
}

pub async fn run_generate(
    config: &Config,
    topic: &str,
    pdfs: &[PathBuf],
    out: &Path,
    formats: &[Format],
) -> Result<()> {
    if topic.trim().is_empty() {
        // Rejected before any document is loaded or any service is called.
        bail!(StudyError::EmptyTopic);
    }
    let session = open_session(config, pdfs).await?;

    println!("Generating materials for '{}'...", topic.trim());
    let materials = generate_for_session(&session, topic).await?;

    let formats = if formats.is_empty() {
        config.study.formats.as_slice()
    } else {
        formats
    };
    let downloads = render_all(&materials, formats)?;
    for path in write_downloads(out, &downloads)? {
        println!("wrote {}", path.display());
    }
    Ok(())
}

fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push('…');
    cut
}
