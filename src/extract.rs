//! PDF text extraction.
//!
//! Turns uploaded PDF bytes into numbered pages of plain text. The chunker
//! in `study-harness-core` splits those pages later, when the index is
//! rebuilt. An unreadable or empty document is an [`StudyError::Upload`];
//! the session logs and skips it without failing the rest of the batch.

use study_harness_core::models::PageText;

use crate::error::StudyError;

/// Extract the text of every page in a PDF. Page numbers start at 1.
/// Pages without any text are omitted.
pub fn extract_pages(filename: &str, bytes: &[u8]) -> Result<Vec<PageText>, StudyError> {
    if bytes.is_empty() {
        return Err(StudyError::Upload {
            filename: filename.to_string(),
            reason: "file is empty".to_string(),
        });
    }

    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| {
        StudyError::Upload {
            filename: filename.to_string(),
            reason: e.to_string(),
        }
    })?;

    Ok(pages
        .into_iter()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(i, text)| PageText {
            page: i as u32 + 1,
            text: normalize_page(&text),
        })
        .collect())
}

/// True when the filename looks like a PDF.
pub fn is_pdf_filename(filename: &str) -> bool {
    filename.to_ascii_lowercase().ends_with(".pdf")
}

/// Collapse the layout whitespace PDF extraction leaves behind while
/// keeping blank lines, which the chunker uses as paragraph breaks.
fn normalize_page(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            blank_run += 1;
            continue;
        }
        if !out.is_empty() {
            out.push_str(if blank_run > 0 { "\n\n" } else { "\n" });
        }
        out.push_str(&line);
        blank_run = 0;
    }
    out
}
