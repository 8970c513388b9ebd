//! Render study materials as downloadable files.
//!
//! Each [`Format`] produces one [`Download`] named after the topic, e.g.
//! `study_materials_morphology.md`. The HTTP layer serves downloads as
//! attachments; the CLI writes them to a directory.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::study::StudyMaterials;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Format {
    #[serde(rename = "txt")]
    Txt,
    #[serde(rename = "md")]
    Markdown,
    #[serde(rename = "json")]
    Json,
}

impl Format {
    pub fn extension(&self) -> &'static str {
        match self {
            Format::Txt => "txt",
            Format::Markdown => "md",
            Format::Json => "json",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Format::Txt => "text/plain; charset=utf-8",
            Format::Markdown => "text/markdown; charset=utf-8",
            Format::Json => "application/json",
        }
    }
}

impl FromStr for Format {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "txt" | "text" => Ok(Format::Txt),
            "md" | "markdown" => Ok(Format::Markdown),
            "json" => Ok(Format::Json),
            other => anyhow::bail!("Unknown format: '{}'. Must be txt, md, or json.", other),
        }
    }
}

/// A rendered file ready to hand to the user.
#[derive(Debug, Clone, Serialize)]
pub struct Download {
    pub filename: String,
    pub content_type: &'static str,
    pub body: String,
}

pub fn render(materials: &StudyMaterials, format: Format) -> Result<Download> {
    let body = match format {
        Format::Txt => render_text(materials),
        Format::Markdown => render_markdown(materials),
        Format::Json => serde_json::to_string_pretty(materials)?,
    };
    Ok(Download {
        filename: download_name(&materials.topic, format),
        content_type: format.content_type(),
        body,
    })
}

pub fn render_all(materials: &StudyMaterials, formats: &[Format]) -> Result<Vec<Download>> {
    formats.iter().map(|f| render(materials, *f)).collect()
}

/// Write downloads into `dir`, creating it if needed. Returns the paths written.
pub fn write_downloads(dir: &Path, downloads: &[Download]) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;

    downloads
        .iter()
        .map(|d| {
            let path = dir.join(&d.filename);
            std::fs::write(&path, &d.body)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            Ok(path)
        })
        .collect()
}

pub fn download_name(topic: &str, format: Format) -> String {
    format!("study_materials_{}.{}", slugify(topic), format.extension())
}

/// Lowercase ASCII alphanumerics joined by underscores.
pub fn slugify(topic: &str) -> String {
    let slug = topic
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| part.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join("_");
    if slug.is_empty() {
        "topic".to_string()
    } else {
        slug
    }
}

fn render_text(m: &StudyMaterials) -> String {
    let mut out = String::new();
    let rule = "=".repeat(60);

    let _ = writeln!(out, "STUDY MATERIALS: {}", m.topic.to_uppercase());
    let _ = writeln!(out, "{}\n", rule);

    let _ = writeln!(out, "SUMMARY\n-------\n{}\n", m.summary.trim());

    let _ = writeln!(out, "KEY CONCEPTS\n------------");
    for c in &m.key_concepts {
        let _ = writeln!(out, "* {}: {}", c.term, c.definition);
    }

    let _ = writeln!(out, "\nQUIZ\n----");
    for (i, q) in m.quiz.iter().enumerate() {
        let _ = writeln!(out, "{}. {}", i + 1, q.question);
        for (j, option) in q.options.iter().enumerate() {
            let _ = writeln!(out, "   {}) {}", option_label(j), option);
        }
        let _ = writeln!(out, "   Answer: {}", q.answer);
        if !q.explanation.is_empty() {
            let _ = writeln!(out, "   Explanation: {}", q.explanation);
        }
        out.push('\n');
    }

    let _ = writeln!(out, "FLASHCARDS\n----------");
    for card in &m.flashcards {
        let _ = writeln!(out, "Front: {}\nBack:  {}\n", card.front, card.back);
    }

    if !m.sources.is_empty() {
        let _ = writeln!(out, "SOURCES\n-------");
        for s in &m.sources {
            let _ = writeln!(out, "[Source: {}]", s);
        }
    }
    out
}

fn render_markdown(m: &StudyMaterials) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# Study Materials: {}\n", m.topic);
    let _ = writeln!(out, "## Summary\n\n{}\n", m.summary.trim());

    let _ = writeln!(out, "## Key Concepts\n");
    for c in &m.key_concepts {
        let _ = writeln!(out, "- **{}**: {}", c.term, c.definition);
    }

    let _ = writeln!(out, "\n## Quiz\n");
    for (i, q) in m.quiz.iter().enumerate() {
        let _ = writeln!(out, "### Question {}\n\n{}\n", i + 1, q.question);
        for (j, option) in q.options.iter().enumerate() {
            let _ = writeln!(out, "- {}) {}", option_label(j), option);
        }
        let _ = writeln!(out, "\n<details><summary>Answer</summary>\n");
        let _ = writeln!(out, "**{}**\n", q.answer);
        if !q.explanation.is_empty() {
            let _ = writeln!(out, "{}\n", q.explanation);
        }
        let _ = writeln!(out, "</details>\n");
    }

    let _ = writeln!(out, "## Flashcards\n");
    let _ = writeln!(out, "| Front | Back |\n|-------|------|");
    for card in &m.flashcards {
        let _ = writeln!(out, "| {} | {} |", table_cell(&card.front), table_cell(&card.back));
    }

    if !m.sources.is_empty() {
        let _ = writeln!(out, "\n## Sources\n");
        for s in &m.sources {
            let _ = writeln!(out, "- {}", s);
        }
    }
    out
}

fn option_label(i: usize) -> char {
    (b'A' + (i % 26) as u8) as char
}

fn table_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}
