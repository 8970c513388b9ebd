//! # Study Harness CLI (`study`)
//!
//! Load the built-in linguistics text plus your own PDFs, then search them,
//! chat over them, generate study materials, or serve the browser front end.
//!
//! ## Usage
//!
//! ```bash
//! study --config ./config/study.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `study status [PDF...]` | Show loaded and flagged documents and the index size |
//! | `study search "<query>"` | Print the nearest chunks with their sources |
//! | `study ask "<question>"` | Stream one answer to stdout |
//! | `study chat` | Interactive chat; Ctrl-C cancels the current answer |
//! | `study generate "<topic>"` | Write study materials to files |
//! | `study serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! # Which uploads look off-topic?
//! study status notes/week1.pdf notes/week2.pdf
//!
//! # Ask with an extra lecture loaded
//! study ask "What is a morpheme?" --pdf notes/morphology.pdf
//!
//! # Markdown and JSON study sheets into ./out
//! study generate "morphology" --format md --format json --out ./out
//! ```
//!
//! Set `RUST_LOG=debug` for verbose logs on stderr.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use study_harness::cli;
use study_harness::config::{self, Config};
use study_harness::export::Format;
use study_harness::server;

const DEFAULT_CONFIG: &str = "./config/study.toml";

/// Study Harness: chat with your course PDFs and turn them into study materials.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/study.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "study",
    about = "Study Harness: a retrieval-augmented study assistant for PDF course material",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/study.toml`. When no file is given and the
    /// default does not exist, built-in defaults are used (offline hash
    /// embeddings, no completion provider).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load documents and show what the session contains.
    ///
    /// Lists every loaded document with its page and chunk counts and marks
    /// files the classifier flagged as off-topic.
    Status {
        /// Extra PDF files to upload.
        pdfs: Vec<PathBuf>,
    },

    /// Search the loaded documents.
    Search {
        /// The search query string.
        query: String,

        /// Extra PDF files to upload.
        #[arg(long = "pdf")]
        pdfs: Vec<PathBuf>,

        /// Number of chunks to return (defaults to `retrieval.top_k`).
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Ask a single question and stream the answer.
    Ask {
        question: String,

        #[arg(long = "pdf")]
        pdfs: Vec<PathBuf>,
    },

    /// Chat interactively on stdin.
    Chat {
        #[arg(long = "pdf")]
        pdfs: Vec<PathBuf>,
    },

    /// Generate study materials for a topic and write them to files.
    Generate {
        topic: String,

        #[arg(long = "pdf")]
        pdfs: Vec<PathBuf>,

        /// Output directory.
        #[arg(long, default_value = ".")]
        out: PathBuf,

        /// Output format: `txt`, `md` or `json`. Repeatable; defaults to
        /// `study.formats`.
        #[arg(long = "format")]
        formats: Vec<Format>,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cfg = match &args.config {
        Some(path) => config::load_config(path)?,
        None if Path::new(DEFAULT_CONFIG).exists() => {
            config::load_config(Path::new(DEFAULT_CONFIG))?
        }
        None => {
            tracing::info!("no config file found; using defaults");
            Config::minimal()
        }
    };

    match args.command {
        Commands::Status { pdfs } => cli::run_status(&cfg, &pdfs).await?,
        Commands::Search { query, pdfs, k } => cli::run_search(&cfg, &query, &pdfs, k).await?,
        Commands::Ask { question, pdfs } => cli::run_ask(&cfg, &question, &pdfs).await?,
        Commands::Chat { pdfs } => cli::run_chat(&cfg, &pdfs).await?,
        Commands::Generate {
            topic,
            pdfs,
            out,
            formats,
        } => cli::run_generate(&cfg, &topic, &pdfs, &out, &formats).await?,
        Commands::Serve => server::run_server(&cfg).await?,
    }

    Ok(())
}
