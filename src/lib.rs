//! # Study Harness
//!
//! A retrieval-augmented study assistant for PDF course material.
//!
//! Users upload PDFs next to a built-in introductory linguistics text. Each
//! upload is checked for topical relevance, split into page-bounded chunks
//! and embedded into an in-memory vector index that is rebuilt whenever the
//! document set changes. On top of the index sit a streaming chat that
//! cites its sources and a generator for summaries, key concepts, quizzes
//! and flashcards.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────┐   ┌────────────┐   ┌───────────┐   ┌─────────────┐
//! │ Uploads │──▶│  Extract + │──▶│  Chunk +  │──▶│ VectorIndex │
//! │  (PDF)  │   │  Classify  │   │   Embed   │   │ (generation)│
//! └─────────┘   └────────────┘   └───────────┘   └──────┬──────┘
//!                                                       │ retrieve
//!                                   ┌───────────────────┤
//!                                   ▼                   ▼
//!                             ┌──────────┐       ┌─────────────┐
//!                             │   Chat   │       │ Study mats  │
//!                             │ (stream) │       │ (+ export)  │
//!                             └──────────┘       └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! study status notes.pdf               # load and classify
//! study search "What is a morpheme?"   # nearest chunks
//! study ask "What is a morpheme?"      # streamed answer (needs OPENAI_API_KEY)
//! study generate "morphology" --out .  # study files
//! study serve                          # HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Failure taxonomy |
//! | [`extract`] | PDF page extraction |
//! | [`classify`] | Topical relevance check |
//! | [`ingest`] | Upload preparation and index rebuilds |
//! | [`session`] | Per-user session state |
//! | [`chat`] | Streaming retrieval-augmented chat |
//! | [`study`] | Study material generation |
//! | [`export`] | Text, Markdown and JSON downloads |
//! | [`embedding`] | Embedding providers |
//! | [`completion`] | Chat completion providers |
//! | [`server`] | HTTP server |
//! | [`cli`] | `study` command implementations |
//!
//! Models, chunking, the index and retrieval live in `study-harness-core`.

pub mod chat;
pub mod classify;
pub mod cli;
pub mod completion;
pub mod config;
pub mod embedding;
pub mod error;
pub mod export;
pub mod extract;
mod http;
pub mod ingest;
pub mod server;
pub mod session;
pub mod study;

pub use error::StudyError;
pub use session::Session;
