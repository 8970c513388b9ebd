//! # Study Harness Core
//!
//! Pure pipeline logic for Study Harness: data models, page-bounded
//! chunking, the embedding trait, the in-memory vector index and the
//! retriever.
//!
//! This crate performs no network or filesystem I/O and has no runtime
//! dependency on tokio; concrete embedding backends and the completion
//! client live in the `study-harness` app crate.

pub mod chunk;
pub mod embedding;
pub mod index;
pub mod models;
pub mod search;
