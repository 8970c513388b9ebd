//! TOML configuration parsing and validation.
//!
//! Study Harness reads a single TOML file (default `./config/study.toml`).
//! Every section except `[server]` may be omitted and falls back to the
//! defaults below. Secrets are never read from the file: the OpenAI key
//! comes from `OPENAI_API_KEY`.
//!
//! ```toml
//! [session]
//! default_document = "assets/An_Introduction_to_Language_and_Linguistics.pdf"
//! default_document_name = "An Introduction to Language and Linguistics.pdf"
//!
//! [chunking]
//! max_tokens = 250
//!
//! [retrieval]
//! top_k = 3
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [completion]
//! provider = "openai"
//! model = "gpt-4o"
//!
//! [classifier]
//! enabled = true
//!
//! [study]
//! formats = ["txt", "md"]
//!
//! [server]
//! bind = "127.0.0.1:8501"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::export::Format;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub study: StudyConfig,
    pub server: ServerConfig,
}

/// The built-in document every session starts with.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SessionConfig {
    #[serde(default)]
    pub default_document: Option<PathBuf>,
    /// Display name; defaults to the file name of `default_document`.
    #[serde(default)]
    pub default_document_name: Option<String>,
}

impl SessionConfig {
    pub fn default_document_name(&self) -> Option<String> {
        self.default_document_name.clone().or_else(|| {
            self.default_document
                .as_ref()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    250
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    study_harness_core::search::DEFAULT_TOP_K
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider (default `http://localhost:11434`).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_completion_provider")]
    pub provider: String,
    #[serde(default = "default_completion_model")]
    pub model: String,
    /// API base URL (default `https://api.openai.com`).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_completion_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_completion_retries")]
    pub max_retries: u32,
    #[serde(default = "default_completion_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: default_completion_provider(),
            model: default_completion_model(),
            url: None,
            temperature: default_temperature(),
            max_tokens: default_completion_max_tokens(),
            max_retries: default_completion_retries(),
            timeout_secs: default_completion_timeout_secs(),
        }
    }
}

fn default_completion_provider() -> String {
    "disabled".to_string()
}
fn default_completion_model() -> String {
    "gpt-4o".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_completion_max_tokens() -> u32 {
    2048
}
fn default_completion_retries() -> u32 {
    2
}
fn default_completion_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClassifierConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Characters of extracted text sent to the classifier.
    #[serde(default = "default_sample_chars")]
    pub sample_chars: usize,
    #[serde(default = "default_classifier_topic")]
    pub topic: String,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_chars: default_sample_chars(),
            topic: default_classifier_topic(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_sample_chars() -> usize {
    4000
}
fn default_classifier_topic() -> String {
    "Natural Language Processing (NLP)".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StudyConfig {
    /// Chunks retrieved as context for study material generation.
    #[serde(default = "default_context_k")]
    pub context_k: usize,
    #[serde(default = "default_formats")]
    pub formats: Vec<Format>,
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            context_k: default_context_k(),
            formats: default_formats(),
        }
    }
}

fn default_context_k() -> usize {
    5
}
fn default_formats() -> Vec<Format> {
    vec![Format::Txt, Format::Markdown]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
    /// Live sessions kept at once; the least recently used goes first.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Sessions idle for longer than this are dropped.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// Interval between SSE keep-alive comments on chat streams.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

fn default_max_upload_mb() -> usize {
    50
}

fn default_max_sessions() -> usize {
    256
}

fn default_session_ttl_secs() -> u64 {
    3600
}

fn default_keep_alive_secs() -> u64 {
    15
}

impl Config {
    /// Defaults for commands that can run without a config file.
    pub fn minimal() -> Self {
        Self {
            session: SessionConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            completion: CompletionConfig::default(),
            classifier: ClassifierConfig::default(),
            study: StudyConfig::default(),
            server: ServerConfig {
                bind: "127.0.0.1:8501".to_string(),
                max_upload_mb: default_max_upload_mb(),
                max_sessions: default_max_sessions(),
                session_ttl_secs: default_session_ttl_secs(),
                keep_alive_secs: default_keep_alive_secs(),
            },
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }

    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    if config.study.context_k < 1 {
        anyhow::bail!("study.context_k must be >= 1");
    }

    if config.server.max_sessions == 0 {
        anyhow::bail!("server.max_sessions must be >= 1");
    }

    if config.server.keep_alive_secs == 0 {
        anyhow::bail!("server.keep_alive_secs must be >= 1");
    }

    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "hash" | "local" => {}
        "openai" | "ollama" => {
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                anyhow::bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hash, openai, ollama, or local.",
            other
        ),
    }

    match config.completion.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown completion provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if !(0.0..=2.0).contains(&config.completion.temperature) {
        anyhow::bail!("completion.temperature must be in [0.0, 2.0]");
    }

    Ok(())
}
