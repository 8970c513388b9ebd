//! Tests that drive the `study` binary end to end with offline providers.

mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

use common::{pdf_with_pages, MORPHEME_PAGE, PHONETICS_PAGE};

fn study_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("study");
    path
}

/// A config with the two-page linguistics PDF as the built-in document,
/// hash embeddings and no completion provider.
fn setup_test_env(extra: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let assets = root.join("assets");
    fs::create_dir_all(&assets).unwrap();
    fs::write(
        assets.join("intro.pdf"),
        pdf_with_pages(&[PHONETICS_PAGE, MORPHEME_PAGE]),
    )
    .unwrap();

    let config_content = format!(
        r#"[session]
default_document = "{}/assets/intro.pdf"

[embedding]
provider = "hash"
dims = 256

{}

[server]
bind = "127.0.0.1:8501"
"#,
        root.display(),
        extra
    );

    let config_path = root.join("study.toml");
    fs::write(&config_path, config_content).unwrap();
    (tmp, config_path)
}

fn run_study(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = study_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("OPENAI_API_KEY")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run study binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_status_lists_builtin_document() {
    let (_tmp, config) = setup_test_env("");
    let (stdout, stderr, success) = run_study(&config, &["status"]);
    assert!(success, "status failed: {}", stderr);
    assert!(stdout.contains("Current Learning Materials"));
    assert!(stdout.contains("intro.pdf (2 pages, 2 chunks) [built-in]"));
    assert!(stdout.contains("index generation: 1"));
    assert!(stdout.contains("chunks indexed:   2"));
}

#[test]
fn test_search_cites_the_morpheme_page() {
    let (_tmp, config) = setup_test_env("");
    let (stdout, stderr, success) =
        run_study(&config, &["search", "What is a morpheme?", "-k", "1"]);
    assert!(success, "search failed: {}", stderr);
    assert!(stdout.contains("1. ["));
    assert!(stdout.contains("intro.pdf, Page: 2"));
    assert!(!stdout.contains("2. ["));
}

#[test]
fn test_unreadable_upload_is_skipped() {
    let (tmp, config) = setup_test_env("");
    let broken = tmp.path().join("broken.pdf");
    fs::write(&broken, b"this is not a pdf").unwrap();

    let (stdout, stderr, success) = run_study(&config, &["status", broken.to_str().unwrap()]);
    assert!(success, "status failed: {}", stderr);
    assert!(stderr.contains("Skipped broken.pdf"));
    assert!(!stdout.contains("broken.pdf"));
    assert!(stdout.contains("index generation: 1"));
}

#[test]
fn test_upload_rebuilds_index() {
    let (tmp, config) = setup_test_env("[classifier]\nenabled = false\n");
    let notes = tmp.path().join("notes.pdf");
    fs::write(&notes, pdf_with_pages(&[MORPHEME_PAGE])).unwrap();

    let (stdout, stderr, success) = run_study(&config, &["status", notes.to_str().unwrap()]);
    assert!(success, "status failed: {}", stderr);
    assert!(stdout.contains("notes.pdf (1 pages, 1 chunks)"));
    assert!(stdout.contains("index generation: 2"));
    assert!(!stdout.contains("flagged as non-NLP relevant"));
}

#[test]
fn test_generate_rejects_empty_topic() {
    let (tmp, config) = setup_test_env("");
    let out = tmp.path().join("out");
    let (_stdout, stderr, success) = run_study(
        &config,
        &["generate", "", "--out", out.to_str().unwrap()],
    );
    assert!(!success);
    assert!(stderr.contains("Please enter a topic first."));
    assert!(!out.exists());
}

#[test]
fn test_ask_without_completion_provider_fails() {
    let (_tmp, config) = setup_test_env("");
    let (_stdout, stderr, success) = run_study(&config, &["ask", "What is a morpheme?"]);
    assert!(!success);
    assert!(stderr.contains("completion provider is disabled") || stderr.contains("no answer"));
}

#[test]
fn test_missing_config_file_fails() {
    let tmp = TempDir::new().unwrap();
    let (_stdout, stderr, success) = run_study(&tmp.path().join("nope.toml"), &["status"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_invalid_top_k_is_rejected() {
    let (_tmp, config) = setup_test_env("[retrieval]\ntop_k = 0\n");
    let (_stdout, stderr, success) = run_study(&config, &["status"]);
    assert!(!success);
    assert!(stderr.contains("retrieval.top_k must be >= 1"));
}

#[test]
fn test_missing_builtin_document_is_warned() {
    let tmp = TempDir::new().unwrap();
    let notes = tmp.path().join("notes.pdf");
    fs::write(&notes, pdf_with_pages(&[MORPHEME_PAGE])).unwrap();
    let config = tmp.path().join("study.toml");
    fs::write(
        &config,
        "[embedding]\nprovider = \"hash\"\ndims = 64\n\n[classifier]\nenabled = false\n\n[server]\nbind = \"127.0.0.1:8501\"\n",
    )
    .unwrap();

    let (stdout, stderr, success) = run_study(&config, &["status", notes.to_str().unwrap()]);
    assert!(success, "status failed: {}", stderr);
    assert!(stderr.contains("no built-in document configured"));
    assert!(stdout.contains("notes.pdf (1 pages, 1 chunks)"));
    assert!(!stdout.contains("built-in"));

    let (_stdout, stderr, success) =
        run_study(&config, &["search", "morpheme", "--pdf", notes.to_str().unwrap()]);
    assert!(success, "search failed: {}", stderr);
    assert!(stderr.contains("no built-in document configured"));
}

#[test]
fn test_configured_builtin_document_is_not_warned() {
    let (_tmp, config) = setup_test_env("");
    let (_stdout, stderr, success) = run_study(&config, &["status"]);
    assert!(success, "status failed: {}", stderr);
    assert!(!stderr.contains("no built-in document configured"));
}
