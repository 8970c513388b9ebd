//! HTTP tests: start the server in-process on an ephemeral port and drive
//! it with reqwest, using hash embeddings and a scripted completer.

mod common;

use serde_json::{json, Value};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use study_harness::config::Config;
use study_harness::server::{self, SESSION_HEADER};

use common::{
    delta, end, pdf_with_pages, CountingEmbedder, Script, ScriptedCompletion, MORPHEME_PAGE,
    PHONETICS_PAGE, RECIPE_PAGE,
};

struct TestServer {
    base: String,
    client: reqwest::Client,
    completer: Arc<ScriptedCompletion>,
    embedder: Arc<CountingEmbedder>,
    _tmp: TempDir,
}

async fn start_server(completer: ScriptedCompletion) -> TestServer {
    let tmp = TempDir::new().unwrap();
    let pdf = tmp.path().join("intro.pdf");
    fs::write(&pdf, pdf_with_pages(&[PHONETICS_PAGE, MORPHEME_PAGE])).unwrap();

    let mut config = Config::minimal();
    config.session.default_document = Some(pdf);
    config.classifier.enabled = false;
    config.server.keep_alive_secs = 1;

    let embedder = Arc::new(CountingEmbedder::new());
    let completer = Arc::new(completer);
    let app = server::app(Arc::new(config), embedder.clone(), completer.clone())
        .await
        .unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base: format!("http://{}", addr),
        client: reqwest::Client::new(),
        completer,
        embedder,
        _tmp: tmp,
    }
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Open a session and return its id.
    async fn new_session(&self) -> String {
        let resp = self.client.get(self.url("/documents")).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        session_id(&resp)
    }

    async fn history(&self, session: &str) -> Vec<Value> {
        let body: Value = self
            .client
            .get(self.url("/chat"))
            .header(SESSION_HEADER, session)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        body["turns"].as_array().cloned().unwrap_or_default()
    }
}

fn session_id(resp: &reqwest::Response) -> String {
    resp.headers()[SESSION_HEADER].to_str().unwrap().to_string()
}

/// Split an SSE body into `(event, data)` pairs, skipping keep-alives.
fn sse_events(body: &str) -> Vec<(String, Value)> {
    body.split("\n\n")
        .filter_map(|block| {
            let mut event = None;
            let mut data = None;
            for line in block.lines() {
                if let Some(rest) = line.strip_prefix("event:") {
                    event = Some(rest.trim().to_string());
                } else if let Some(rest) = line.strip_prefix("data:") {
                    data = serde_json::from_str(rest.trim()).ok();
                }
            }
            Some((event?, data.unwrap_or(Value::Null)))
        })
        .collect()
}

fn morphology_answer() -> &'static str {
    r#"{
  "summary": "Morphology is the study of word structure.",
  "key_concepts": [{"term": "morpheme", "definition": "smallest unit of meaning"}],
  "quiz": [{"question": "How many morphemes are in unhappiness?", "options": ["two", "three"], "answer": "three", "explanation": "un + happy + ness"}],
  "flashcards": [{"front": "Morpheme", "back": "Smallest unit of meaning"}]
}"#
}

#[tokio::test]
async fn test_health() {
    let server = start_server(ScriptedCompletion::default()).await;
    let body: Value = server
        .client
        .get(server.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_chat_streams_deltas_then_one_done() {
    let server = start_server(ScriptedCompletion::with_streams(vec![Script::Events(vec![
        delta("Morphemes are "),
        delta("units of meaning."),
        end(),
    ])]))
    .await;
    let session = server.new_session().await;

    let resp = server
        .client
        .post(server.url("/chat"))
        .header(SESSION_HEADER, &session)
        .json(&json!({ "message": "What is a morpheme?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(session_id(&resp), session);
    let events = sse_events(&resp.text().await.unwrap());

    let names: Vec<&str> = events.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["delta", "delta", "done"]);
    assert_eq!(events[0].1["text"], "Morphemes are ");

    let done = &events[2].1;
    assert_eq!(done["status"], "complete");
    assert_eq!(done["reply"], "Morphemes are units of meaning.");
    assert_eq!(done["sources"][0]["filename"], "intro.pdf");
    assert_eq!(done["sources"][0]["page"], 2);

    let turns = server.history(&session).await;
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[1]["status"], "complete");
}

#[tokio::test]
async fn test_chat_failure_reports_done_with_error_turn() {
    let server = start_server(ScriptedCompletion::with_streams(vec![Script::Refuse(
        "overloaded",
    )]))
    .await;
    let session = server.new_session().await;

    let resp = server
        .client
        .post(server.url("/chat"))
        .header(SESSION_HEADER, &session)
        .json(&json!({ "message": "What is a morpheme?" }))
        .send()
        .await
        .unwrap();
    let events = sse_events(&resp.text().await.unwrap());

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, "done");
    assert_eq!(events[0].1["status"], "error");
    assert_eq!(server.history(&session).await.len(), 2);
}

#[tokio::test]
async fn test_blank_chat_message_is_rejected() {
    let server = start_server(ScriptedCompletion::default()).await;
    let resp = server
        .client
        .post(server.url("/chat"))
        .json(&json!({ "message": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    assert_eq!(server.completer.calls(), 0);
}

#[tokio::test]
async fn test_client_disconnect_keeps_partial_turn() {
    let server = start_server(ScriptedCompletion::with_streams(vec![
        Script::EventsThenHang(vec![delta("Morphemes are")]),
    ]))
    .await;
    let session = server.new_session().await;

    let mut resp = server
        .client
        .post(server.url("/chat"))
        .header(SESSION_HEADER, &session)
        .json(&json!({ "message": "What is a morpheme?" }))
        .send()
        .await
        .unwrap();

    let mut received = String::new();
    while !received.contains("Morphemes are") {
        let chunk = tokio::time::timeout(Duration::from_secs(10), resp.chunk())
            .await
            .expect("no delta within 10s")
            .unwrap()
            .expect("stream closed before the first delta");
        received.push_str(&String::from_utf8_lossy(&chunk));
    }
    drop(resp);

    // The history request waits on the session lock until the turn commits.
    let turns = tokio::time::timeout(Duration::from_secs(15), server.history(&session))
        .await
        .expect("partial turn was never committed");
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[1]["status"], "partial");
    assert_eq!(turns[1]["content"], "Morphemes are");

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.history(&session).await.len(), 2);
    assert_eq!(server.completer.calls(), 1);
}

#[tokio::test]
async fn test_upload_and_remove_bump_generation() {
    let server = start_server(ScriptedCompletion::default()).await;

    let resp = server.client.get(server.url("/documents")).send().await.unwrap();
    let session = session_id(&resp);
    let status: Value = resp.json().await.unwrap();
    assert_eq!(status["generation"], 1);
    assert_eq!(status["upload_history"], json!(["intro.pdf"]));

    let form = reqwest::multipart::Form::new()
        .part(
            "files",
            reqwest::multipart::Part::bytes(pdf_with_pages(&[RECIPE_PAGE]))
                .file_name("notes.pdf")
                .mime_str("application/pdf")
                .unwrap(),
        )
        .part(
            "files",
            reqwest::multipart::Part::bytes(b"not a pdf".to_vec()).file_name("notes.docx"),
        );
    let resp = server
        .client
        .post(server.url("/documents"))
        .header(SESSION_HEADER, &session)
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["report"]["accepted"], json!(["notes.pdf"]));
    assert_eq!(body["report"]["skipped"][0]["filename"], "notes.docx");
    assert_eq!(body["status"]["generation"], 2);

    let resp = server
        .client
        .delete(server.url("/documents/notes.pdf"))
        .header(SESSION_HEADER, &session)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let status: Value = resp.json().await.unwrap();
    assert_eq!(status["generation"], 3);
    assert_eq!(status["upload_history"], json!(["intro.pdf"]));

    let resp = server
        .client
        .delete(server.url("/documents/intro.pdf"))
        .header(SESSION_HEADER, &session)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "upload_error");

    let resp = server
        .client
        .delete(server.url("/documents/missing.pdf"))
        .header(SESSION_HEADER, &session)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_search_returns_provenance() {
    let server = start_server(ScriptedCompletion::default()).await;
    let body: Value = server
        .client
        .post(server.url("/search"))
        .json(&json!({ "query": "What is a morpheme?", "k": 1 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["filename"], "intro.pdf");
    assert_eq!(results[0]["page"], 2);
}

#[tokio::test]
async fn test_empty_study_topic_rejected_before_any_call() {
    let server = start_server(ScriptedCompletion::default()).await;
    let session = server.new_session().await;
    let embed_calls = server.embedder.calls();

    let resp = server
        .client
        .post(server.url("/study"))
        .header(SESSION_HEADER, &session)
        .json(&json!({ "topic": "  " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
    assert_eq!(body["error"]["message"], "Please enter a topic first.");
    assert_eq!(server.completer.calls(), 0);
    assert_eq!(server.embedder.calls(), embed_calls);
}

#[tokio::test]
async fn test_study_lists_downloads() {
    let server =
        start_server(ScriptedCompletion::default().answer(morphology_answer())).await;
    let body: Value = server
        .client
        .post(server.url("/study"))
        .json(&json!({ "topic": "morphology" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["materials"]["topic"], "morphology");
    assert_eq!(
        body["downloads"][0]["filename"],
        "study_materials_morphology.txt"
    );
    assert_eq!(body["downloads"][1]["format"], "md");
}

#[tokio::test]
async fn test_study_download_is_an_attachment() {
    let server =
        start_server(ScriptedCompletion::default().answer(morphology_answer())).await;
    let resp = server
        .client
        .post(server.url("/study/download"))
        .json(&json!({ "topic": "morphology", "format": "md" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()["content-disposition"],
        "attachment; filename=\"study_materials_morphology.md\""
    );
    assert!(resp.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/markdown"));
    assert!(resp.headers().contains_key(SESSION_HEADER));
    let body = resp.text().await.unwrap();
    assert!(body.starts_with("# Study Materials: morphology"));
}

#[tokio::test]
async fn test_ended_session_is_forgotten() {
    let server = start_server(ScriptedCompletion::default()).await;
    let session = server.new_session().await;

    let resp = server
        .client
        .delete(server.url("/session"))
        .header(SESSION_HEADER, &session)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let resp = server
        .client
        .delete(server.url("/session"))
        .header(SESSION_HEADER, &session)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    assert_ne!(server.new_session().await, session);
}
