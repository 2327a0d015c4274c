//! End-to-end pipeline tests against a fake OpenAI-compatible server.

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use docforge::completion::{ChatMessage, CompletionClient};
use docforge::config::{parse_config, ApiKey, Config};
use docforge::embedding::Embedder;
use docforge::index::{handle_from_config, IndexHandle, IndexSettings, RetrievalMode};
use docforge::models::{Corpus, Document};
use docforge::pipeline::{Pipeline, Request};
use docforge::prompt::{Mode, TemplateRegistry};
use docforge::Error;

const VOCAB: [&str; 3] = ["automat", "warehouse", "benefit"];

#[derive(Clone, Default)]
struct FakeOpenAi {
    embedding_requests: Arc<Mutex<Vec<Value>>>,
    chat_requests: Arc<Mutex<Vec<Value>>>,
    auth_headers: Arc<Mutex<Vec<String>>>,
    fail_embeddings: Arc<AtomicBool>,
    fail_chat: Arc<AtomicBool>,
}

impl FakeOpenAi {
    fn chat_requests(&self) -> Vec<Value> {
        self.chat_requests.lock().unwrap().clone()
    }
}

fn record_auth(state: &FakeOpenAi, headers: &HeaderMap) {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    state.auth_headers.lock().unwrap().push(auth);
}

fn vocab_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    VOCAB
        .iter()
        .map(|stem| lower.matches(stem).count() as f32 + 0.01)
        .collect()
}

async fn embeddings(
    State(state): State<FakeOpenAi>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record_auth(&state, &headers);
    state.embedding_requests.lock().unwrap().push(body.clone());

    if state.fail_embeddings.load(Ordering::SeqCst) {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": { "message": "embedding backend down" } })),
        )
            .into_response();
    }

    let inputs = body["input"].as_array().cloned().unwrap_or_default();
    let data: Vec<Value> = inputs
        .iter()
        .enumerate()
        .map(|(i, text)| {
            json!({
                "object": "embedding",
                "index": i,
                "embedding": vocab_vector(text.as_str().unwrap_or_default()),
            })
        })
        .collect();
    Json(json!({ "object": "list", "data": data, "model": body["model"] })).into_response()
}

async fn chat_completions(
    State(state): State<FakeOpenAi>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record_auth(&state, &headers);
    state.chat_requests.lock().unwrap().push(body.clone());

    if state.fail_chat.load(Ordering::SeqCst) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": { "message": "invalid api key" } })),
        )
            .into_response();
    }

    Json(json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "model": body["model"],
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": "# Job Title: Backend Engineer\n..." },
            "finish_reason": "stop"
        }]
    }))
    .into_response()
}

/// Start the fake server and return its `/v1` base URL.
async fn start_fake_openai(state: FakeOpenAi) -> String {
    let app = Router::new()
        .route("/v1/embeddings", post(embeddings))
        .route("/v1/chat/completions", post(chat_completions))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/v1", addr)
}

fn write_corpus(dir: &Path) {
    std::fs::write(
        dir.join("rohlik.txt"),
        "Rohlik Group operates automated warehouses.",
    )
    .unwrap();
}

fn config_for(corpus_dir: &Path, base_url: &str) -> Config {
    parse_config(&format!(
        r#"
[corpus]
dir = "{dir}"

[retrieval]
mode = "semantic"

[embedding]
provider = "openai"
url = "{url}"
timeout_secs = 5

[completion]
base_url = "{url}"
timeout_secs = 5
"#,
        dir = corpus_dir.display(),
        url = base_url,
    ))
    .unwrap()
}

#[tokio::test]
async fn job_description_embeds_retrieved_passage_in_single_system_message() {
    let tmp = TempDir::new().unwrap();
    write_corpus(tmp.path());
    let server = FakeOpenAi::default();
    let base_url = start_fake_openai(server.clone()).await;

    let config = config_for(tmp.path(), &base_url);
    let pipeline = Pipeline::from_config(&config, ApiKey::new("sk-test")).unwrap();

    let response = pipeline
        .handle(&Request::new(Mode::JobDescription, "automation"))
        .await
        .unwrap();

    assert_eq!(response.mode, Mode::JobDescription);
    assert!(response.text.starts_with("# Job Title: Backend Engineer"));
    assert_eq!(response.retrieval.passages.len(), 1);
    assert!(response.retrieval.passages[0].text.contains("automated warehouses"));

    let chats = server.chat_requests();
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0]["model"], "gpt-4o");
    let messages = chats[0]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["role"], "system");
    let content = messages[0]["content"].as_str().unwrap();
    assert!(content.contains("# Job Title: automation"));
    assert!(content.contains(
        "**Context from company documents:**\nRohlik Group operates automated warehouses."
    ));

    let auth = server.auth_headers.lock().unwrap();
    assert!(auth.iter().all(|h| h == "Bearer sk-test"));
}

#[tokio::test]
async fn question_mode_sends_system_and_user_messages() {
    let tmp = TempDir::new().unwrap();
    write_corpus(tmp.path());
    let server = FakeOpenAi::default();
    let base_url = start_fake_openai(server.clone()).await;

    let config = config_for(tmp.path(), &base_url);
    let pipeline = Pipeline::from_config(&config, ApiKey::new("sk-test")).unwrap();
    pipeline
        .handle(&Request::new(Mode::Question, "Does Rohlik use automation?"))
        .await
        .unwrap();

    let chats = server.chat_requests();
    let messages = chats[0]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "system");
    assert_eq!(messages[1]["role"], "user");
    let user = messages[1]["content"].as_str().unwrap();
    assert!(user.contains("Rohlik Group operates automated warehouses."));
    assert!(user.ends_with("Question: Does Rohlik use automation?"));
}

#[tokio::test]
async fn embedding_outage_fails_request_without_completion_call() {
    let tmp = TempDir::new().unwrap();
    write_corpus(tmp.path());
    let server = FakeOpenAi::default();
    server.fail_embeddings.store(true, Ordering::SeqCst);
    let base_url = start_fake_openai(server.clone()).await;

    let config = config_for(tmp.path(), &base_url);
    let pipeline = Pipeline::from_config(&config, ApiKey::new("sk-test")).unwrap();

    let err = pipeline
        .handle(&Request::new(Mode::JobDescription, "automation"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Retrieval(_)), "got {:?}", err);
    assert!(server.chat_requests().is_empty());
    // At-most-once: no retry with the default policy.
    assert_eq!(server.embedding_requests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn completion_failure_is_surfaced_once() {
    let tmp = TempDir::new().unwrap();
    write_corpus(tmp.path());
    let server = FakeOpenAi::default();
    server.fail_chat.store(true, Ordering::SeqCst);
    let base_url = start_fake_openai(server.clone()).await;

    let config = config_for(tmp.path(), &base_url);
    let pipeline = Pipeline::from_config(&config, ApiKey::new("sk-bad")).unwrap();

    let err = pipeline
        .handle(&Request::new(Mode::CaseStudy, "automation"))
        .await
        .unwrap_err();

    match err {
        Error::Completion(msg) => assert!(msg.contains("401"), "message: {}", msg),
        other => panic!("expected completion error, got {:?}", other),
    }
    assert_eq!(server.chat_requests().len(), 1);
}

#[tokio::test]
async fn index_is_built_once_and_reused_across_requests() {
    let tmp = TempDir::new().unwrap();
    write_corpus(tmp.path());
    let server = FakeOpenAi::default();
    let base_url = start_fake_openai(server.clone()).await;

    let config = config_for(tmp.path(), &base_url);
    let pipeline = Pipeline::from_config(&config, ApiKey::new("sk-test")).unwrap();

    for _ in 0..3 {
        pipeline
            .handle(&Request::new(Mode::Question, "automation"))
            .await
            .unwrap();
    }

    // One batch for the corpus, then one query embedding per request.
    assert_eq!(server.embedding_requests.lock().unwrap().len(), 4);
    assert_eq!(server.chat_requests().len(), 3);
}

#[tokio::test]
async fn rebuild_reflects_files_added_after_first_build() {
    let tmp = TempDir::new().unwrap();
    write_corpus(tmp.path());

    let config = parse_config(&format!(
        "[corpus]\ndir = \"{}\"\n\n[retrieval]\nmode = \"keyword\"\n\n[embedding]\nprovider = \"disabled\"\n",
        tmp.path().display()
    ))
    .unwrap();
    let handle = handle_from_config(&config, None, None).unwrap();

    let first = handle.get().await.unwrap();
    assert!(first.query("vouchers").await.unwrap().is_empty());

    std::fs::write(tmp.path().join("benefits.txt"), "Meal vouchers for every employee.").unwrap();
    let cached = handle.get().await.unwrap();
    assert!(cached.query("vouchers").await.unwrap().is_empty());

    let rebuilt = handle.rebuild().await.unwrap();
    let result = rebuilt.query("vouchers").await.unwrap();
    assert_eq!(result.passages.len(), 1);
    assert_eq!(result.passages[0].document_id, "benefits.txt");
    assert_eq!(rebuilt.stats().documents, 2);
}

/// Embeds the corpus, then fails every query.
struct FlakyEmbedder {
    calls: AtomicUsize,
}

#[async_trait]
impl Embedder for FlakyEmbedder {
    fn model_name(&self) -> &str {
        "flaky"
    }

    fn dims(&self) -> usize {
        VOCAB.len()
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
            anyhow::bail!("connection reset");
        }
        Ok(texts.iter().map(|t| vocab_vector(t)).collect())
    }
}

#[derive(Default)]
struct CountingClient {
    calls: AtomicUsize,
}

#[async_trait]
impl CompletionClient for CountingClient {
    fn model(&self) -> &str {
        "counting"
    }

    async fn complete(&self, _messages: &[ChatMessage]) -> docforge::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("never shown".to_string())
    }
}

#[tokio::test]
async fn query_embedding_failure_is_not_an_empty_context() {
    let corpus = Corpus::new(vec![Document {
        id: "rohlik.txt".to_string(),
        path: "rohlik.txt".into(),
        text: "Rohlik Group operates automated warehouses.".to_string(),
    }]);
    let index = IndexHandle::new(
        Box::new(corpus),
        Some(Arc::new(FlakyEmbedder {
            calls: AtomicUsize::new(0),
        })),
        IndexSettings {
            mode: RetrievalMode::Semantic,
            ..IndexSettings::default()
        },
    );
    let client = Arc::new(CountingClient::default());
    let pipeline = Pipeline::new(
        Arc::new(index),
        Arc::new(TemplateRegistry::builtin().unwrap()),
        client.clone(),
    );

    let err = pipeline
        .handle(&Request::new(Mode::JobDescription, "automation"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Retrieval(_)));
    assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    assert!(pipeline.index().is_built().await);
}
