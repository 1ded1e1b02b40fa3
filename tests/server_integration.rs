//! End-to-end tests: a real axum server on a free port with in-process
//! generation and embedding backends, driven over HTTP with `reqwest` and
//! the crate's own clients.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use headwater::batch::BatchFacade;
use headwater::client::{ClientError, HeadwaterClient};
use headwater::collections::CollectionService;
use headwater::config::{EmbeddingsConfig, SiphonConfig};
use headwater::embedding::{Embedder, EmbeddingService};
use headwater::executor::{BatchExecutor, ExecutorConfig};
use headwater::generation::{Generate, GenerationDispatch};
use headwater::server::{serve, AppState};
use headwater::siphon::SiphonService;
use headwater::status::StatusService;
use headwater::tokenize::EstimateTokenizer;
use headwater_api::conduit::{
    BatchRequest, ConduitOptions, GenerationParams, GenerationRequest, GenerationResponse, Message,
    TokenizationRequest,
};
use headwater_api::embeddings::{
    AddDocumentsRequest, ChromaBatch, CreateCollectionRequest, CreateResult, DeleteResult,
    QueryCollectionRequest,
};
use headwater_api::error::{FailureKind, GenerationError};
use headwater_api::siphon::{ActionType, SiphonPayload, SiphonRequest, SourceType};
use headwater_api::status::HealthStatus;
use headwater_api::store::memory::InMemoryCollectionStore;
use serde_json::{json, Value};

/// Uppercases the prompt; prompts containing "fail" get an upstream error.
#[derive(Default)]
struct Shout {
    calls: AtomicUsize,
}

#[async_trait]
impl Generate for Shout {
    fn name(&self) -> &str {
        "shout"
    }

    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        if prompt.contains("fail") {
            return Err(GenerationError::Upstream {
                status: 500,
                message: "model crashed".into(),
            });
        }
        Ok(GenerationResponse {
            model: request.params.model,
            message: Message::assistant(prompt.to_uppercase()),
            input_tokens: 2,
            output_tokens: 2,
            duration_ms: 1,
            stop_reason: Some("stop".into()),
        })
    }

    async fn list_models(&self) -> Result<Vec<String>, GenerationError> {
        Ok(vec!["shout-1".into()])
    }
}

/// Texts mentioning "river" point one way, everything else the other.
struct Topic;

#[async_trait]
impl Embedder for Topic {
    fn provider(&self) -> &str {
        "topic"
    }

    async fn embed(&self, _model: &str, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                if t.contains("river") {
                    vec![1.0, 0.1]
                } else {
                    vec![0.1, 1.0]
                }
            })
            .collect())
    }
}

struct TestServer {
    base: String,
    backend: Arc<Shout>,
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn test_state(backend: Arc<Shout>) -> AppState {
    let dispatch = GenerationDispatch::Async(backend).cached(64);
    let embeddings_config = EmbeddingsConfig {
        provider: "ollama".into(),
        models: vec!["mini".into()],
        ..Default::default()
    };
    let embeddings = EmbeddingService::new(Arc::new(Topic), &embeddings_config);
    let siphon_config = SiphonConfig {
        max_bytes: 64 * 1024,
        summary_model: Some("shout-1".into()),
        ..Default::default()
    };

    AppState {
        batch: BatchFacade::new(BatchExecutor::new(
            dispatch.clone(),
            ExecutorConfig {
                max_concurrency: 4,
                ..Default::default()
            },
        )),
        tokenizer: Arc::new(EstimateTokenizer),
        collections: CollectionService::new(
            Arc::new(InMemoryCollectionStore::new()),
            embeddings.clone(),
        ),
        embeddings,
        siphon: Arc::new(SiphonService::new(siphon_config, dispatch.clone()).unwrap()),
        status: Arc::new(StatusService::new(dispatch.clone(), Some("shout-1".into()))),
        dispatch,
    }
}

async fn start_server() -> TestServer {
    let backend = Arc::new(Shout::default());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let state = test_state(backend.clone());
    let handle = tokio::spawn(async move {
        serve(listener, state).await.ok();
    });
    wait_for_server(port).await;
    TestServer {
        base: format!("http://127.0.0.1:{}", port),
        backend,
        handle,
    }
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/ping", port);
    for _ in 0..50 {
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    panic!("Server did not become ready within 5 seconds");
}

fn encode(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

// ─── Server-level ───────────────────────────────────────────────────

#[tokio::test]
async fn ping_status_and_routes() {
    let server = start_server().await;
    let client = HeadwaterClient::new(&server.base).unwrap();

    assert_eq!(client.ping().await.unwrap().message, "pong");

    let status = client.status().await.unwrap();
    assert_eq!(status.status, HealthStatus::Healthy);
    assert_eq!(status.models_available, ["shout-1"]);
    assert!(status.uptime.is_some());

    let routes = client.list_routes().await.unwrap();
    assert!(routes
        .iter()
        .any(|r| r.method == "POST" && r.path == "/conduit/batch"));
    assert!(routes.iter().any(|r| r.path == "/siphon/process"));
}

#[tokio::test]
async fn cors_allows_any_origin() {
    let server = start_server().await;
    let resp = reqwest::Client::new()
        .get(format!("{}/ping", server.base))
        .header("Origin", "http://example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(
        resp.headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
}

// ─── Conduit ────────────────────────────────────────────────────────

#[tokio::test]
async fn prompt_batch_keeps_order_and_isolates_failures() {
    let server = start_server().await;
    let client = HeadwaterClient::new(&server.base).unwrap();

    let request = BatchRequest::from_prompts(
        vec!["one".into(), "please fail".into(), "three".into()],
        GenerationParams::new("shout-1"),
    );
    let resp = client.conduit().batch(&request).await.unwrap();

    assert_eq!(resp.results.len(), 3);
    assert_eq!(resp.results[0].response().unwrap().content(), "ONE");
    assert_eq!(resp.results[1].failure().unwrap().kind, FailureKind::Upstream);
    assert_eq!(resp.results[2].response().unwrap().content(), "THREE");
    assert_eq!(resp.succeeded(), 2);
}

#[tokio::test]
async fn template_batch_renders_each_variable_map() {
    let server = start_server().await;
    let body = json!({
        "prompt_str": "hello {{ name }}",
        "input_variables_list": [{"name": "ada"}, {"name": "grace"}],
        "params": {"model": "shout-1"}
    });
    let resp = reqwest::Client::new()
        .post(format!("{}/conduit/batch", server.base))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["results"][0]["status"], "ok");
    assert_eq!(body["results"][0]["response"]["message"]["content"], "HELLO ADA");
    assert_eq!(body["results"][1]["response"]["message"]["content"], "HELLO GRACE");
}

#[tokio::test]
async fn ambiguous_or_templateless_batches_are_rejected_before_generation() {
    let server = start_server().await;
    let http = reqwest::Client::new();
    let url = format!("{}/conduit/batch", server.base);

    let both = json!({
        "prompt_strings_list": ["a"],
        "input_variables_list": [{"x": "1"}],
        "params": {"model": "shout-1"}
    });
    let resp = http.post(&url).json(&both).send().await.unwrap();
    assert_eq!(resp.status(), 422);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "validation_error");

    let no_template = json!({
        "input_variables_list": [{"x": "1"}],
        "params": {"model": "shout-1"}
    });
    let resp = http.post(&url).json(&no_template).send().await.unwrap();
    assert_eq!(resp.status(), 422);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(
        body["error"]["message"],
        "template required when using input variables"
    );

    assert_eq!(server.backend.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn malformed_json_uses_error_envelope() {
    let server = start_server().await;
    let resp = reqwest::Client::new()
        .post(format!("{}/conduit/batch", server.base))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn generate_maps_upstream_failure_to_502() {
    let server = start_server().await;
    let client = HeadwaterClient::new(&server.base).unwrap();
    let params = GenerationParams::new("shout-1");

    let ok = GenerationRequest::from_prompt("hi", &params, &ConduitOptions::default());
    assert_eq!(client.conduit().generate(&ok).await.unwrap().content(), "HI");

    let bad = GenerationRequest::from_prompt("fail now", &params, &ConduitOptions::default());
    match client.conduit().generate(&bad).await.unwrap_err() {
        ClientError::Server { status, code, .. } => {
            assert_eq!(status, 502);
            assert_eq!(code, "upstream_error");
        }
        other => panic!("expected server error, got {other:?}"),
    }
}

#[tokio::test]
async fn cached_generation_skips_backend_on_repeat() {
    let server = start_server().await;
    let client = HeadwaterClient::new(&server.base).unwrap();
    let options = ConduitOptions {
        use_cache: true,
        ..Default::default()
    };
    let request =
        GenerationRequest::from_prompt("again", &GenerationParams::new("shout-1"), &options);

    client.conduit().generate(&request).await.unwrap();
    client.conduit().generate(&request).await.unwrap();
    assert_eq!(server.backend.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn tokenize_reports_count() {
    let server = start_server().await;
    let client = HeadwaterClient::new(&server.base).unwrap();
    let resp = client
        .conduit()
        .tokenize(&TokenizationRequest {
            model: "shout-1".into(),
            text: "abcdefgh".into(),
        })
        .await
        .unwrap();
    assert_eq!(resp.token_count, 2);
    assert_eq!(resp.input_text, "abcdefgh");
}

// ─── Embeddings & collections ───────────────────────────────────────

#[tokio::test]
async fn collection_lifecycle() {
    let server = start_server().await;
    let client = HeadwaterClient::new(&server.base).unwrap();
    let embeddings = client.embeddings();

    assert_eq!(embeddings.list_models().await.unwrap(), ["mini"]);

    let create = CreateCollectionRequest {
        collection_name: "places".into(),
        embedding_model: "mini".into(),
        metadata: Default::default(),
    };
    assert_eq!(
        embeddings.create_collection(&create).await.unwrap().result,
        CreateResult::Created
    );
    assert_eq!(
        embeddings.create_collection(&create).await.unwrap().result,
        CreateResult::AlreadyExists
    );

    let added = embeddings
        .add_documents(&AddDocumentsRequest {
            collection_name: "places".into(),
            batch: ChromaBatch {
                ids: vec!["r".into(), "m".into()],
                documents: vec!["a long river".into(), "a tall mountain".into()],
                ..Default::default()
            },
        })
        .await
        .unwrap();
    assert_eq!(added.upserted, 2);

    let record = embeddings.get_collection("places").await.unwrap();
    assert_eq!(record.no_of_documents, 2);
    assert_eq!(record.model.as_deref(), Some("mini"));

    let results = embeddings
        .query_collection(&QueryCollectionRequest {
            name: "places".into(),
            query: "which river?".into(),
            query_embeddings: None,
            n_results: 2,
        })
        .await
        .unwrap()
        .results;
    assert_eq!(results[0].id, "r");
    assert!(results[0].score > results[1].score);

    assert_eq!(embeddings.list_collections().await.unwrap().len(), 1);
    assert_eq!(
        embeddings.delete_collection("places").await.unwrap().result,
        DeleteResult::Deleted
    );
    assert_eq!(
        embeddings.delete_collection("places").await.unwrap().result,
        DeleteResult::NotFound
    );

    let err = embeddings.get_collection("places").await.unwrap_err();
    assert_eq!(err.code(), Some("not_found"));
}

#[tokio::test]
async fn embeddings_reject_unknown_model() {
    let server = start_server().await;
    let resp = reqwest::Client::new()
        .post(format!("{}/conduit/embeddings/quick", server.base))
        .json(&json!({"query": "x", "model": "huge"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn embeddings_batch_returns_one_vector_per_document() {
    let server = start_server().await;
    let resp = reqwest::Client::new()
        .post(format!("{}/conduit/embeddings", server.base))
        .json(&json!({"batch": {"ids": ["a", "b"], "documents": ["river", "hill"]}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["embeddings"].as_array().unwrap().len(), 2);
}

// ─── Siphon ─────────────────────────────────────────────────────────

#[tokio::test]
async fn siphon_upload_extract_and_enrich() {
    let server = start_server().await;
    let client = HeadwaterClient::new(&server.base).unwrap();

    let doc = b"# Rivers\n\nThe Amazon is long.\n\nThe Nile is longer.";
    let resp = client
        .siphon()
        .process(&SiphonRequest::upload(
            "rivers.md",
            encode(doc),
            ActionType::Extract,
        ))
        .await
        .unwrap();
    assert_eq!(resp.source_type, SourceType::Markdown);
    match &resp.payload {
        SiphonPayload::ProcessedContent(content) => {
            assert!(content.text.contains("Nile"));
            assert_eq!(content.chunks.len(), 1);
            assert_eq!(content.source.original_source, "rivers.md");
        }
        other => panic!("expected processed content, got {other:?}"),
    }

    let resp = client
        .siphon()
        .process(&SiphonRequest::upload(
            "rivers.md",
            encode(doc),
            ActionType::Enrich,
        ))
        .await
        .unwrap();
    match &resp.payload {
        SiphonPayload::ProcessedContent(content) => {
            let summary = content.summary.as_deref().unwrap();
            assert!(summary.starts_with("SUMMARIZE"));
        }
        other => panic!("expected processed content, got {other:?}"),
    }
}

#[tokio::test]
async fn siphon_fetches_urls() {
    use axum::{http::header, routing::get, Router};

    let page = Router::new().route(
        "/page",
        get(|| async {
            (
                [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                "<html><body><h1>Headline</h1><p>Story</p></body></html>",
            )
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let page_addr = listener.local_addr().unwrap();
    let page_server = tokio::spawn(async move {
        axum::serve(listener, page).await.ok();
    });

    let server = start_server().await;
    let client = HeadwaterClient::new(&server.base).unwrap();
    let url = format!("http://{}/page", page_addr);
    let resp = client
        .siphon()
        .process(&SiphonRequest::url(url.clone(), ActionType::Extract))
        .await
        .unwrap();
    assert_eq!(resp.source_type, SourceType::Html);
    match &resp.payload {
        SiphonPayload::ProcessedContent(content) => {
            assert_eq!(content.text, "Headline\n\nStory");
            assert_eq!(content.source.original_source, url);
        }
        other => panic!("expected processed content, got {other:?}"),
    }

    let missing = format!("http://{}/missing", page_addr);
    let err = client
        .siphon()
        .process(&SiphonRequest::url(missing, ActionType::Parse))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("upstream_error"));

    page_server.abort();
}

#[tokio::test]
async fn siphon_rejects_oversized_and_local_paths() {
    let server = start_server().await;
    let client = HeadwaterClient::new(&server.base).unwrap();

    let big = vec![b'a'; 100 * 1024];
    let err = client
        .siphon()
        .process(&SiphonRequest::upload("big.txt", encode(&big), ActionType::Parse))
        .await
        .unwrap_err();
    match err {
        ClientError::Server { status, code, .. } => {
            assert_eq!(status, 413);
            assert_eq!(code, "too_large");
        }
        other => panic!("expected server error, got {other:?}"),
    }

    let local = SiphonRequest {
        data: None,
        ..SiphonRequest::upload("/etc/hostname", String::new(), ActionType::Parse)
    };
    let err = client.siphon().process(&local).await.unwrap_err();
    assert_eq!(err.code(), Some("bad_request"));
}

// ─── Blocking client ────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocking_client_round_trip() {
    let server = start_server().await;
    let base = server.base.clone();

    let (pong, batch) = tokio::task::spawn_blocking(move || {
        std::thread::spawn(move || {
            let client = headwater::client::blocking::HeadwaterClient::new(&base).unwrap();
            let pong = client.ping().unwrap();
            let batch = client
                .conduit()
                .batch(&BatchRequest::from_prompts(
                    vec!["x".into(), "y".into()],
                    GenerationParams::new("shout-1"),
                ))
                .unwrap();
            (pong, batch)
        })
        .join()
        .unwrap()
    })
    .await
    .unwrap();

    assert_eq!(pong.message, "pong");
    assert_eq!(batch.results.len(), 2);
    assert_eq!(batch.results[1].response().unwrap().content(), "Y");
}
