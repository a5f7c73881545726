//! API endpoint integration tests

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use parley::api::{self, ApiState};
use axum::routing;
use parley::chat::ChatService;
use parley::speech::{DegradedPolicy, PrimarySpeech, SpeechBackend};
use tokio::net::TcpListener;
use tower::ServiceExt;

mod common;
use common::{Journal, MockChat, MockPrimary, PrimaryOutcome};

fn proxy_hosts() -> Vec<String> {
    vec!["huggingface.co".to_string(), "cdn.jsdelivr.net".to_string()]
}

/// Build a test API router
fn build_test_router(chat: Option<Arc<dyn ChatService>>, tts: Option<Arc<dyn PrimarySpeech>>) -> axum::Router {
    api::router(Arc::new(ApiState::new(chat, tts, proxy_hosts())))
}

fn configured(journal: &Journal) -> axum::Router {
    build_test_router(
        Some(Arc::new(MockChat::replying(journal, &["Hi there"]))),
        Some(Arc::new(MockPrimary::new(journal))),
    )
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn health_reports_version() {
    let app = build_test_router(None, None);

    let response = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn chat_returns_plain_text_reply() {
    let journal = Journal::default();
    let app = configured(&journal);

    let response = app
        .oneshot(post_json(
            "/api/chat",
            r#"{"messages":[{"role":"user","content":"Hello"}]}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/plain; charset=utf-8"
    );
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"Hi there");
    assert_eq!(journal.count("chat"), 1);
}

#[tokio::test]
async fn chat_requires_messages() {
    let journal = Journal::default();

    for body in [r"{}", r#"{"messages":[]}"#, r#"{"messages":"hello"}"#] {
        let response = configured(&journal)
            .oneshot(post_json("/api/chat", body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body {body}");
        assert_eq!(body_json(response).await["error"], "Messages are required");
    }
    assert_eq!(journal.count("chat"), 0);
}

#[tokio::test]
async fn chat_upstream_failure_is_500() {
    let journal = Journal::default();
    let app = build_test_router(Some(Arc::new(MockChat::failing(&journal))), None);

    let response = app
        .oneshot(post_json(
            "/api/chat",
            r#"{"messages":[{"role":"user","content":"Hello"}]}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await["error"], "Internal server error");
}

#[tokio::test]
async fn chat_without_service_is_500() {
    let app = build_test_router(None, None);

    let response = app
        .oneshot(post_json(
            "/api/chat",
            r#"{"messages":[{"role":"user","content":"Hello"}]}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn tts_returns_audio() {
    let journal = Journal::default();
    let app = configured(&journal);

    let response = app
        .oneshot(post_json("/api/tts", r#"{"text":"Good morning","voice":"nova"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/mpeg");
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"Good morning");
    assert_eq!(journal.count("primary:Good morning|nova"), 1);
}

#[tokio::test]
async fn tts_requires_text() {
    let journal = Journal::default();

    let response = configured(&journal)
        .oneshot(post_json("/api/tts", r#"{"text":""}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "Text is required");
}

#[tokio::test]
async fn tts_unconfigured_is_503() {
    let app = build_test_router(None, None);

    let response = app
        .oneshot(post_json("/api/tts", r#"{"text":"hello"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn tts_failure_is_500() {
    let journal = Journal::default();
    let app = build_test_router(
        None,
        Some(Arc::new(MockPrimary::new(&journal).with_outcome(PrimaryOutcome::Error))),
    );

    let response = app
        .oneshot(post_json("/api/tts", r#"{"text":"hello"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn tts_lists_voices() {
    let journal = Journal::default();

    let response = configured(&journal).oneshot(get("/api/tts/voices")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json.as_array().unwrap().len(), 2);
    assert_eq!(json[0]["id"], "en_US-amy-medium");
}

#[tokio::test]
async fn proxy_requires_url() {
    let response = build_test_router(None, None)
        .oneshot(get("/api/proxy"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "Missing url parameter");
}

#[tokio::test]
async fn proxy_rejects_unlisted_hosts() {
    for target in [
        "https://example.com/model.onnx",
        "https://huggingface.co.evil.example/model.onnx",
        "file:///etc/passwd",
    ] {
        let uri = format!("/api/proxy?url={}", url_encode(target));
        let response = build_test_router(None, None).oneshot(get(&uri)).await.unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN, "target {target}");
        assert_eq!(body_json(response).await["error"], "Domain not allowed");
    }
}

#[tokio::test]
async fn tts_malformed_body_is_json_error() {
    let journal = Journal::default();

    let request = Request::builder()
        .method("POST")
        .uri("/api/tts")
        .body(Body::from("text=hello"))
        .unwrap();
    let response = configured(&journal).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/json"
    );
    assert_eq!(body_json(response).await["error"], "Internal server error");
    assert_eq!(journal.count("primary:"), 0);
}

#[tokio::test]
async fn tts_status_follows_backend_readiness() {
    let journal = Journal::default();
    let backend = Arc::new(SpeechBackend::new(DegradedPolicy::AutoEnable));
    let app = api::router(Arc::new(
        ApiState::new(None, None, proxy_hosts()).with_backend(backend.clone()),
    ));

    let json = body_json(app.clone().oneshot(get("/api/tts/status")).await.unwrap()).await;
    assert_eq!(json["status"], "loading");
    assert_eq!(json["readiness"], "not_ready");

    let primary = MockPrimary::new(&journal);
    let voices = primary.voices().await.unwrap();
    backend.mark_ready(Arc::new(primary), voices).await;

    let response = app.oneshot(get("/api/tts/status")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "available");
    assert_eq!(json["readiness"], "ready");
    assert_eq!(json["primary_enabled"], true);
    assert_eq!(json["voices"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn tts_status_reports_missing_engine() {
    let backend = Arc::new(SpeechBackend::new(DegradedPolicy::AutoEnable));
    backend.mark_degraded(None).await;
    let app = api::router(Arc::new(
        ApiState::new(None, None, proxy_hosts()).with_backend(backend),
    ));

    let json = body_json(app.oneshot(get("/api/tts/status")).await.unwrap()).await;

    assert_eq!(json["status"], "unavailable");
    assert_eq!(json["readiness"], "degraded");
}

#[tokio::test]
async fn proxy_relays_upstream_response() {
    let upstream = axum::Router::new().route(
        "/model.json",
        routing::get(|| async {
            (
                StatusCode::NOT_FOUND,
                [(header::CONTENT_TYPE, "application/octet-stream")],
                vec![0u8, 159, 146, 150],
            )
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, upstream).await });

    let app = api::router(Arc::new(ApiState::new(
        None,
        None,
        vec!["127.0.0.1".to_string()],
    )));
    let target = format!("http://{addr}/model.json");
    let uri = format!("/api/proxy?url={}", url_encode(&target));

    let response = app.oneshot(get(&uri)).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/octet-stream"
    );
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], &[0u8, 159, 146, 150]);
}

#[tokio::test]
async fn cors_allows_any_origin() {
    let request = Request::builder()
        .uri("/health")
        .header(header::ORIGIN, "http://localhost:5173")
        .body(Body::empty())
        .unwrap();

    let response = build_test_router(None, None).oneshot(request).await.unwrap();

    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
}

fn url_encode(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}
