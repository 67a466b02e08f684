use std::io::Write;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use mirgpt_agents::AssistantConfig;
use mirgpt_api::{build_router, build_state, ApiSettings};
use mirgpt_core::persona::GREETING;
use serde_json::{json, Value};
use tempfile::NamedTempFile;
use tower::ServiceExt;

const MANUAL: &str = "\
Students must maintain 80 percent attendance in every course.
A cumulative GPA below 1.70 places the student on academic probation.
Probation is lifted once the cumulative GPA reaches 2.00.
Course withdrawal is allowed until the end of week 10.
";

struct TestApp {
    router: Router,
    _manual: Option<NamedTempFile>,
}

async fn app_with(manual: Option<&str>, settings: ApiSettings) -> TestApp {
    let file = manual.map(|text| {
        let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    });

    let config = AssistantConfig {
        manual_path: file
            .as_ref()
            .map(|file| file.path().to_path_buf())
            .unwrap_or_else(|| "does-not-exist.txt".into()),
        max_chunk_chars: 80,
        top_k: 2,
        api_key: None,
        base_url: "https://api.groq.com/openai/v1".to_string(),
        database_url: None,
        ..AssistantConfig::default()
    };

    let state = build_state(config, settings).await.expect("state should build");
    TestApp {
        router: build_router(state),
        _manual: file,
    }
}

async fn app() -> TestApp {
    app_with(Some(MANUAL), ApiSettings::default()).await
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, parsed)
}

#[tokio::test]
async fn health_reports_knowledge_and_backend() {
    let app = app().await;

    let (status, body) = send(
        &app,
        Request::builder().uri("/health").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["backend"], "offline");
    assert_eq!(body["knowledge"]["source_available"], true);
    assert!(body["knowledge"]["chunks_loaded"].as_u64().unwrap() >= 2);
    assert!(body["metrics"].get("turns_total").is_some());
}

#[tokio::test]
async fn chat_answers_from_the_manual() {
    let app = app().await;

    let (status, body) = send(
        &app,
        post("/v1/chat", json!({ "text": "What GPA puts me on probation?" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["degraded"], false);
    assert_eq!(body["context_used"], true);
    assert!(body["reply_text"]
        .as_str()
        .unwrap()
        .contains("GPA below 1.70"));
    assert!(!body["matched_chunks"].as_array().unwrap().is_empty());

    let session_id = body["session_id"].as_str().unwrap().to_string();
    let (status, history) = send(&app, post("/v1/history", json!({ "session_id": session_id }))).await;
    assert_eq!(status, StatusCode::OK);
    let messages = history["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0]["role"], "assistant");
    assert_eq!(messages[0]["content"], GREETING);
    assert_eq!(messages[1]["role"], "user");
    assert_eq!(messages[2]["role"], "assistant");
}

#[tokio::test]
async fn chat_without_matches_uses_no_context() {
    let app = app().await;

    let (status, body) = send(&app, post("/v1/chat", json!({ "text": "hello there" }))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["context_used"], false);
    assert!(body["matched_chunks"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn empty_text_is_rejected() {
    let app = app().await;

    let (status, body) = send(&app, post("/v1/chat", json!({ "text": "   " }))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "empty_text");
}

#[tokio::test]
async fn sessions_can_be_resumed_and_cleared() {
    let app = app().await;

    let (status, created) = send(&app, post("/v1/sessions", json!({}))).await;
    assert_eq!(status, StatusCode::CREATED);
    let session_id = created["session_id"].as_str().unwrap().to_string();

    for text in ["attendance rule", "withdrawal week"] {
        let (status, body) = send(
            &app,
            post("/v1/chat", json!({ "session_id": session_id, "text": text })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["session_id"], session_id.as_str());
    }

    let (_, history) = send(&app, post("/v1/history", json!({ "session_id": session_id }))).await;
    assert_eq!(history["messages"].as_array().unwrap().len(), 5);

    let (status, cleared) = send(&app, post("/v1/clear", json!({ "session_id": session_id }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cleared["messages"].as_array().unwrap().len(), 1);

    let (status, _) = send(&app, post("/v1/history", json!({ "session_id": "unknown" }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn kb_search_ranks_chunks() {
    let app = app().await;

    let (status, body) = send(
        &app,
        post("/v1/kb/search", json!({ "query": "cumulative GPA probation", "limit": 5 })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let results = body["results"].as_array().unwrap();
    assert!(!results.is_empty());
    let scores = results
        .iter()
        .map(|hit| hit["score"].as_u64().unwrap())
        .collect::<Vec<_>>();
    assert!(scores.windows(2).all(|pair| pair[0] >= pair[1]));
    assert!(results[0]["text"].as_str().unwrap().contains("GPA"));
}

#[tokio::test]
async fn missing_manual_keeps_chat_usable() {
    let app = app_with(None, ApiSettings::default()).await;

    let (_, health) = send(
        &app,
        Request::builder().uri("/health").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(health["knowledge"]["source_available"], false);
    assert_eq!(health["knowledge"]["chunks_loaded"], 0);

    let (status, body) = send(&app, post("/v1/chat", json!({ "text": "What is probation?" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["knowledge_available"], false);
    assert_eq!(body["context_used"], false);
}

#[tokio::test]
async fn rate_limit_applies_per_client() {
    let app = app_with(
        Some(MANUAL),
        ApiSettings {
            rate_limit_window: Duration::from_secs(60),
            rate_limit_max_requests: 2,
            ..ApiSettings::default()
        },
    )
    .await;

    let search = |ip: &str| {
        let mut request = post("/v1/kb/search", json!({ "query": "attendance" }));
        request
            .headers_mut()
            .insert("x-forwarded-for", ip.parse().unwrap());
        request
    };

    assert_eq!(send(&app, search("198.51.100.7")).await.0, StatusCode::OK);
    assert_eq!(send(&app, search("198.51.100.7")).await.0, StatusCode::OK);
    assert_eq!(
        send(&app, search("198.51.100.7")).await.0,
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(send(&app, search("198.51.100.8")).await.0, StatusCode::OK);

    // health is never limited
    for _ in 0..3 {
        let (status, _) = send(
            &app,
            Request::builder().uri("/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
}
