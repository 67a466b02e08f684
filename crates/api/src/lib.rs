mod rate_limit;

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::{Json, State};
use axum::http::{header, HeaderValue, Method, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{body::Body, Router};
use mirgpt_agents::{build_default_assistant, AssistantConfig, PolicyAssistant};
use mirgpt_core::{normalize_text, ChatMessage, ConversationSession};
use mirgpt_llm::Backend;
use mirgpt_observability::{AppMetrics, MetricsSnapshot};
use mirgpt_retrieval::{RetrievalStats, ScoredChunk};
use mirgpt_storage::Store;
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub use crate::rate_limit::IpRateLimiter;

const MAX_MESSAGE_LEN: usize = 4_000;
const MAX_SEARCH_LIMIT: usize = 20;

pub type Assistant = PolicyAssistant<Store, Backend>;

/// HTTP-layer settings, separate from the assistant's own configuration.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub rate_limit_window: Duration,
    pub rate_limit_max_requests: usize,
    pub body_limit_bytes: usize,
    pub allowed_origins: Vec<String>,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            rate_limit_window: Duration::from_secs(60),
            rate_limit_max_requests: 60,
            body_limit_bytes: 64 * 1024,
            allowed_origins: Vec::new(),
        }
    }
}

impl ApiSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            rate_limit_window: env::var("MIRGPT_RATE_LIMIT_WINDOW_SECS")
                .ok()
                .and_then(|value| value.trim().parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.rate_limit_window),
            rate_limit_max_requests: env::var("MIRGPT_RATE_LIMIT_MAX_REQUESTS")
                .ok()
                .and_then(|value| value.trim().parse().ok())
                .unwrap_or(defaults.rate_limit_max_requests),
            body_limit_bytes: defaults.body_limit_bytes,
            allowed_origins: env::var("MIRGPT_ALLOWED_ORIGINS")
                .map(|value| {
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|origin| !origin.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or(defaults.allowed_origins),
        }
    }
}

#[derive(Clone)]
pub struct ApiState {
    pub assistant: Arc<Assistant>,
    pub metrics: Arc<AppMetrics>,
    pub limiter: IpRateLimiter,
    pub allowed_origins: Arc<Vec<String>>,
    pub body_limit_bytes: usize,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp_utc: String,
    backend: &'static str,
    model: String,
    knowledge: RetrievalStats,
    metrics: MetricsSnapshot,
}

#[derive(Debug, Deserialize)]
struct ChatBody {
    #[serde(default)]
    session_id: Option<String>,
    text: String,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    session_id: String,
    reply_text: String,
    degraded: bool,
    context_used: bool,
    knowledge_available: bool,
    matched_chunks: Vec<ScoredChunk>,
}

#[derive(Debug, Deserialize)]
struct SessionBody {
    session_id: String,
}

#[derive(Debug, Serialize)]
struct SessionResponse {
    session_id: String,
    messages: Vec<ChatMessage>,
}

impl From<ConversationSession> for SessionResponse {
    fn from(session: ConversationSession) -> Self {
        Self {
            session_id: session.session_id,
            messages: session.messages,
        }
    }
}

#[derive(Debug, Deserialize)]
struct KbSearchBody {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct KbSearchResponse {
    query: String,
    results: Vec<ScoredChunk>,
}

pub async fn build_app(config: AssistantConfig) -> Result<Router> {
    let state = build_state(config, ApiSettings::from_env()).await?;
    Ok(build_router(state))
}

pub async fn build_state(config: AssistantConfig, settings: ApiSettings) -> Result<ApiState> {
    let metrics = AppMetrics::shared();
    let assistant = build_default_assistant(config, metrics.clone()).await?;

    let stats = assistant.retrieval_stats();
    if stats.source_available {
        info!(source = %stats.source, chunks = stats.chunks_loaded, "policy manual indexed");
    } else {
        tracing::warn!(source = %stats.source, "{}", mirgpt_core::persona::KNOWLEDGE_MISSING_WARNING);
    }

    Ok(ApiState {
        assistant: Arc::new(assistant),
        metrics,
        limiter: IpRateLimiter::new(settings.rate_limit_window, settings.rate_limit_max_requests),
        allowed_origins: Arc::new(settings.allowed_origins),
        body_limit_bytes: settings.body_limit_bytes,
    })
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/sessions", post(session_start))
        .route("/v1/chat", post(chat))
        .route("/v1/history", post(history))
        .route("/v1/clear", post(clear))
        .route("/v1/kb/search", post(kb_search))
        .layer(build_cors_layer(&state.allowed_origins))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(RequestBodyLimitLayer::new(state.body_limit_bytes))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .with_state(state)
}

/// Drops idle transcripts and rate-limiter entries on a fixed interval.
pub async fn run_housekeeping(state: ApiState, every: Duration, max_idle: chrono::Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match state.assistant.purge_idle_sessions(max_idle).await {
            Ok(removed) if removed > 0 => info!(removed, "purged idle sessions"),
            Ok(_) => {}
            Err(err) => error!(error = %err, "session purge failed"),
        }
        state.limiter.prune();
    }
}

async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let payload = HealthResponse {
        status: "ok",
        timestamp_utc: chrono::Utc::now().to_rfc3339(),
        backend: state.assistant.backend_name(),
        model: state.assistant.config().model.clone(),
        knowledge: state.assistant.retrieval_stats(),
        metrics: state.metrics.snapshot(),
    };
    (StatusCode::OK, Json(payload))
}

async fn session_start(State(state): State<ApiState>) -> Response {
    match state.assistant.start_session().await {
        Ok(session) => (StatusCode::CREATED, Json(SessionResponse::from(session))).into_response(),
        Err(err) => internal_error("session_failed", err),
    }
}

async fn chat(State(state): State<ApiState>, Json(request): Json<ChatBody>) -> Response {
    let text = normalize_text(&request.text);
    if text.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "empty_text", "text must not be empty");
    }
    if text.chars().count() > MAX_MESSAGE_LEN {
        return error_response(
            StatusCode::BAD_REQUEST,
            "text_too_long",
            &format!("text must be at most {MAX_MESSAGE_LEN} characters"),
        );
    }

    let mut session = match state
        .assistant
        .load_or_start(request.session_id.as_deref())
        .await
    {
        Ok(session) => session,
        Err(err) => return internal_error("session_failed", err),
    };

    match state
        .assistant
        .handle_turn(&mut session, &request.text, |_| {})
        .await
    {
        Ok(outcome) => (
            StatusCode::OK,
            Json(ChatResponse {
                session_id: session.session_id,
                reply_text: outcome.answer,
                degraded: outcome.degraded,
                context_used: outcome.context_used,
                knowledge_available: outcome.knowledge_available,
                matched_chunks: outcome.matched_chunks,
            }),
        )
            .into_response(),
        Err(err) => internal_error("chat_failed", err),
    }
}

async fn history(State(state): State<ApiState>, Json(request): Json<SessionBody>) -> Response {
    match state.assistant.history(request.session_id.trim()).await {
        Ok(Some(session)) => (StatusCode::OK, Json(SessionResponse::from(session))).into_response(),
        Ok(None) => session_not_found(),
        Err(err) => internal_error("history_failed", err),
    }
}

async fn clear(State(state): State<ApiState>, Json(request): Json<SessionBody>) -> Response {
    let mut session = match state.assistant.history(request.session_id.trim()).await {
        Ok(Some(session)) => session,
        Ok(None) => return session_not_found(),
        Err(err) => return internal_error("clear_failed", err),
    };

    match state.assistant.clear_session(&mut session).await {
        Ok(()) => (StatusCode::OK, Json(SessionResponse::from(session))).into_response(),
        Err(err) => internal_error("clear_failed", err),
    }
}

async fn kb_search(State(state): State<ApiState>, Json(request): Json<KbSearchBody>) -> Response {
    let query = normalize_text(&request.query);
    if query.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "empty_query", "query must not be empty");
    }

    let limit = request
        .limit
        .unwrap_or(state.assistant.config().top_k)
        .min(MAX_SEARCH_LIMIT);
    let results = state.assistant.kb_search(&query, limit);
    (StatusCode::OK, Json(KbSearchResponse { query, results })).into_response()
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": code,
            "message": message
        })),
    )
        .into_response()
}

fn internal_error(code: &str, err: anyhow::Error) -> Response {
    error!(error = %err, code, "request failed");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, code, &err.to_string())
}

fn session_not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "session_not_found", "unknown session_id")
}

fn build_cors_layer(allowed_origins: &Arc<Vec<String>>) -> CorsLayer {
    let origins = allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect::<Vec<_>>();
    let origins = if origins.is_empty() {
        vec![HeaderValue::from_static("http://localhost:8501")]
    } else {
        origins
    };

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

async fn rate_limit_middleware(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS || is_public_endpoint(request.uri().path()) {
        return next.run(request).await;
    }

    let ip = request_ip(&request);
    if !state.limiter.allow(&ip) {
        return error_response(
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limited",
            "rate limit exceeded for this IP",
        );
    }

    next.run(request).await
}

fn is_public_endpoint(path: &str) -> bool {
    path == "/health"
}

fn request_ip(request: &Request<Body>) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(String::from)
        .unwrap_or_else(|| "local".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with(forwarded: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/v1/chat");
        if let Some(value) = forwarded {
            builder = builder.header("x-forwarded-for", value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn client_ip_prefers_first_forwarded_hop() {
        assert_eq!(request_ip(&request_with(Some("203.0.113.9, 10.0.0.1"))), "203.0.113.9");
        assert_eq!(request_ip(&request_with(Some(" "))), "local");
        assert_eq!(request_ip(&request_with(None)), "local");
    }

    #[test]
    fn only_health_skips_rate_limiting() {
        assert!(is_public_endpoint("/health"));
        assert!(!is_public_endpoint("/v1/chat"));
        assert!(!is_public_endpoint("/v1/kb/search"));
    }
}
