//! Client-facing API (client port) — the OpenAI-compatible surface callers
//! talk to.
//!
//! This is intentionally a thin layer: all routing logic lives in
//! [`crate::engine`]. Handlers translate HTTP concerns (status codes,
//! headers, JSON/SSE bodies) into calls on [`crate::engine::RoutingEngine`]
//! and back, per spec §6.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Extension, State},
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::{json, Value};

use crate::{
    api::request_id::RequestId,
    engine::{Identity, RouterState, RoutingEngine, RoutingOutcome},
};

/// Build the client-facing axum router.
pub fn router(state: Arc<RouterState>) -> Router {
    Router::new()
        .route("/healthz", get(crate::api::health::healthz))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/status", get(crate::api::status::status))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .with_state(state)
}

/// POST /v1/chat/completions — runs the full routing pipeline and proxies to
/// the selected backend (with fallback), streaming or not per the request's
/// `stream` field.
pub async fn chat_completions(
    State(state): State<Arc<RouterState>>,
    Extension(request_id): Extension<RequestId>,
    identity: Option<Extension<Identity>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let identity = identity.map(|Extension(i)| i).unwrap_or_default();
    let streaming = body.get("stream").and_then(Value::as_bool).unwrap_or(false);

    if streaming {
        match RoutingEngine::route_stream(&state, &body, &identity, request_id.0).await {
            Ok((stream, outcome)) => {
                let decision_frame = Bytes::from(format!(
                    "event: routing_decision\ndata: {}\n\n",
                    json!(outcome)
                ));
                let upstream = stream.map(|chunk| {
                    chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
                });
                let body = futures_util::stream::once(async move { Ok::<_, std::io::Error>(decision_frame) })
                    .chain(upstream)
                    .chain(futures_util::stream::once(async { Ok::<_, std::io::Error>(Bytes::from_static(b"data: [DONE]\n\n")) }));

                let mut response = Body::from_stream(body).into_response();
                *response.status_mut() = StatusCode::OK;
                response.headers_mut().insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
                response.headers_mut().insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
                apply_routing_headers(response.headers_mut(), &outcome);
                response
            }
            Err(error) => error.into_response(),
        }
    } else {
        match RoutingEngine::route(&state, &body, &identity, request_id.0).await {
            Ok((mut response_body, outcome)) => {
                response_body["x_routing_decision"] = json!(outcome);
                let mut response = (StatusCode::OK, Json(response_body)).into_response();
                apply_routing_headers(response.headers_mut(), &outcome);
                response
            }
            Err(error) => error.into_response(),
        }
    }
}

/// Sets the response headers spec §6 requires on every `/v1/chat/completions`
/// reply: `X-Routing-Model`, `X-Routing-Provider`, `X-Task-Type`,
/// `X-Complexity`, `X-Risk-Level`, `X-Audit-Required`.
/// (`X-Request-Id` is already set by [`crate::api::request_id`]'s middleware.)
fn apply_routing_headers(headers: &mut axum::http::HeaderMap, outcome: &RoutingOutcome) {
    let set = |headers: &mut axum::http::HeaderMap, name: &'static str, value: String| {
        if let Ok(v) = HeaderValue::from_str(&value) {
            headers.insert(name, v);
        }
    };
    set(headers, "x-routing-model", outcome.actual_model.clone());
    set(headers, "x-routing-provider", outcome.actual_provider.to_string());
    set(headers, "x-task-type", outcome.task_type.to_string());
    set(headers, "x-complexity", outcome.complexity.to_string());
    set(headers, "x-risk-level", outcome.risk_level.to_string());
    set(headers, "x-audit-required", outcome.audit_required.to_string());
}

/// GET /v1/models — enumerates the virtual model catalog (`rb://` ids) plus
/// every concretely-priced model in the model catalog, OpenAI-compatible
/// shape.
pub async fn list_models(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let virtual_models = state.virtual_models();
    let mut data: Vec<Value> = virtual_models
        .get_all()
        .map(|(id, resolved)| {
            json!({
                "id": id,
                "object": "model",
                "owned_by": resolved.provider.to_string(),
                "routing_gateway": { "resolves_to": resolved.model, "virtual": true },
            })
        })
        .collect();

    for (model, provider) in state.model_catalog().known_models() {
        data.push(json!({
            "id": model,
            "object": "model",
            "owned_by": provider.to_string(),
            "routing_gateway": { "virtual": false },
        }));
    }

    Json(json!({ "object": "list", "data": data }))
}

/// GET /health — overall health: every configured backend plus the budget
/// store (Redis, if configured) must be reachable. `503` if any is down.
pub async fn health(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let backends = state.backends();
    let mut unhealthy = Vec::new();
    for (provider, backend) in backends.iter() {
        if let Err(error) = backend.health_check().await {
            unhealthy.push(json!({ "provider": provider.to_string(), "error": error.to_string() }));
        }
    }

    let status = if unhealthy.is_empty() { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        status,
        Json(json!({
            "status": if unhealthy.is_empty() { "ok" } else { "degraded" },
            "unhealthy_backends": unhealthy,
            "uptime_secs": state.started_at.elapsed().as_secs(),
        })),
    )
}

/// GET /ready — liveness only: the process is up and serving. Never probes
/// backends, so it stays cheap enough for a tight orchestrator readiness
/// interval.
pub async fn ready() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ready" })))
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, path::PathBuf};

    use axum::body::to_bytes;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::{
        audit::AuditLogger,
        backends::BackendClient,
        budget::BudgetTracker,
        config::{BackendConfig, Config, GatewayConfig, Provider},
        models::ModelCatalog,
        policy::PolicyEngine,
        traffic::TrafficLog,
        virtual_models::VirtualModelRegistry,
    };

    const CATCH_ALL_POLICY: &str = r#"
policies:
  - department: general
    default_tier: balanced
    rules:
      - name: catch-all
        tier: balanced
        candidates: ["gpt-4o-mini"]
"#;

    fn minimal_gateway_config() -> GatewayConfig {
        GatewayConfig {
            client_port: 18080,
            admin_port: 18081,
            traffic_log_capacity: 100,
            log_level: None,
            rate_limit_rpm: None,
            admin_token_env: None,
            policies_dir: "policies".into(),
            models_config_path: "models.yaml".into(),
            audit_log_path: "logs/audit.jsonl".into(),
            redis_url: None,
            classifier_model: "claude-haiku-4-5-20251001".into(),
            classifier_timeout_ms: 3_000,
            classifier_confidence_threshold: 0.6,
            emergency_fallback_model: "claude-haiku-4-5-20251001".into(),
            emergency_fallback_provider: Provider::Anthropic,
            emergency_fallback_oss_provider: Provider::Ollama,
            emergency_fallback_oss_model: "llama3.1:8b".into(),
        }
    }

    async fn test_state(openai_base_url: &str) -> Arc<RouterState> {
        let dir = std::env::temp_dir().join(format!("routing-gateway-client-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("test.yaml"), CATCH_ALL_POLICY).unwrap();

        let config = Arc::new(Config { gateway: minimal_gateway_config(), backends: HashMap::new(), clients: vec![] });
        let policy = Arc::new(PolicyEngine::load(&dir).unwrap());
        let virtual_models = Arc::new(VirtualModelRegistry::load(&PathBuf::from("/does/not/exist.yaml")).unwrap());
        let model_catalog = Arc::new(ModelCatalog::load(&PathBuf::from("/does/not/exist.yaml")).unwrap());

        let mut backends: HashMap<Provider, Arc<BackendClient>> = HashMap::new();
        backends.insert(
            Provider::OpenAI,
            Arc::new(
                BackendClient::new(&BackendConfig {
                    base_url: openai_base_url.to_string(),
                    api_key_env: None,
                    timeout_ms: 5_000,
                    provider: Provider::OpenAI,
                    azure_deployment: None,
                    aws_region: None,
                })
                .unwrap(),
            ),
        );

        let budget = Arc::new(BudgetTracker::new(None).await);
        let audit_path = std::env::temp_dir().join(format!("routing-gateway-client-test-audit-{}.jsonl", uuid::Uuid::new_v4()));
        let audit = Arc::new(AuditLogger::open(audit_path.to_str().unwrap()).await.unwrap());
        let traffic = Arc::new(TrafficLog::new(100));

        Arc::new(RouterState::new(config, dir.join("config.toml"), policy, virtual_models, model_catalog, backends, budget, audit, traffic))
    }

    fn app(state: Arc<RouterState>) -> Router {
        router(state).layer(axum::middleware::from_fn(crate::api::request_id::request_id_middleware))
    }

    fn chat_request(body: Value) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method("POST")
            .uri("/v1/chat/completions")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn chat_completions_sets_routing_headers_and_embeds_the_decision() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "hi"}}],
                "usage": {"prompt_tokens": 5, "completion_tokens": 3, "total_tokens": 8},
            })))
            .mount(&server)
            .await;

        let state = test_state(&server.uri()).await;
        let body = json!({"model": "auto", "messages": [{"role": "user", "content": "hello there"}]});

        let resp = tower::ServiceExt::oneshot(app(state), chat_request(body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let headers = resp.headers().clone();
        assert!(headers.contains_key("x-routing-model"));
        assert!(headers.contains_key("x-routing-provider"));
        assert!(headers.contains_key("x-task-type"));
        assert!(headers.contains_key("x-complexity"));
        assert!(headers.contains_key("x-risk-level"));
        assert!(headers.contains_key("x-audit-required"));
        assert!(headers.contains_key("x-request-id"));

        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(json.get("x_routing_decision").is_some(), "response body must embed the routing decision");
    }

    #[tokio::test]
    async fn streaming_response_leads_with_a_routing_decision_frame() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\ndata: [DONE]\n\n",
            ))
            .mount(&server)
            .await;

        let state = test_state(&server.uri()).await;
        let body = json!({"model": "auto", "stream": true, "messages": [{"role": "user", "content": "hello there"}]});

        let resp = tower::ServiceExt::oneshot(app(state), chat_request(body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "text/event-stream");

        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.starts_with("event: routing_decision\ndata: "), "first frame must be the routing decision: {text}");
        assert!(text.trim_end().ends_with("data: [DONE]"), "stream must be terminated with [DONE]: {text}");
    }

    #[tokio::test]
    async fn list_models_includes_virtual_and_concrete_entries() {
        let server = MockServer::start().await;
        let state = test_state(&server.uri()).await;

        let resp = tower::ServiceExt::oneshot(
            app(state),
            axum::http::Request::builder().method("GET").uri("/v1/models").body(Body::empty()).unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["object"], "list");
        assert!(json["data"].is_array());
    }

    #[tokio::test]
    async fn ready_never_probes_backends() {
        let server = MockServer::start().await;
        let state = test_state(&server.uri()).await;

        let resp = tower::ServiceExt::oneshot(
            app(state),
            axum::http::Request::builder().method("GET").uri("/ready").body(Body::empty()).unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(server.received_requests().await.unwrap().len(), 0, "/ready must not touch backends");
    }

    #[tokio::test]
    async fn health_reports_degraded_when_a_backend_is_unreachable() {
        // No mock mounted — every request to this server 404s, which the
        // OpenAI adapter's health check treats as a failure.
        let server = MockServer::start().await;
        let state = test_state(&server.uri()).await;

        let resp = tower::ServiceExt::oneshot(
            app(state),
            axum::http::Request::builder().method("GET").uri("/health").body(Body::empty()).unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "degraded");
    }
}
