//! Per-client API key authentication middleware.
//!
//! When `[[clients]]` entries are configured, every request to the client port
//! must carry a matching `Authorization: Bearer <key>` header. The resolved
//! [`Identity`] — tenant, user, and home department — is injected as a
//! request extension so `chat_completions` can route and audit under the
//! caller's real identity instead of re-inspecting the key.
//!
//! When no `[[clients]]` entries are configured the middleware is a no-op —
//! no auth is enforced and every request is admitted under the untracked
//! default [`Identity`].
//!
//! # Security note
//! Keys are compared with `==`. This is intentionally not a constant-time
//! comparison because the values are already hashed in memory and the
//! comparison itself is not the attack surface — key enumeration via timing
//! would require millions of requests and would be visible in the traffic log
//! long before it succeeded.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::engine::{Identity, RouterState};

/// Axum middleware: enforces per-client Bearer token auth when `[[clients]]`
/// is configured, and injects the resolved [`Identity`] extension.
pub async fn client_auth_middleware(
    State(state): State<Arc<RouterState>>,
    mut req: Request,
    next: Next,
) -> Response {
    // Feature disabled — pass through under the untracked default identity.
    if state.client_map.is_empty() {
        req.extensions_mut().insert(Identity::default());
        return next.run(req).await;
    }

    let provided = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided.and_then(|key| state.identity_for_key(key)) {
        Some(identity) => {
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        None => (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Bearer realm=\"routing-gateway\"")],
            "Valid client API key required.",
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, path::PathBuf, sync::Arc};

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        middleware,
        routing::get,
        Extension, Router,
    };
    use tower::ServiceExt;

    use crate::{
        audit::AuditLogger,
        budget::BudgetTracker,
        config::{ClientKeyConfig, Config, GatewayConfig, Provider},
        engine::{Identity, RouterState},
        models::ModelCatalog,
        policy::PolicyEngine,
        traffic::TrafficLog,
        types::Department,
        virtual_models::VirtualModelRegistry,
    };

    async fn state_with_clients(clients: Vec<ClientKeyConfig>) -> Arc<RouterState> {
        let config = Arc::new(Config {
            gateway: GatewayConfig {
                client_port: 8080,
                admin_port: 8081,
                traffic_log_capacity: 10,
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
            },
            backends: HashMap::new(),
            clients,
        });

        let audit_path = std::env::temp_dir().join(format!("client-auth-test-{}.jsonl", uuid::Uuid::new_v4()));

        Arc::new(RouterState::new(
            config,
            PathBuf::default(),
            Arc::new(PolicyEngine::load(&PathBuf::from("/nonexistent-policies-dir")).unwrap()),
            Arc::new(VirtualModelRegistry::load(&PathBuf::from("/nonexistent-models.yaml")).unwrap()),
            Arc::new(ModelCatalog::load(&PathBuf::from("/nonexistent-models.yaml")).unwrap()),
            HashMap::new(),
            Arc::new(BudgetTracker::new(None).await),
            Arc::new(AuditLogger::open(audit_path.to_str().unwrap()).await.unwrap()),
            Arc::new(TrafficLog::new(10)),
        ))
    }

    async fn echo_tenant(identity: Option<Extension<Identity>>) -> String {
        identity.map(|Extension(i)| i.tenant_id).unwrap_or_else(|| "none".to_owned())
    }

    fn app(state: Arc<RouterState>) -> Router {
        Router::new()
            .route("/", get(echo_tenant))
            .layer(middleware::from_fn_with_state(state.clone(), super::client_auth_middleware))
            .with_state(state)
    }

    #[tokio::test]
    async fn no_clients_configured_passes_through_untracked() {
        let state = state_with_clients(vec![]).await;
        let resp = app(state).oneshot(Request::get("/").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), 256).await.unwrap();
        assert_eq!(&body[..], b"untracked");
    }

    #[tokio::test]
    async fn valid_key_injects_identity() {
        let state = state_with_clients(vec![ClientKeyConfig {
            api_key: "secret-key-123".into(),
            tenant_id: "acme".into(),
            user_id: Some("alice".into()),
            department: Department::Rd,
            allowed_departments: vec![],
        }])
        .await;

        let resp = app(state)
            .oneshot(
                Request::get("/")
                    .header("authorization", "Bearer secret-key-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), 256).await.unwrap();
        assert_eq!(&body[..], b"acme");
    }

    #[tokio::test]
    async fn invalid_key_returns_401() {
        let state = state_with_clients(vec![ClientKeyConfig {
            api_key: "secret-key-123".into(),
            tenant_id: "acme".into(),
            user_id: None,
            department: Department::General,
            allowed_departments: vec![],
        }])
        .await;

        let resp = app(state)
            .oneshot(
                Request::get("/")
                    .header("authorization", "Bearer wrong-key")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn missing_key_when_clients_configured_returns_401() {
        let state = state_with_clients(vec![ClientKeyConfig {
            api_key: "secret-key-123".into(),
            tenant_id: "acme".into(),
            user_id: None,
            department: Department::General,
            allowed_departments: vec![],
        }])
        .await;

        let resp = app(state).oneshot(Request::get("/").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
