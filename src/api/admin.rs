//! Admin API (admin port) — operator-facing introspection and control.
//!
//! These endpoints are separated onto a different port so they can be
//! network-restricted independently of the client API (e.g. accessible only
//! from the internal Docker network, never exposed to the internet).

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    backends::BackendClient,
    engine::RouterState,
    policy::{MatchContext, PolicyEngine},
    risk::{RiskAssessment, RiskLevel},
    types::{Complexity, Department, TaskType},
};

/// Build the admin-facing axum router.
pub fn router(state: Arc<RouterState>) -> Router {
    Router::new()
        .route("/admin/health", get(health))
        .route("/admin/traffic", get(traffic))
        .route("/admin/config", get(config))
        .route("/admin/backends/health", get(backends_health))
        .route("/admin/policies", get(policies))
        .route("/admin/policies/reload", post(policies_reload))
        .route("/admin/simulate", post(simulate))
        .route("/metrics", get(crate::api::metrics::metrics))
        .with_state(state)
}

/// GET /admin/health — liveness plus a summary of what's currently loaded.
pub async fn health(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let config = state.config();
    Json(json!({
        "status": "ok",
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "backends_configured": config.backends.len(),
        "backends_live": state.backends().len(),
        "virtual_models": state.virtual_models().get_all().count(),
        "policies_loaded": state.policy().all_policies().len(),
    }))
}

#[derive(Deserialize)]
pub struct TrafficQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}
fn default_limit() -> usize {
    100
}

/// GET /admin/traffic?limit=N — recent N traffic entries plus aggregate stats.
pub async fn traffic(State(state): State<Arc<RouterState>>, Query(q): Query<TrafficQuery>) -> impl IntoResponse {
    let entries = state.traffic.recent(q.limit).await;
    let stats = state.traffic.stats().await;
    Json(json!({
        "stats": stats,
        "entries": entries,
    }))
}

/// GET /admin/config — the current config with secrets redacted (env var
/// names shown, resolved values never are).
pub async fn config(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let cfg = state.config();

    let backends: Vec<Value> = cfg
        .backends
        .iter()
        .map(|(name, b)| {
            json!({
                "name": name,
                "base_url": b.base_url,
                "provider": b.provider.to_string(),
                "api_key_env": b.api_key_env,
                "timeout_ms": b.timeout_ms,
            })
        })
        .collect();

    Json(json!({
        "gateway": {
            "client_port": cfg.gateway.client_port,
            "admin_port": cfg.gateway.admin_port,
            "traffic_log_capacity": cfg.gateway.traffic_log_capacity,
            "rate_limit_rpm": cfg.gateway.rate_limit_rpm,
            "admin_auth_enabled": cfg.gateway.admin_token_env.is_some(),
            "policies_dir": cfg.gateway.policies_dir,
            "models_config_path": cfg.gateway.models_config_path,
            "audit_log_path": cfg.gateway.audit_log_path,
            "budget_store": if cfg.gateway.redis_url.is_some() { "redis" } else { "in_memory" },
            "classifier_model": cfg.gateway.classifier_model,
            "classifier_timeout_ms": cfg.gateway.classifier_timeout_ms,
            "classifier_confidence_threshold": cfg.gateway.classifier_confidence_threshold,
            "emergency_fallback_model": cfg.gateway.emergency_fallback_model,
            "emergency_fallback_provider": cfg.gateway.emergency_fallback_provider.to_string(),
            "emergency_fallback_oss_provider": cfg.gateway.emergency_fallback_oss_provider.to_string(),
            "emergency_fallback_oss_model": cfg.gateway.emergency_fallback_oss_model,
        },
        "backends": backends,
        "clients_configured": cfg.clients.len(),
    }))
}

/// GET /admin/backends/health — probe every configured backend by name,
/// constructing a fresh client the same way startup does (so a backend
/// disabled at startup due to a missing key still shows up as an error here
/// rather than silently vanishing from the live `backends()` map).
pub async fn backends_health(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let cfg = state.config();
    let mut results = Vec::new();

    for (name, backend_cfg) in &cfg.backends {
        let client = match BackendClient::new(backend_cfg) {
            Ok(c) => c,
            Err(e) => {
                results.push(json!({ "backend": name, "status": "error", "error": e.to_string() }));
                continue;
            }
        };

        match client.health_check().await {
            Ok(_) => results.push(json!({ "backend": name, "status": "ok" })),
            Err(e) => results.push(json!({ "backend": name, "status": "unreachable", "error": e.to_string() })),
        }
    }

    let all_ok = results.iter().all(|r| r["status"] == "ok");
    let status = if all_ok { StatusCode::OK } else { StatusCode::MULTI_STATUS };

    (status, Json(json!({ "backends": results })))
}

/// GET /admin/policies — lists every loaded policy (base, department-scoped,
/// tenant-scoped).
pub async fn policies(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let policy = state.policy();
    let all: Vec<_> = policy.all_policies();
    Json(json!({ "policies": all }))
}

/// POST /admin/policies/reload — re-reads `gateway.policies_dir` from disk
/// and hot-swaps the live [`PolicyEngine`]. In-flight requests finish
/// against the policy snapshot they already hold.
pub async fn policies_reload(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let dir = state.config().gateway.policies_dir.clone();
    match PolicyEngine::load(std::path::Path::new(&dir)) {
        Ok(new_engine) => {
            let count = new_engine.all_policies().len();
            state.reload_policy(Arc::new(new_engine));
            (StatusCode::OK, Json(json!({ "status": "reloaded", "policies_loaded": count }))).into_response()
        }
        Err(error) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "status": "error", "error": error.to_string() })),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct SimulateRequest {
    #[serde(default = "simulate_default_tenant")]
    pub tenant_id: String,
    #[serde(default)]
    pub department: Department,
    pub task_type: TaskType,
    pub complexity: Complexity,
    #[serde(default)]
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub budget_spent_fraction: f64,
}

fn simulate_default_tenant() -> String {
    "simulated".to_string()
}

/// POST /admin/simulate — runs [`PolicyEngine::evaluate`] against a synthetic
/// classification/risk/budget input, without dispatching to any backend.
/// Lets an operator answer "what would this route to?" for a hypothetical
/// request while tuning a policy file.
pub async fn simulate(State(state): State<Arc<RouterState>>, Json(req): Json<SimulateRequest>) -> impl IntoResponse {
    let risk = RiskAssessment::from_level(req.risk_level);
    let policy = state.policy();
    let virtual_models = state.virtual_models();

    let ctx = MatchContext {
        tenant_id: &req.tenant_id,
        department: req.department,
        task_type: req.task_type,
        complexity: req.complexity,
        risk: &risk,
        budget_spent_fraction: req.budget_spent_fraction,
    };
    let decision = policy.evaluate(&ctx, &virtual_models);

    Json(json!({
        "decision": decision,
        "risk_assessment": {
            "level": risk.level.to_string(),
            "direct_commercial_forbidden": risk.direct_commercial_forbidden,
            "required_min_tier": risk.required_min_tier.to_string(),
            "data_residency_note": risk.data_residency_note,
        },
    }))
}
