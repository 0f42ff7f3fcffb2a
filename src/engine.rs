//! The routing engine: orchestrates the pipeline described in the module
//! docs of [`crate::analyzer`], [`crate::risk`], [`crate::classifier`], and
//! [`crate::policy`] into one per-request decision, then dispatches to a
//! backend with fallback.
//!
//! [`RouterState`] is the shared application state injected into every
//! request handler via [`axum::extract::State`] — the direct descendant of
//! the teacher's `RouterState`, extended with the routing/governance
//! components the original only forwarded traffic without. Config, policies,
//! and the virtual model catalog are each held behind their own
//! `Arc<RwLock<Arc<T>>>` so a hot-reload of one never blocks readers of the
//! others, and in-flight requests always finish against the snapshot they
//! started with.
//!
//! [`RoutingEngine::route`] is the single entry point that runs the full
//! pipeline in the fixed order the specification requires: pre-analysis →
//! risk → classification → policy → dispatch (with fallback) → audit. It
//! never panics and always produces exactly one audit record per terminated
//! request, success or failure.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, RwLock},
    time::Instant,
};

use serde_json::Value;
use tracing::{info, warn};

use crate::{
    analyzer::PreAnalyzer,
    api::rate_limit::RateLimiter,
    audit::SharedAuditLogger,
    backends::BackendClient,
    budget::BudgetTracker,
    classifier::{ClassificationResult, MetaClassifier},
    config::{ClientKeyConfig, Config, Provider},
    error::RoutingGatewayError,
    models::ModelCatalog,
    policy::{MatchContext, PolicyEngine, PolicyTraceEntry},
    risk::{RiskAssessment, RiskClassifier, RiskLevel},
    traffic::{TrafficEntry, TrafficLog},
    types::{ClassifiedBy, Complexity, Department, ModelTier, TaskType},
    virtual_models::{ResolvedModel, VirtualModelRegistry},
};

/// Ambient identity injected by the (out-of-scope) auth layer. Populated
/// from a matched [`ClientKeyConfig`], or the untracked default when client
/// auth is disabled.
#[derive(Debug, Clone)]
pub struct Identity {
    pub tenant_id: String,
    pub user_id: Option<String>,
    pub department: Department,
}

impl Default for Identity {
    fn default() -> Self {
        Self { tenant_id: "untracked".to_string(), user_id: None, department: Department::General }
    }
}

impl From<&ClientKeyConfig> for Identity {
    fn from(client: &ClientKeyConfig) -> Self {
        Self {
            tenant_id: client.tenant_id.clone(),
            user_id: client.user_id.clone(),
            department: client.department,
        }
    }
}

/// Outcome of a single `RoutingEngine::route` call — the data the HTTP
/// layer renders into headers / `x_routing_decision`, and the audit logger
/// turns into a durable record. Mirrors `RoutingOutcome` in the
/// specification's data model.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RoutingOutcome {
    pub request_id: String,
    pub tenant_id: String,
    pub user_id: Option<String>,
    pub department: Department,
    pub task_type: TaskType,
    pub complexity: Complexity,
    pub confidence: f64,
    pub classified_by: ClassifiedBy,
    pub required_capability: Option<String>,
    pub risk_level: RiskLevel,
    pub risk_rationale: String,
    pub audit_required: bool,
    pub data_residency_note: String,
    pub policy_version: String,
    pub matched_rule: Option<String>,
    pub policy_trace: Vec<PolicyTraceEntry>,
    pub constraints_applied: Vec<String>,
    pub target_tier: ModelTier,
    pub actual_model: String,
    pub actual_provider: Provider,
    pub fallback_used: bool,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_cost_usd: f64,
    pub latency_ms: u64,
}

/// Shared application state injected into every request handler via
/// [`axum::extract::State`].
pub struct RouterState {
    config_lock: RwLock<Arc<Config>>,
    pub config_path: PathBuf,
    policy_lock: RwLock<Arc<PolicyEngine>>,
    virtual_models_lock: RwLock<Arc<VirtualModelRegistry>>,
    model_catalog_lock: RwLock<Arc<ModelCatalog>>,
    backends_lock: RwLock<Arc<HashMap<Provider, Arc<BackendClient>>>>,
    pub budget: Arc<BudgetTracker>,
    pub audit: SharedAuditLogger,
    pub traffic: Arc<TrafficLog>,
    pre_analyzer: PreAnalyzer,
    risk_classifier: RiskClassifier,
    meta_classifier: MetaClassifier,
    pub started_at: Instant,
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub admin_token: Option<String>,
    /// Maps a literal client API key to the tenant/user/department identity
    /// it carries. Empty means client auth is disabled — every request is
    /// admitted under the untracked/general default [`Identity`].
    pub client_map: HashMap<String, ClientKeyConfig>,
}

#[allow(clippy::too_many_arguments)]
impl RouterState {
    pub fn new(
        config: Arc<Config>,
        config_path: PathBuf,
        policy: Arc<PolicyEngine>,
        virtual_models: Arc<VirtualModelRegistry>,
        model_catalog: Arc<ModelCatalog>,
        backends: HashMap<Provider, Arc<BackendClient>>,
        budget: Arc<BudgetTracker>,
        audit: SharedAuditLogger,
        traffic: Arc<TrafficLog>,
    ) -> Self {
        let rate_limiter = config
            .gateway
            .rate_limit_rpm
            .filter(|&rpm| rpm > 0)
            .map(|rpm| Arc::new(RateLimiter::new(rpm)));
        let admin_token = config
            .gateway
            .admin_token_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|t| !t.is_empty());
        let client_map: HashMap<String, ClientKeyConfig> =
            config.clients.iter().map(|c| (c.api_key.clone(), c.clone())).collect();
        if !client_map.is_empty() {
            info!(count = client_map.len(), "loaded client key mappings");
        }

        let meta_classifier = MetaClassifier::new(
            config.gateway.classifier_timeout_ms,
            config.gateway.classifier_confidence_threshold,
        );

        Self {
            config_lock: RwLock::new(config),
            config_path,
            policy_lock: RwLock::new(policy),
            virtual_models_lock: RwLock::new(virtual_models),
            model_catalog_lock: RwLock::new(model_catalog),
            backends_lock: RwLock::new(Arc::new(backends)),
            budget,
            audit,
            traffic,
            pre_analyzer: PreAnalyzer::new(),
            risk_classifier: RiskClassifier::new(),
            meta_classifier,
            started_at: Instant::now(),
            rate_limiter,
            admin_token,
            client_map,
        }
    }

    /// Returns a snapshot of the current live config. The lock is held only
    /// for the duration of `Arc::clone`, so it never blocks request handling.
    pub fn config(&self) -> Arc<Config> {
        self.config_lock.read().expect("config lock poisoned").clone()
    }

    pub fn replace_config(&self, new: Arc<Config>) {
        *self.config_lock.write().expect("config lock poisoned") = new;
    }

    pub fn policy(&self) -> Arc<PolicyEngine> {
        self.policy_lock.read().expect("policy lock poisoned").clone()
    }

    /// Hot-reload the routing policy index. Builds the new index off-path
    /// and swaps a single pointer — in-flight requests finish against the
    /// pre-swap snapshot they already hold a clone of.
    pub fn reload_policy(&self, new: Arc<PolicyEngine>) {
        *self.policy_lock.write().expect("policy lock poisoned") = new;
    }

    pub fn virtual_models(&self) -> Arc<VirtualModelRegistry> {
        self.virtual_models_lock.read().expect("virtual model lock poisoned").clone()
    }

    pub fn reload_virtual_models(&self, new: Arc<VirtualModelRegistry>) {
        *self.virtual_models_lock.write().expect("virtual model lock poisoned") = new;
    }

    pub fn model_catalog(&self) -> Arc<ModelCatalog> {
        self.model_catalog_lock.read().expect("model catalog lock poisoned").clone()
    }

    pub fn reload_model_catalog(&self, new: Arc<ModelCatalog>) {
        *self.model_catalog_lock.write().expect("model catalog lock poisoned") = new;
    }

    pub fn backends(&self) -> Arc<HashMap<Provider, Arc<BackendClient>>> {
        self.backends_lock.read().expect("backends lock poisoned").clone()
    }

    fn backend_for(&self, provider: Provider) -> Option<Arc<BackendClient>> {
        self.backends().get(&provider).cloned()
    }

    /// Resolve the caller's identity for a bearer token. `None` when client
    /// auth is configured (`client_map` non-empty) but the token doesn't
    /// match any entry — callers treat that as a 401, not a fallback
    /// identity.
    pub fn identity_for_key(&self, api_key: &str) -> Option<Identity> {
        self.client_map.get(api_key).map(Identity::from)
    }
}

/// Extract the full concatenated text of every message's content —
/// [`crate::analyzer::PreAnalyzer`] and [`crate::risk::RiskClassifier`] both
/// operate on this, per §4.1/§4.2 of the specification. Multimodal content
/// parts that aren't plain strings contribute only their `"text"` field, if
/// present; non-text parts (images, etc.) are ignored for analysis purposes.
pub fn concatenated_text(messages: &[Value]) -> String {
    let mut out = String::new();
    for message in messages {
        match message.get("content") {
            Some(Value::String(s)) => {
                out.push_str(s);
                out.push('\n');
            }
            Some(Value::Array(parts)) => {
                for part in parts {
                    if let Some(text) = part.get("text").and_then(Value::as_str) {
                        out.push_str(text);
                        out.push('\n');
                    }
                }
            }
            _ => {}
        }
    }
    out
}

/// The last user message's content, truncated to `max_chars` — the excerpt
/// sent to the meta-classifier (§4.3: at most 1000 chars of user text).
fn last_user_excerpt(messages: &[Value], max_chars: usize) -> String {
    let text = messages
        .iter()
        .rev()
        .find(|m| m.get("role").and_then(Value::as_str) == Some("user"))
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    if text.chars().count() > max_chars {
        text.chars().take(max_chars).collect()
    } else {
        text
    }
}

/// The orchestrator described in spec §4.8. Stateless — every method takes
/// the shared [`RouterState`] and the per-request identity/body it needs.
pub struct RoutingEngine;

impl RoutingEngine {
    /// Run the full pipeline for a non-streaming `/v1/chat/completions`
    /// request and return the upstream's (possibly fallback) response JSON
    /// alongside the [`RoutingOutcome`] the HTTP layer renders into headers
    /// and `x_routing_decision`.
    #[tracing::instrument(skip(state, body), fields(tenant = %identity.tenant_id, request_id))]
    pub async fn route(
        state: &RouterState,
        body: &Value,
        identity: &Identity,
        request_id: String,
    ) -> Result<(Value, RoutingOutcome), RoutingGatewayError> {
        tracing::Span::current().record("request_id", &request_id.as_str());
        let started = Instant::now();

        let (classification, risk, pre_department) =
            Self::classify(state, body, identity).await;
        let department = effective_department(state, identity, pre_department);

        let config = state.config();
        let policy = state.policy();
        let virtual_models = state.virtual_models();

        let budget_pct = Self::budget_pct(state, identity, &policy, department).await;

        let ctx = MatchContext {
            tenant_id: &identity.tenant_id,
            department,
            task_type: classification.task_type,
            complexity: classification.complexity,
            risk: &risk,
            budget_spent_fraction: budget_pct,
        };
        let decision = policy.evaluate(&ctx, &virtual_models);

        let candidates = Self::candidates_or_emergency(&config, &decision.candidates, &risk);

        let mut trace = decision.trace.clone();
        let mut fallback_used = false;
        let mut last_error: Option<String> = None;
        // Whether any candidate we actually had a live backend for was a
        // risk-allowed (non-direct-commercial) provider — distinct from
        // merely listing one as a candidate. A governance block is only the
        // right diagnosis when every reachable backend was direct-commercial;
        // listing an unreachable OSS/compliant candidate (no adapter
        // configured) doesn't make the failure any less of a governance gap.
        let mut reachable_allowed_provider = false;

        for candidate in &candidates {
            let Some(backend) = state.backend_for(candidate.provider) else {
                trace.push(PolicyTraceEntry {
                    rule: decision.matched_rule.clone(),
                    result: crate::policy::TraceResult::Skipped,
                    detail: format!("no backend configured for provider `{}` — skipping", candidate.provider),
                });
                continue;
            };
            if !candidate.provider.is_direct_commercial() {
                reachable_allowed_provider = true;
            }

            let mut request = body.clone();
            request["model"] = Value::String(candidate.model.clone());
            request["stream"] = Value::Bool(false);

            match backend.chat_completions(request).await {
                Ok(response) => {
                    let prompt_tokens = response["usage"]["prompt_tokens"].as_u64().unwrap_or(pre_prompt_tokens(&classification));
                    let completion_tokens = response["usage"]["completion_tokens"].as_u64().unwrap_or(0);
                    let catalog = state.model_catalog();
                    let cost = catalog.estimate_cost(
                        &candidate.model,
                        candidate.provider,
                        decision.target_tier,
                        prompt_tokens,
                        completion_tokens,
                    );
                    state.budget.record_spend(&identity.tenant_id, cost).await;

                    let latency_ms = started.elapsed().as_millis() as u64;
                    let outcome = RoutingOutcome {
                        request_id: request_id.clone(),
                        tenant_id: identity.tenant_id.clone(),
                        user_id: identity.user_id.clone(),
                        department,
                        task_type: classification.task_type,
                        complexity: classification.complexity,
                        confidence: classification.confidence,
                        classified_by: classification.classified_by,
                        required_capability: classification.required_capability.clone(),
                        risk_level: risk.level,
                        risk_rationale: risk.rationale.clone(),
                        audit_required: risk.audit_required,
                        data_residency_note: risk.data_residency_note.clone(),
                        policy_version: decision.matched_rule.clone().unwrap_or_else(|| "none".into()),
                        matched_rule: decision.matched_rule.clone(),
                        policy_trace: trace.clone(),
                        constraints_applied: decision.constraints_applied.clone(),
                        target_tier: decision.target_tier,
                        actual_model: candidate.model.clone(),
                        actual_provider: candidate.provider,
                        fallback_used,
                        prompt_tokens,
                        completion_tokens,
                        total_cost_usd: cost,
                        latency_ms,
                    };

                    Self::record_success(state, &outcome, &risk).await;
                    return Ok((response, outcome));
                }
                Err(error) => {
                    warn!(provider = %candidate.provider, model = %candidate.model, %error, "provider attempt failed — trying next candidate");
                    trace.push(PolicyTraceEntry {
                        rule: decision.matched_rule.clone(),
                        result: crate::policy::TraceResult::Skipped,
                        detail: format!("{}/{} failed: {error}", candidate.provider, candidate.model),
                    });
                    last_error = Some(error.to_string());
                    fallback_used = true;
                }
            }
        }

        let governance_blocked = risk.direct_commercial_forbidden && !reachable_allowed_provider;
        let latency_ms = started.elapsed().as_millis() as u64;
        let message = last_error.unwrap_or_else(|| "no candidate provider was available".to_string());

        Self::record_failure(
            state,
            &request_id,
            identity,
            department,
            &classification,
            &risk,
            decision.target_tier,
            decision.matched_rule.as_deref(),
            &trace,
            governance_blocked,
            &message,
            latency_ms,
        )
        .await;

        if governance_blocked {
            Err(RoutingGatewayError::RoutingError {
                message: format!(
                    "no provider may legally serve this {} request (tried: {}) — {}. Start a local OSS runtime (ollama/vLLM) or configure compliant-cloud (Bedrock/Azure) credentials for this department.",
                    risk.level, message, risk.data_residency_note
                ),
                governance_blocked: true,
            })
        } else {
            Err(RoutingGatewayError::RoutingError {
                message: format!("all candidate providers failed: {message}"),
                governance_blocked: false,
            })
        }
    }

    /// Run the full pipeline for a streaming request. Returns the first
    /// successful candidate's raw [`crate::backends::SseStream`] alongside
    /// the [`RoutingOutcome`] computed from the request's estimated token
    /// counts (streaming responses don't carry a final usage object the
    /// gateway can inspect before the body starts).
    #[tracing::instrument(skip(state, body), fields(tenant = %identity.tenant_id, request_id))]
    pub async fn route_stream(
        state: &RouterState,
        body: &Value,
        identity: &Identity,
        request_id: String,
    ) -> Result<(crate::backends::SseStream, RoutingOutcome), RoutingGatewayError> {
        tracing::Span::current().record("request_id", &request_id.as_str());
        let started = Instant::now();

        let (classification, risk, pre_department) = Self::classify(state, body, identity).await;
        let department = effective_department(state, identity, pre_department);

        let config = state.config();
        let policy = state.policy();
        let virtual_models = state.virtual_models();
        let budget_pct = Self::budget_pct(state, identity, &policy, department).await;

        let ctx = MatchContext {
            tenant_id: &identity.tenant_id,
            department,
            task_type: classification.task_type,
            complexity: classification.complexity,
            risk: &risk,
            budget_spent_fraction: budget_pct,
        };
        let decision = policy.evaluate(&ctx, &virtual_models);
        let candidates = Self::candidates_or_emergency(&config, &decision.candidates, &risk);

        let mut trace = decision.trace.clone();
        let mut fallback_used = false;
        let mut last_error: Option<String> = None;
        let mut reachable_allowed_provider = false;

        for candidate in &candidates {
            let Some(backend) = state.backend_for(candidate.provider) else {
                trace.push(PolicyTraceEntry {
                    rule: decision.matched_rule.clone(),
                    result: crate::policy::TraceResult::Skipped,
                    detail: format!("no backend configured for provider `{}` — skipping", candidate.provider),
                });
                continue;
            };
            if !candidate.provider.is_direct_commercial() {
                reachable_allowed_provider = true;
            }
            if !backend.supports_streaming() {
                trace.push(PolicyTraceEntry {
                    rule: decision.matched_rule.clone(),
                    result: crate::policy::TraceResult::Skipped,
                    detail: format!("{} does not support streaming — skipping", candidate.provider),
                });
                continue;
            }

            let mut request = body.clone();
            request["model"] = Value::String(candidate.model.clone());
            request["stream"] = Value::Bool(true);

            match backend.chat_completions_stream(request).await {
                Ok(stream) => {
                    // Streaming requests are charged up front against the
                    // estimated prompt-token count only (spec open question
                    // §9: record before the stream yields any data, so a
                    // client that disconnects mid-stream still has been
                    // charged for the prompt it consumed).
                    let prompt_tokens = pre_prompt_tokens(&classification);
                    let catalog = state.model_catalog();
                    let cost = catalog.estimate_cost(&candidate.model, candidate.provider, decision.target_tier, prompt_tokens, 0);
                    state.budget.record_spend(&identity.tenant_id, cost).await;

                    let latency_ms = started.elapsed().as_millis() as u64;
                    let outcome = RoutingOutcome {
                        request_id: request_id.clone(),
                        tenant_id: identity.tenant_id.clone(),
                        user_id: identity.user_id.clone(),
                        department,
                        task_type: classification.task_type,
                        complexity: classification.complexity,
                        confidence: classification.confidence,
                        classified_by: classification.classified_by,
                        required_capability: classification.required_capability.clone(),
                        risk_level: risk.level,
                        risk_rationale: risk.rationale.clone(),
                        audit_required: risk.audit_required,
                        data_residency_note: risk.data_residency_note.clone(),
                        policy_version: decision.matched_rule.clone().unwrap_or_else(|| "none".into()),
                        matched_rule: decision.matched_rule.clone(),
                        policy_trace: trace.clone(),
                        constraints_applied: decision.constraints_applied.clone(),
                        target_tier: decision.target_tier,
                        actual_model: candidate.model.clone(),
                        actual_provider: candidate.provider,
                        fallback_used,
                        prompt_tokens,
                        completion_tokens: 0,
                        total_cost_usd: cost,
                        latency_ms,
                    };

                    Self::record_success(state, &outcome, &risk).await;
                    return Ok((stream, outcome));
                }
                Err(error) => {
                    warn!(provider = %candidate.provider, model = %candidate.model, %error, "streaming attempt failed — trying next candidate");
                    trace.push(PolicyTraceEntry {
                        rule: decision.matched_rule.clone(),
                        result: crate::policy::TraceResult::Skipped,
                        detail: format!("{}/{} failed: {error}", candidate.provider, candidate.model),
                    });
                    last_error = Some(error.to_string());
                    fallback_used = true;
                }
            }
        }

        let governance_blocked = risk.direct_commercial_forbidden && !reachable_allowed_provider;
        let latency_ms = started.elapsed().as_millis() as u64;
        let message = last_error.unwrap_or_else(|| "no streaming-capable candidate provider was available".to_string());

        Self::record_failure(
            state,
            &request_id,
            identity,
            department,
            &classification,
            &risk,
            decision.target_tier,
            decision.matched_rule.as_deref(),
            &trace,
            governance_blocked,
            &message,
            latency_ms,
        )
        .await;

        Err(RoutingGatewayError::RoutingError { message, governance_blocked })
    }

    /// Steps 2–4 of §4.8: pre-analysis, risk assessment, and
    /// meta-classification (falling back to the heuristic on any failure).
    async fn classify(
        state: &RouterState,
        body: &Value,
        identity: &Identity,
    ) -> (ClassificationResult, RiskAssessment, Department) {
        let messages: Vec<Value> = body
            .get("messages")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let text = concatenated_text(&messages);

        let pre = state.pre_analyzer.analyze(&text);
        let risk = state.risk_classifier.assess(&text);

        let config = state.config();
        let virtual_models = state.virtual_models();
        let resolved_classifier = virtual_models.resolve(&config.gateway.classifier_model);

        let classification = match state.backend_for(resolved_classifier.provider) {
            Some(backend) => {
                let excerpt = last_user_excerpt(&messages, 1000);
                state
                    .meta_classifier
                    .classify(&backend, &resolved_classifier.model, &excerpt, &pre)
                    .await
            }
            None => {
                warn!(
                    provider = %resolved_classifier.provider,
                    "no backend configured for the classifier provider — using heuristic fallback"
                );
                crate::classifier::heuristic_fallback(&pre)
            }
        };

        let _ = identity;
        (classification, risk, pre.department)
    }

    async fn budget_pct(
        state: &RouterState,
        identity: &Identity,
        policy: &PolicyEngine,
        department: Department,
    ) -> f64 {
        match policy.daily_limit_for(&identity.tenant_id, department) {
            Some(limit) => state.budget.percent_of(&identity.tenant_id, limit).await,
            None => 0.0,
        }
    }

    /// If the policy's risk gate eliminated every candidate, fall back to
    /// the configured emergency rule (spec §4.4 "Emergency fallback"):
    /// an OSS/local model when direct-commercial is forbidden, otherwise
    /// the configured safe-cheap commercial default.
    fn candidates_or_emergency(config: &Config, candidates: &[ResolvedModel], risk: &RiskAssessment) -> Vec<ResolvedModel> {
        if !candidates.is_empty() {
            return candidates.to_vec();
        }

        if risk.direct_commercial_forbidden {
            vec![ResolvedModel {
                model: config.gateway.emergency_fallback_oss_model.clone(),
                provider: config.gateway.emergency_fallback_oss_provider,
            }]
        } else {
            vec![ResolvedModel {
                model: config.gateway.emergency_fallback_model.clone(),
                provider: config.gateway.emergency_fallback_provider,
            }]
        }
    }

    async fn record_success(state: &RouterState, outcome: &RoutingOutcome, risk: &RiskAssessment) {
        let provider_str = outcome.actual_provider.to_string();
        let record = state.audit.build_record(
            Some(&outcome.request_id),
            &outcome.tenant_id,
            outcome.user_id.as_deref(),
            outcome.department,
            outcome.task_type,
            outcome.complexity,
            outcome.classified_by,
            risk,
            outcome.target_tier,
            outcome.matched_rule.as_deref(),
            &outcome.policy_trace,
            Some(provider_str.as_str()),
            Some(&outcome.actual_model),
            outcome.fallback_used,
            outcome.total_cost_usd,
            outcome.latency_ms,
        );
        state.audit.log(&record).await;

        let mut entry = TrafficEntry::new(
            outcome.tenant_id.clone(),
            outcome.department,
            outcome.task_type,
            outcome.complexity,
            outcome.risk_level,
            outcome.classified_by,
            outcome.target_tier,
            outcome.actual_provider.to_string(),
            outcome.actual_model.clone(),
        )
        .with_cost(outcome.total_cost_usd)
        .with_latency(outcome.latency_ms);
        if outcome.fallback_used {
            entry = entry.mark_fallback_used();
        }
        state.traffic.push(entry);
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_failure(
        state: &RouterState,
        request_id: &str,
        identity: &Identity,
        department: Department,
        classification: &ClassificationResult,
        risk: &RiskAssessment,
        target_tier: ModelTier,
        matched_rule: Option<&str>,
        trace: &[PolicyTraceEntry],
        governance_blocked: bool,
        error: &str,
        latency_ms: u64,
    ) {
        let record = state.audit.build_failure_record(
            Some(request_id),
            &identity.tenant_id,
            identity.user_id.as_deref(),
            department,
            classification.task_type,
            classification.complexity,
            classification.classified_by,
            risk,
            target_tier,
            matched_rule,
            trace,
            governance_blocked,
            error,
            latency_ms,
        );
        state.audit.log(&record).await;

        let mut entry = TrafficEntry::new(
            identity.tenant_id.clone(),
            department,
            classification.task_type,
            classification.complexity,
            risk.level,
            classification.classified_by,
            target_tier,
            "none".to_string(),
            "none".to_string(),
        )
        .with_latency(latency_ms)
        .with_error(error);
        entry.id = request_id.to_string();
        state.traffic.push(entry);
    }
}

/// Token estimate to charge a streaming request (or any request whose
/// backend didn't report `usage`) against — [`crate::analyzer`]'s estimate
/// is already computed during pre-analysis; the classifier doesn't carry it
/// forward, so this is a conservative constant floor instead of re-running
/// the tokenizer. Good enough for a guardrail that only needs to be in the
/// right ballpark (spec §4.6).
fn pre_prompt_tokens(classification: &ClassificationResult) -> u64 {
    match classification.complexity {
        Complexity::Simple => 200,
        Complexity::Medium => 800,
        Complexity::Complex => 3000,
    }
}

/// Department used for policy resolution: the ambient identity's department
/// when client auth assigned one explicitly (anything other than the
/// `general` zero value), otherwise the pre-analysis department hint.
fn effective_department(state: &RouterState, identity: &Identity, hint: Department) -> Department {
    if !state.client_map.is_empty() && identity.department != Department::General {
        identity.department
    } else if identity.department != Department::General {
        identity.department
    } else {
        hint
    }
}
