//! Routing policy engine.
//!
//! Policies are `*.yaml` files in a directory (`gateway.policies_dir`),
//! hot-reloadable the same way as [`crate::config::Config`]: `load()` builds
//! a fresh, immutable index from disk and the caller swaps the `Arc` behind
//! a lock rather than mutating anything in place. A policy can be scoped to
//! a specific tenant, to a department across all tenants, or left as the
//! base/default that applies when nothing more specific matches — resolved
//! in that order.
//!
//! [`PolicyEngine::evaluate`] is the heart of §4.4 of the routing
//! specification: match a rule, raise the target tier to cover the current
//! risk assessment, clamp it against both the static and the live budget
//! guardrails, then resolve the (possibly capped) tier to a concrete
//! fallback chain of candidate models. Every step is recorded in the
//! returned trace so `/admin/simulate` and the audit log can show exactly
//! why a decision came out the way it did.

use std::{collections::HashMap, path::Path};

use serde::{Deserialize, Serialize};

use crate::config::Provider;
use crate::risk::{RiskAssessment, RiskLevel};
use crate::types::{Complexity, Department, ModelTier, TaskType};
use crate::virtual_models::{ResolvedModel, VirtualModelRegistry};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoutingRule {
    pub name: String,
    /// Empty means "any task type".
    #[serde(default)]
    pub task_types: Vec<TaskType>,
    /// Empty means "any complexity".
    #[serde(default)]
    pub complexities: Vec<Complexity>,
    /// This rule is only eligible when the current risk assessment is at or
    /// below this level. `None` means no risk ceiling.
    #[serde(default)]
    pub max_risk: Option<RiskLevel>,
    pub tier: ModelTier,
    /// Candidate models/virtual ids, in fallback-preference order.
    pub candidates: Vec<String>,
}

impl RoutingRule {
    fn matches(&self, task_type: TaskType, complexity: Complexity) -> bool {
        (self.task_types.is_empty() || self.task_types.contains(&task_type))
            && (self.complexities.is_empty() || self.complexities.contains(&complexity))
    }

    fn eligible_for_risk(&self, risk: RiskLevel) -> bool {
        match self.max_risk {
            Some(ceiling) => risk <= ceiling,
            None => true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct BudgetControls {
    /// Daily spend cap in USD. `None` means unlimited (guardrail never
    /// triggers for this department/tenant).
    #[serde(default)]
    pub daily_limit_usd: Option<f64>,
    /// Fraction of `daily_limit_usd` at which the guardrail starts
    /// downgrading the target tier by one step (default 0.8).
    #[serde(default = "default_warn_threshold")]
    pub warn_threshold: f64,
    /// Hard ceiling on the tier this department/tenant may ever reach,
    /// independent of live spend — e.g. a department that should never see
    /// `powerful` regardless of budget headroom.
    #[serde(default)]
    pub max_tier: Option<ModelTier>,
}

fn default_warn_threshold() -> f64 {
    0.8
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DepartmentPolicy {
    pub department: Department,
    /// `None` scopes this policy to the department across every tenant;
    /// `Some(id)` scopes it to one tenant within that department.
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub rules: Vec<RoutingRule>,
    #[serde(default)]
    pub budget: BudgetControls,
    /// Tier used when no rule matches the classified task/complexity.
    #[serde(default = "default_tier")]
    pub default_tier: ModelTier,
}

fn default_tier() -> ModelTier {
    ModelTier::FastCheap
}

#[derive(Debug, Deserialize)]
struct PolicyFile {
    policies: Vec<DepartmentPolicy>,
}

/// Closed outcome of a single trace entry, per spec §3: a rule either
/// matched or was skipped during the linear scan, or the target tier was
/// overridden afterward by the risk gate or a budget guardrail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceResult {
    Matched,
    Skipped,
    RiskOverride,
    BudgetOverride,
}

#[derive(Debug, Clone, Serialize)]
pub struct PolicyTraceEntry {
    pub rule: Option<String>,
    pub result: TraceResult,
    pub detail: String,
}

fn trace(rule: Option<&str>, result: TraceResult, detail: impl Into<String>) -> PolicyTraceEntry {
    PolicyTraceEntry { rule: rule.map(str::to_string), result, detail: detail.into() }
}

#[derive(Debug, Clone, Serialize)]
pub struct RoutingDecision {
    /// Ordered fallback chain — [`crate::engine::RoutingEngine`] tries these
    /// in order until one succeeds.
    pub candidates: Vec<ResolvedModel>,
    pub matched_rule: Option<String>,
    pub target_tier: ModelTier,
    pub trace: Vec<PolicyTraceEntry>,
    /// Tags accumulated as the pipeline overrides the matched rule's tier —
    /// e.g. `risk_floor_high`, `budget_force_cheap`. Carried through to
    /// [`crate::engine::RoutingOutcome`] and the audit record verbatim.
    pub constraints_applied: Vec<String>,
}

/// Context for a single routing decision, gathered from the classifier,
/// risk classifier, and budget tracker before policy evaluation runs.
pub struct MatchContext<'a> {
    pub tenant_id: &'a str,
    pub department: Department,
    pub task_type: TaskType,
    pub complexity: Complexity,
    pub risk: &'a RiskAssessment,
    /// Fraction of the department/tenant's daily budget spent so far
    /// (`0.0` if budget tracking is disabled or the tracker is unreachable).
    pub budget_spent_fraction: f64,
}

/// Loaded, indexed set of department policies. Three-tier lookup:
/// tenant-scoped policy for the department, then department-wide policy,
/// then the base/default policy (department = `general`, no tenant).
pub struct PolicyEngine {
    tenant_scoped: HashMap<(String, Department), DepartmentPolicy>,
    department_scoped: HashMap<Department, DepartmentPolicy>,
    base: DepartmentPolicy,
}

impl PolicyEngine {
    /// Load every `*.yaml`/`*.yml` file in `dir` and build the index. A
    /// missing directory yields an engine with only the built-in base
    /// policy — every request then gets `default_tier` with no rule match.
    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        let mut tenant_scoped = HashMap::new();
        let mut department_scoped = HashMap::new();
        let mut base = built_in_base_policy();

        if !dir.exists() {
            tracing::warn!(dir = %dir.display(), "routing policies directory missing — using built-in base policy only");
            return Ok(Self { tenant_scoped, department_scoped, base });
        }

        let mut files: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("yaml") | Some("yml")))
            .collect();
        files.sort();

        for path in files {
            let content = std::fs::read_to_string(&path)?;
            let file: PolicyFile = serde_yaml::from_str(&content)
                .map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))?;

            for policy in file.policies {
                match (&policy.tenant_id, policy.department) {
                    (Some(tenant), department) => {
                        tenant_scoped.insert((tenant.clone(), department), policy);
                    }
                    (None, Department::General) => {
                        base = policy;
                    }
                    (None, department) => {
                        department_scoped.insert(department, policy);
                    }
                }
            }
        }

        tracing::info!(
            tenant_scoped = tenant_scoped.len(),
            department_scoped = department_scoped.len(),
            "routing policies loaded"
        );

        Ok(Self { tenant_scoped, department_scoped, base })
    }

    fn policy_for(&self, tenant_id: &str, department: Department) -> &DepartmentPolicy {
        self.tenant_scoped
            .get(&(tenant_id.to_string(), department))
            .or_else(|| self.department_scoped.get(&department))
            .unwrap_or(&self.base)
    }

    /// Every loaded policy — base, department-scoped, then tenant-scoped —
    /// for `GET /admin/policies` introspection. Order is stable but carries
    /// no precedence meaning beyond what [`Self::policy_for`] actually uses.
    pub fn all_policies(&self) -> Vec<&DepartmentPolicy> {
        let mut all = vec![&self.base];
        all.extend(self.department_scoped.values());
        all.extend(self.tenant_scoped.values());
        all
    }

    /// The daily spend cap that applies to `tenant_id`/`department`, if any.
    /// Used by [`crate::engine::RoutingEngine`] to turn a raw spend amount
    /// from [`crate::budget::BudgetTracker`] into the fraction `evaluate`
    /// needs for its budget guardrail.
    pub fn daily_limit_for(&self, tenant_id: &str, department: Department) -> Option<f64> {
        self.policy_for(tenant_id, department).budget.daily_limit_usd
    }

    /// Run the full match → risk-gate → budget-clamp → resolve pipeline.
    pub fn evaluate(&self, ctx: &MatchContext<'_>, registry: &VirtualModelRegistry) -> RoutingDecision {
        let mut trace_entries = Vec::new();
        let mut constraints: Vec<String> = Vec::new();

        let policy = self.policy_for(ctx.tenant_id, ctx.department);
        trace_entries.push(trace(
            None,
            TraceResult::Matched,
            format!(
                "resolved policy for tenant={} department={} (scope={})",
                ctx.tenant_id,
                ctx.department,
                policy_scope_label(policy)
            ),
        ));

        // Linear scan in declared order — first match wins. Every rule that
        // doesn't match appends a `skipped` entry naming the predicate that
        // failed, per spec §4.4 step 2.
        let mut matched_rule: Option<&RoutingRule> = None;
        for rule in &policy.rules {
            if !rule.matches(ctx.task_type, ctx.complexity) {
                trace_entries.push(trace(
                    Some(&rule.name),
                    TraceResult::Skipped,
                    format!("task_type/complexity did not match (task_type={} complexity={})", ctx.task_type, ctx.complexity),
                ));
                continue;
            }
            if !rule.eligible_for_risk(ctx.risk.level) {
                trace_entries.push(trace(
                    Some(&rule.name),
                    TraceResult::Skipped,
                    format!("risk level {} exceeds rule's max_risk", ctx.risk.level),
                ));
                continue;
            }
            trace_entries.push(trace(Some(&rule.name), TraceResult::Matched, "task_type/complexity/max_risk satisfied"));
            matched_rule = Some(rule);
            break;
        }

        let (matched_rule_name, mut candidates, mut target_tier) = match matched_rule {
            Some(rule) => (Some(rule.name.clone()), rule.candidates.clone(), rule.tier),
            None => {
                trace_entries.push(trace(
                    None,
                    TraceResult::Skipped,
                    format!("no rule matched task_type={} complexity={} — using department default tier {}", ctx.task_type, ctx.complexity, policy.default_tier),
                ));
                (None, vec![default_candidate_for_tier(policy.default_tier)], policy.default_tier)
            }
        };

        // Risk gate (hard, spec §4.4 step 4): runs whenever risk is above
        // `low`, regardless of whether it ends up changing anything, so the
        // trace always shows the gate was checked.
        if ctx.risk.level != RiskLevel::Low {
            trace_entries.push(trace(
                matched_rule_name.as_deref(),
                TraceResult::RiskOverride,
                format!("risk_gate_{}: risk level {} checked against provider/tier constraints", ctx.risk.level.as_str(), ctx.risk.level),
            ));
        }

        if ctx.risk.required_min_tier.rank() > target_tier.rank() {
            let tag = format!("risk_floor_{}", ctx.risk.level.as_str());
            trace_entries.push(trace(
                matched_rule_name.as_deref(),
                TraceResult::RiskOverride,
                format!(
                    "{tag}: risk level {} requires at least tier {} — raising from {}",
                    ctx.risk.level, ctx.risk.required_min_tier, target_tier
                ),
            ));
            target_tier = ctx.risk.required_min_tier;
            candidates = vec![default_candidate_for_tier(target_tier)];
            constraints.push(tag);
        }

        if let Some(cap) = policy.budget.max_tier {
            if cap.rank() < target_tier.rank() {
                trace_entries.push(trace(
                    matched_rule_name.as_deref(),
                    TraceResult::BudgetOverride,
                    format!("static max_tier {cap} caps target tier {target_tier}"),
                ));
                target_tier = cap;
                candidates = vec![default_candidate_for_tier(target_tier)];
            }
        }

        let risk_floor = ctx.risk.required_min_tier;

        if policy.budget.daily_limit_usd.is_some() {
            if ctx.budget_spent_fraction >= 1.0 {
                if ModelTier::FastCheap.rank() >= risk_floor.rank() {
                    trace_entries.push(trace(
                        matched_rule_name.as_deref(),
                        TraceResult::BudgetOverride,
                        format!(
                            "budget_force_cheap: spend at {:.0}% of daily budget — forcing fast_cheap tier",
                            ctx.budget_spent_fraction * 100.0
                        ),
                    ));
                    target_tier = ModelTier::FastCheap;
                    candidates = vec![default_candidate_for_tier(target_tier)];
                    constraints.push("budget_force_cheap".to_string());
                } else {
                    trace_entries.push(trace(
                        matched_rule_name.as_deref(),
                        TraceResult::Skipped,
                        format!(
                            "spend at {:.0}% would force fast_cheap but risk floor {} forbids it — holding at {target_tier}",
                            ctx.budget_spent_fraction * 100.0,
                            risk_floor
                        ),
                    ));
                }
            } else if ctx.budget_spent_fraction >= policy.budget.warn_threshold && target_tier.rank() > ModelTier::Local.rank() {
                let downgraded = target_tier.downgrade_one();
                if downgraded.rank() >= risk_floor.rank() {
                    trace_entries.push(trace(
                        matched_rule_name.as_deref(),
                        TraceResult::BudgetOverride,
                        format!(
                            "budget_guard_downgrade: spend at {:.0}% exceeds warn threshold {:.0}% — downgrading {target_tier} to {downgraded}",
                            ctx.budget_spent_fraction * 100.0,
                            policy.budget.warn_threshold * 100.0
                        ),
                    ));
                    target_tier = downgraded;
                    candidates = vec![default_candidate_for_tier(target_tier)];
                    constraints.push("budget_guard_downgrade".to_string());
                } else {
                    trace_entries.push(trace(
                        matched_rule_name.as_deref(),
                        TraceResult::Skipped,
                        format!(
                            "spend at {:.0}% would downgrade {target_tier} to {downgraded}, below risk floor {risk_floor} — holding at {target_tier}",
                            ctx.budget_spent_fraction * 100.0
                        ),
                    ));
                }
            }
        }

        let mut resolved: Vec<ResolvedModel> = registry.resolve_list(&candidates);

        if ctx.risk.direct_commercial_forbidden {
            let before = resolved.len();
            resolved.retain(|c| !c.provider.is_direct_commercial());
            if resolved.len() != before {
                trace_entries.push(trace(
                    matched_rule_name.as_deref(),
                    TraceResult::RiskOverride,
                    format!("dropped {} direct-commercial candidate(s): {}", before - resolved.len(), ctx.risk.data_residency_note),
                ));
            }
        }

        trace_entries.push(trace(
            matched_rule_name.as_deref(),
            TraceResult::Matched,
            resolved.iter().map(|c| format!("{}/{}", c.provider, c.model)).collect::<Vec<_>>().join(" -> "),
        ));

        RoutingDecision {
            candidates: resolved,
            matched_rule: matched_rule_name,
            target_tier,
            trace: trace_entries,
            constraints_applied: constraints,
        }
    }
}

fn policy_scope_label(policy: &DepartmentPolicy) -> String {
    match &policy.tenant_id {
        Some(tenant) => format!("tenant:{tenant}"),
        None if policy.department == Department::General => "base".to_string(),
        None => "department".to_string(),
    }
}

/// Convention used when a rule doesn't pin specific candidates (department
/// default tier, or after a risk-raise/budget-clamp retargets the tier):
/// resolve through the virtual model catalog's per-tier entry, e.g.
/// `rb://balanced`.
fn default_candidate_for_tier(tier: ModelTier) -> String {
    format!("rb://{tier}")
}

fn built_in_base_policy() -> DepartmentPolicy {
    DepartmentPolicy {
        department: Department::General,
        tenant_id: None,
        rules: Vec::new(),
        budget: BudgetControls::default(),
        default_tier: ModelTier::FastCheap,
    }
}
