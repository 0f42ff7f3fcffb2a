//! Durable, append-only audit trail.
//!
//! Distinct from [`crate::traffic`]'s bounded in-memory ring buffer: this is
//! the compliance-facing record, one JSON object per line, written to disk
//! and never evicted. Logging is best-effort — a write failure here must
//! never fail the request it's describing, so every public method swallows
//! its own I/O errors after logging them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::policy::PolicyTraceEntry;
use crate::risk::RiskAssessment;
use crate::types::{ClassifiedBy, Complexity, Department, ModelTier, TaskType};

/// Per-tier cost estimate used only for the audit record's
/// `estimated_cost_usd` field when a request fails before a real model
/// invocation (and so before [`crate::models::ModelCatalog`] has anything to
/// look up). Deliberately coarser, and kept separate from
/// [`crate::models::TIER_FALLBACK_PRICE_PER_MTOK`], which prices an actual
/// completion — this table is a cheap order-of-magnitude audit estimate, not
/// a billing input.
const TIER_COST_ESTIMATE: [(ModelTier, f64); 4] = [
    (ModelTier::Local, 0.0),
    (ModelTier::FastCheap, 0.0008),
    (ModelTier::Balanced, 0.0030),
    (ModelTier::Powerful, 0.0150),
];

fn tier_cost_estimate(tier: ModelTier) -> f64 {
    TIER_COST_ESTIMATE
        .iter()
        .find(|(t, _)| *t == tier)
        .map(|(_, cost)| *cost)
        .unwrap_or(0.0)
}

/// One line of the audit log: a completed routing decision, successful or
/// not.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub tenant_id: String,
    pub user_id: Option<String>,
    pub department: Department,
    pub task_type: TaskType,
    pub complexity: Complexity,
    pub classified_by: ClassifiedBy,
    pub risk_level: String,
    pub risk_rationale: String,
    pub audit_required: bool,
    pub governance_blocked: bool,
    pub target_tier: ModelTier,
    pub matched_rule: Option<String>,
    pub policy_trace: Vec<PolicyTraceEntry>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub fallback_used: bool,
    pub estimated_cost_usd: f64,
    pub latency_ms: u64,
    pub success: bool,
    pub error: Option<String>,
}

/// Append-only JSONL sink guarded by an async mutex around a single open
/// file handle, mirroring how [`crate::traffic::TrafficLog`] guards its
/// in-memory buffer.
pub struct AuditLogger {
    file: Mutex<File>,
}

impl AuditLogger {
    pub async fn open(path: &str) -> anyhow::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path).await?;
        Ok(Self { file: Mutex::new(file) })
    }

    /// Build a record for a request that routed and completed (successfully
    /// or not).
    #[allow(clippy::too_many_arguments)]
    pub fn build_record(
        &self,
        request_id: Option<&str>,
        tenant_id: &str,
        user_id: Option<&str>,
        department: Department,
        task_type: TaskType,
        complexity: Complexity,
        classified_by: ClassifiedBy,
        risk: &RiskAssessment,
        target_tier: ModelTier,
        matched_rule: Option<&str>,
        policy_trace: &[PolicyTraceEntry],
        provider: Option<&str>,
        model: Option<&str>,
        fallback_used: bool,
        estimated_cost_usd: f64,
        latency_ms: u64,
    ) -> AuditRecord {
        AuditRecord {
            request_id: request_id.map(str::to_string).unwrap_or_else(|| Uuid::new_v4().to_string()),
            timestamp: Utc::now(),
            tenant_id: tenant_id.to_string(),
            user_id: user_id.map(str::to_string),
            department,
            task_type,
            complexity,
            classified_by,
            risk_level: risk.level.as_str().to_string(),
            risk_rationale: risk.rationale.clone(),
            audit_required: risk.audit_required,
            governance_blocked: false,
            target_tier,
            matched_rule: matched_rule.map(str::to_string),
            policy_trace: policy_trace.to_vec(),
            provider: provider.map(str::to_string),
            model: model.map(str::to_string),
            fallback_used,
            estimated_cost_usd,
            latency_ms,
            success: true,
            error: None,
        }
    }

    /// Build a record for a request that never reached a backend (e.g. the
    /// candidate list was exhausted, or governance forbade every candidate).
    #[allow(clippy::too_many_arguments)]
    pub fn build_failure_record(
        &self,
        request_id: Option<&str>,
        tenant_id: &str,
        user_id: Option<&str>,
        department: Department,
        task_type: TaskType,
        complexity: Complexity,
        classified_by: ClassifiedBy,
        risk: &RiskAssessment,
        target_tier: ModelTier,
        matched_rule: Option<&str>,
        policy_trace: &[PolicyTraceEntry],
        governance_blocked: bool,
        error: &str,
        latency_ms: u64,
    ) -> AuditRecord {
        AuditRecord {
            request_id: request_id.map(str::to_string).unwrap_or_else(|| Uuid::new_v4().to_string()),
            timestamp: Utc::now(),
            tenant_id: tenant_id.to_string(),
            user_id: user_id.map(str::to_string),
            department,
            task_type,
            complexity,
            classified_by,
            risk_level: risk.level.as_str().to_string(),
            risk_rationale: risk.rationale.clone(),
            audit_required: risk.audit_required,
            governance_blocked,
            target_tier,
            matched_rule: matched_rule.map(str::to_string),
            policy_trace: policy_trace.to_vec(),
            provider: None,
            model: None,
            fallback_used: false,
            estimated_cost_usd: tier_cost_estimate(target_tier),
            latency_ms,
            success: false,
            error: Some(error.to_string()),
        }
    }

    /// Append `record` as one JSON line. Never returns an error to the
    /// caller — failures are logged and swallowed, since a broken audit sink
    /// must not take down request handling.
    pub async fn log(&self, record: &AuditRecord) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(error) => {
                tracing::error!(%error, "failed to serialize audit record");
                return;
            }
        };

        let mut file = self.file.lock().await;
        if let Err(error) = file.write_all(format!("{line}\n").as_bytes()).await {
            tracing::error!(%error, "failed to write audit record");
        }
    }
}

/// Render a record as the `{"event": "routing_decision", ...}` envelope
/// some consumers (e.g. the admin `/audit/tail` endpoint) expect, without
/// requiring every caller to know that shape.
pub fn envelope(record: &AuditRecord) -> serde_json::Value {
    json!({ "event": "routing_decision", "record": record })
}

pub type SharedAuditLogger = Arc<AuditLogger>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::{RiskAssessment, RiskClassifier};

    fn risk() -> RiskAssessment {
        RiskClassifier::new().assess("please summarize this meeting")
    }

    async fn open_tmp() -> (AuditLogger, std::path::PathBuf) {
        let path = std::env::temp_dir().join(format!("audit-test-{}.jsonl", Uuid::new_v4()));
        let logger = AuditLogger::open(path.to_str().unwrap()).await.unwrap();
        (logger, path)
    }

    #[tokio::test]
    async fn logs_a_successful_record_as_one_json_line() {
        let (logger, path) = open_tmp().await;
        let risk = risk();
        let record = logger.build_record(
            None,
            "acme",
            Some("alice"),
            Department::Rd,
            TaskType::CodeGeneration,
            Complexity::Medium,
            ClassifiedBy::HeuristicFallback,
            &risk,
            ModelTier::FastCheap,
            Some("default-rule"),
            &[],
            Some("anthropic"),
            Some("claude-haiku-4-5-20251001"),
            false,
            0.002,
            120,
        );
        logger.log(&record).await;

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 1);
        let parsed: serde_json::Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(parsed["tenant_id"], "acme");
        assert_eq!(parsed["success"], true);

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn logs_a_failure_record_with_governance_blocked_flag() {
        let (logger, path) = open_tmp().await;
        let risk = risk();
        let record = logger.build_failure_record(
            None,
            "acme",
            None,
            Department::Rd,
            TaskType::General,
            Complexity::Simple,
            ClassifiedBy::HeuristicFallback,
            &risk,
            ModelTier::Local,
            None,
            &[],
            true,
            "no eligible candidate survived governance filtering",
            5,
        );
        assert!(record.governance_blocked);
        assert!(!record.success);
        assert!((record.estimated_cost_usd - 0.0).abs() < f64::EPSILON);

        logger.log(&record).await;
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 1);
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn appends_multiple_records_as_separate_lines() {
        let (logger, path) = open_tmp().await;
        let risk = risk();
        for _ in 0..3 {
            let record = logger.build_record(
                None,
                "acme",
                None,
                Department::Rd,
                TaskType::General,
                Complexity::Simple,
                ClassifiedBy::HeuristicFallback,
                &risk,
                ModelTier::Local,
                None,
                &[],
                Some("ollama"),
                Some("llama3"),
                false,
                0.0,
                10,
            );
            logger.log(&record).await;
        }
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 3);
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[test]
    fn tier_cost_estimate_is_zero_for_local() {
        assert_eq!(tier_cost_estimate(ModelTier::Local), 0.0);
        assert!(tier_cost_estimate(ModelTier::Powerful) > tier_cost_estimate(ModelTier::Balanced));
    }
}
