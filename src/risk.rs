//! Risk classification.
//!
//! Independent of task/complexity classification: flags content that must
//! never leave an approved set of providers (PII, credentials, regulated
//! data) regardless of what the cost/quality policy would otherwise pick.
//! This gate runs before budget guardrails and can never be overridden by
//! them — a request at 0% of budget is still blocked from a direct
//! commercial provider if it matches a regulated or high-risk pattern. OSS
//! and local providers are never forbidden by risk alone; they're the
//! fallback of last resort precisely because nothing leaves the building.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::Provider;
use crate::types::ModelTier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Regulated,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Regulated => "regulated",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One category of risk pattern that matched, with the literal terms found
/// (capped at 5 — enough for an audit trail, not enough to leak the whole
/// payload into a log line).
#[derive(Debug, Clone, Serialize)]
pub struct RiskSignal {
    pub category: &'static str,
    pub matched_terms: Vec<String>,
    pub weight: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub rationale: String,
    pub signals: Vec<RiskSignal>,
    pub audit_required: bool,
    /// True for `high`/`regulated` — direct commercial providers (OpenAI,
    /// Anthropic, Gemini called directly) may not serve this request.
    pub direct_commercial_forbidden: bool,
    /// OSS/local providers are never forbidden by risk alone; kept explicit
    /// so policy traces can say so rather than imply it.
    pub oss_forbidden: bool,
    pub required_min_tier: ModelTier,
    pub data_residency_note: String,
}

struct PatternRule {
    pattern: &'static str,
    category: &'static str,
    weight: u8,
}

// Regulated: data classes that must stay inside compliant-cloud or OSS/local
// providers (never direct-commercial). Matched first — highest priority.
static REGULATED_PATTERNS: LazyLock<Vec<(Regex, &'static str, u8)>> = LazyLock::new(|| {
    compile(&[
        PatternRule {
            pattern: r"(?i)\bssn\b|\bsocial security number\b|\bpatient (id|record|chart)\b|\bdiagnosis\b|\bicd-10\b|\bmedical record\b|\bhipaa\b",
            category: "pii_phi",
            weight: 90,
        },
        PatternRule {
            pattern: r"(?i)\bcredit card\b|\bcvv\b|\b\d{4}[- ]\d{4}[- ]\d{4}[- ]\d{4}\b|\biban\b|\brouting number\b|\bpci[- ]dss\b",
            category: "financial_regulated",
            weight: 90,
        },
        PatternRule {
            pattern: r"(?i)\bclassified\b|\bitar\b|\bexport controlled\b|\bprivileged and confidential\b|\battorney[- ]client\b",
            category: "legal_regulated",
            weight: 95,
        },
    ])
});

// High risk: sensitive but not regulated — still forbidden from direct
// commercial providers.
static HIGH_RISK_PATTERNS: LazyLock<Vec<(Regex, &'static str, u8)>> = LazyLock::new(|| {
    compile(&[
        PatternRule {
            pattern: r"(?i)\bnda\b|\bnon-disclosure\b|\bcontract draft\b|\bterm sheet\b|\bindemnif",
            category: "legal_contract",
            weight: 60,
        },
        PatternRule {
            pattern: r"(?i)\bmerger\b|\bacquisition\b|\binsider\b|\bnon-public\b|\bmaterial non-public\b|\bearnings (call|release)\b",
            category: "financial_sensitive",
            weight: 65,
        },
        PatternRule {
            pattern: r"(?i)\bboard (minutes|deck)\b|\bexec(utive)? (summary|comms)\b|\bceo\b|\bc-suite\b",
            category: "executive_comms",
            weight: 55,
        },
        PatternRule {
            pattern: r"(?i)\bapi[_ ]?key\b|\bsecret[_ ]?key\b|\bprivate[_ ]?key\b|\bpassword\b|\baccess token\b",
            category: "security_sensitive",
            weight: 70,
        },
    ])
});

// Medium risk: informational flag only, does not restrict provider
// eligibility but is still surfaced in the audit trail and data residency
// note.
static MEDIUM_RISK_PATTERNS: LazyLock<Vec<(Regex, &'static str, u8)>> = LazyLock::new(|| {
    compile(&[
        PatternRule {
            pattern: r"(?i)\bemail address\b|\bphone number\b|\bhome address\b|\bcustomer record\b|\baccount number\b",
            category: "customer_data",
            weight: 30,
        },
        PatternRule {
            pattern: r"(?i)\binternal only\b|\bdo not distribute\b|\bconfidential\b|\broadmap\b|\bunreleased\b",
            category: "business_sensitive",
            weight: 25,
        },
        PatternRule {
            pattern: r"(?i)\bforward(ed|ing)? (to|from) (a )?client\b|\bexternal (partner|vendor)\b|\bcc:.*@",
            category: "external_comms",
            weight: 20,
        },
    ])
});

fn compile(rules: &[PatternRule]) -> Vec<(Regex, &'static str, u8)> {
    rules
        .iter()
        .map(|r| (Regex::new(r.pattern).expect("risk pattern is valid regex"), r.category, r.weight))
        .collect()
}

pub struct RiskClassifier;

impl Default for RiskLevel {
    fn default() -> Self {
        Self::Low
    }
}

impl RiskAssessment {
    /// Build a synthetic assessment carrying no signals, for callers (e.g.
    /// `POST /admin/simulate`) that supply a risk level directly instead of
    /// deriving one from message text.
    pub fn from_level(level: RiskLevel) -> Self {
        let direct_commercial_forbidden = matches!(level, RiskLevel::High | RiskLevel::Regulated);
        let audit_required = direct_commercial_forbidden;
        let required_min_tier = match level {
            RiskLevel::High | RiskLevel::Regulated => ModelTier::Balanced,
            RiskLevel::Medium | RiskLevel::Low => ModelTier::FastCheap,
        };
        let data_residency_note = match level {
            RiskLevel::Regulated => {
                "regulated data detected — restricted to compliant-cloud or OSS/local providers, direct commercial is forbidden".to_string()
            }
            RiskLevel::High => {
                "sensitive content detected — restricted to compliant-cloud or OSS/local providers, direct commercial is forbidden".to_string()
            }
            RiskLevel::Medium => "informational risk flag only — no provider restriction".to_string(),
            RiskLevel::Low => "no data residency restriction".to_string(),
        };

        Self {
            level,
            rationale: "simulated".to_string(),
            signals: Vec::new(),
            audit_required,
            direct_commercial_forbidden,
            oss_forbidden: false,
            required_min_tier,
            data_residency_note,
        }
    }
}

impl RiskClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify free text against the pattern tables. Every category that
    /// matches anywhere in the text contributes a signal; the overall level
    /// is the highest-priority group with at least one signal
    /// (regulated > high > medium > low).
    pub fn assess(&self, text: &str) -> RiskAssessment {
        let regulated = collect_signals(&REGULATED_PATTERNS, text);
        let high = collect_signals(&HIGH_RISK_PATTERNS, text);
        let medium = collect_signals(&MEDIUM_RISK_PATTERNS, text);

        let (level, signals) = if !regulated.is_empty() {
            (RiskLevel::Regulated, regulated)
        } else if !high.is_empty() {
            (RiskLevel::High, high)
        } else if !medium.is_empty() {
            (RiskLevel::Medium, medium)
        } else {
            (RiskLevel::Low, Vec::new())
        };

        let rationale = if signals.is_empty() {
            "no risk signals detected".to_string()
        } else {
            signals.iter().map(|s| s.category).collect::<Vec<_>>().join(", ")
        };

        let direct_commercial_forbidden = matches!(level, RiskLevel::High | RiskLevel::Regulated);
        let audit_required = matches!(level, RiskLevel::High | RiskLevel::Regulated);
        let required_min_tier = match level {
            RiskLevel::High | RiskLevel::Regulated => ModelTier::Balanced,
            RiskLevel::Medium | RiskLevel::Low => ModelTier::FastCheap,
        };
        let data_residency_note = match level {
            RiskLevel::Regulated => {
                "regulated data detected — restricted to compliant-cloud or OSS/local providers, direct commercial is forbidden".to_string()
            }
            RiskLevel::High => {
                "sensitive content detected — restricted to compliant-cloud or OSS/local providers, direct commercial is forbidden".to_string()
            }
            RiskLevel::Medium => "informational risk flag only — no provider restriction".to_string(),
            RiskLevel::Low => "no data residency restriction".to_string(),
        };

        RiskAssessment {
            level,
            rationale,
            signals,
            audit_required,
            direct_commercial_forbidden,
            oss_forbidden: false,
            required_min_tier,
            data_residency_note,
        }
    }

    /// Whether `provider` may legally serve a request at `level`.
    ///
    /// - `regulated`/`high` → compliant_cloud or OSS/local only, never direct commercial.
    /// - `medium`/`low` → any provider.
    pub fn is_provider_allowed(level: RiskLevel, provider: Provider) -> bool {
        match level {
            RiskLevel::Regulated | RiskLevel::High => provider.is_compliant_cloud() || provider.is_oss(),
            RiskLevel::Medium | RiskLevel::Low => true,
        }
    }
}

impl Default for RiskClassifier {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_signals(table: &[(Regex, &'static str, u8)], text: &str) -> Vec<RiskSignal> {
    table
        .iter()
        .filter_map(|(re, category, weight)| {
            let matched_terms: Vec<String> = re
                .find_iter(text)
                .map(|m| m.as_str().to_string())
                .take(5)
                .collect();
            if matched_terms.is_empty() {
                None
            } else {
                Some(RiskSignal { category, matched_terms, weight: *weight })
            }
        })
        .collect()
}
