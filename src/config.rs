//! Gateway configuration types.
//!
//! Config is loaded once at startup from a TOML file and validated before the
//! server opens any ports. Invalid configs are rejected with a clear error
//! rather than silently falling back to defaults. Routing policies and the
//! virtual model catalog live in separate YAML files (see [`crate::policy`]
//! and [`crate::models`]) because they're directory-of-files and hot-reloaded
//! independently of this top-level config.
//!
//! # Example
//! ```toml
//! [gateway]
//! client_port = 8080
//! policies_dir = "/etc/routing-gateway/policies"
//! models_config_path = "/etc/routing-gateway/models.yaml"
//! redis_url = "redis://127.0.0.1:6379"
//!
//! [backends.ollama]
//! base_url = "http://localhost:11434"
//! provider = "ollama"
//! ```

use std::{collections::HashMap, path::Path};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::types::Department;

/// Which wire protocol / vendor a backend speaks.
///
/// The gateway normalises all client traffic to OpenAI's chat-completions
/// schema; each [`Provider`] variant maps to an adapter that handles any
/// necessary request/response translation at the edge. Variants mirror the
/// three provider classes used by risk classification: direct commercial
/// (`Anthropic`, `OpenAI`, `Gemini`), compliant cloud (`Bedrock`, `Azure`),
/// and self-hosted/OSS (`Ollama`, `VLlm`).
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    #[default]
    OpenAI,
    Anthropic,
    Gemini,
    Bedrock,
    Azure,
    Ollama,
    VLlm,
}

impl Provider {
    /// Canonical lowercase name, matching the strings used in YAML policy
    /// files, `rb://` virtual model entries, and audit records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::Bedrock => "bedrock",
            Self::Azure => "azure",
            Self::Ollama => "ollama",
            Self::VLlm => "vllm",
        }
    }

    /// Parse a provider name as used in policy/virtual-model YAML. Unknown
    /// names are not an error here — callers decide how to handle them.
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "openai" => Self::OpenAI,
            "anthropic" => Self::Anthropic,
            "gemini" => Self::Gemini,
            "bedrock" => Self::Bedrock,
            "azure" => Self::Azure,
            "ollama" => Self::Ollama,
            "vllm" => Self::VLlm,
            _ => return None,
        })
    }

    /// True for providers that never send content outside the operator's
    /// own infrastructure.
    pub fn is_oss(&self) -> bool {
        matches!(self, Self::Ollama | Self::VLlm)
    }

    /// True for direct commercial SaaS APIs (Anthropic/OpenAI/Gemini).
    pub fn is_direct_commercial(&self) -> bool {
        matches!(self, Self::Anthropic | Self::OpenAI | Self::Gemini)
    }

    /// True for compliant cloud deployments (Bedrock/Azure) that carry
    /// contractual data-handling guarantees direct commercial APIs don't.
    pub fn is_compliant_cloud(&self) -> bool {
        matches!(self, Self::Bedrock | Self::Azure)
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub gateway: GatewayConfig,

    /// Named backends (Ollama, OpenAI, Anthropic, Gemini, Bedrock, Azure, vLLM).
    #[serde(default)]
    pub backends: HashMap<String, BackendConfig>,

    /// Client API keys and the tenant/department identity they carry.
    /// Empty means client authentication is disabled (any caller is
    /// admitted as the `general` department, untracked tenant).
    #[serde(default)]
    pub clients: Vec<ClientKeyConfig>,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: Self = toml::from_str(&content).context("parsing config TOML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.gateway.client_port != self.gateway.admin_port,
            "client_port and admin_port must differ"
        );
        for (name, backend) in &self.backends {
            anyhow::ensure!(
                !backend.base_url.is_empty(),
                "backend `{name}` has an empty base_url"
            );
        }
        Ok(())
    }

    /// Resolve a backend by the canonical provider it's configured for.
    /// Returns the first matching entry — most deployments have exactly one
    /// backend per provider.
    pub fn backend_for(&self, provider: Provider) -> Option<(&str, &BackendConfig)> {
        self.backends
            .iter()
            .find(|(_, b)| b.provider == provider)
            .map(|(name, b)| (name.as_str(), b))
    }

    /// Resolve the caller's identity for a bearer token. `None` when client
    /// auth is configured (`clients` non-empty) but the token doesn't match
    /// any entry — callers treat that as a 401, not a fallback identity.
    pub fn client_for_key(&self, api_key: &str) -> Option<&ClientKeyConfig> {
        self.clients.iter().find(|c| c.api_key == api_key)
    }
}

/// Core gateway settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Port for the client-facing `/v1/chat/completions` API (default: 8080).
    #[serde(default = "defaults::client_port")]
    pub client_port: u16,

    /// Port for the read-mostly admin API (default: 8081).
    #[serde(default = "defaults::admin_port")]
    pub admin_port: u16,

    /// Number of recent requests to keep in the in-memory traffic log (default: 500).
    #[serde(default = "defaults::traffic_log_capacity")]
    pub traffic_log_capacity: usize,

    /// Log level override (also controlled by `RUST_LOG` env var).
    #[serde(default)]
    pub log_level: Option<String>,

    /// Maximum requests per minute per client IP on the client port.
    /// Leave unset (or 0) to disable rate limiting.
    #[serde(default)]
    pub rate_limit_rpm: Option<u32>,

    /// Environment variable whose value is the Bearer token required for all
    /// admin API requests. Leave unset to disable admin authentication.
    #[serde(default)]
    pub admin_token_env: Option<String>,

    /// Directory of `*.yaml` routing policy files (see [`crate::policy`]).
    #[serde(default = "defaults::policies_dir")]
    pub policies_dir: String,

    /// Path to the virtual model catalog (see [`crate::models`]).
    #[serde(default = "defaults::models_config_path")]
    pub models_config_path: String,

    /// Path to the append-only audit log (see [`crate::audit`]).
    #[serde(default = "defaults::audit_log_path")]
    pub audit_log_path: String,

    /// Redis connection string for [`crate::budget::BudgetTracker`]. Leave
    /// unset to run with budget tracking disabled (guardrails always see 0%).
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Virtual model id (or concrete `provider/model`) used for meta-classification.
    #[serde(default = "defaults::classifier_model")]
    pub classifier_model: String,

    /// Deadline for the meta-classifier call, in milliseconds (default 3000).
    #[serde(default = "defaults::classifier_timeout_ms")]
    pub classifier_timeout_ms: u64,

    /// Minimum confidence the meta-classifier must report before its result
    /// is trusted over the heuristic pre-analysis (default 0.6).
    #[serde(default = "defaults::classifier_confidence_threshold")]
    pub classifier_confidence_threshold: f64,

    /// Model id used when no policy applies and every candidate has been
    /// exhausted (default: `claude-haiku-4-5-20251001`).
    #[serde(default = "defaults::emergency_fallback_model")]
    pub emergency_fallback_model: String,

    /// Provider for `emergency_fallback_model` (default: `anthropic`).
    #[serde(default)]
    pub emergency_fallback_provider: Provider,

    /// OSS provider substituted for the emergency fallback when the current
    /// risk assessment forbids commercial providers (default: `ollama`).
    #[serde(default = "defaults::emergency_fallback_oss_provider")]
    pub emergency_fallback_oss_provider: Provider,

    /// Model id to use with `emergency_fallback_oss_provider`.
    #[serde(default = "defaults::emergency_fallback_oss_model")]
    pub emergency_fallback_oss_model: String,
}

/// A named backend (OpenAI, Anthropic, Gemini, Bedrock, Azure, Ollama, vLLM).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Base URL — must end without a trailing `/v1` (added by the adapter).
    pub base_url: String,

    /// Environment variable name whose value is the API key.
    /// Leave unset for keyless local backends (e.g., Ollama, vLLM).
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Request timeout in milliseconds (default: 30 000).
    #[serde(default = "defaults::timeout_ms")]
    pub timeout_ms: u64,

    /// Protocol adapter to use when talking to this backend.
    #[serde(default)]
    pub provider: Provider,

    /// Azure-only: deployment/resource name used to build the request path.
    #[serde(default)]
    pub azure_deployment: Option<String>,

    /// Bedrock-only: AWS region (e.g. `us-east-1`).
    #[serde(default)]
    pub aws_region: Option<String>,
}

/// A single tenant/user identity admitted by an API key.
///
/// Mirrors the original gateway's `valid_api_keys` / `api_key_metadata`
/// pair, flattened into one TOML table per key for readability. Department
/// allow-lists let an operator pin a key to specific departments even when
/// the key's home department would otherwise qualify it for more.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientKeyConfig {
    pub api_key: String,
    pub tenant_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub department: Department,
    /// Departments this key may route requests as. Empty means "only its
    /// own `department`".
    #[serde(default)]
    pub allowed_departments: Vec<Department>,
}

impl ClientKeyConfig {
    /// True when `department` is this key's home department or explicitly
    /// allow-listed.
    pub fn permits(&self, department: Department) -> bool {
        department == self.department || self.allowed_departments.contains(&department)
    }
}

impl BackendConfig {
    /// Resolve the API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
    }
}

mod defaults {
    use super::Provider;

    pub fn client_port() -> u16 { 8080 }
    pub fn admin_port() -> u16 { 8081 }
    pub fn traffic_log_capacity() -> usize { 500 }
    pub fn timeout_ms() -> u64 { 30_000 }
    pub fn policies_dir() -> String { "/etc/routing-gateway/policies".into() }
    pub fn models_config_path() -> String { "/etc/routing-gateway/models.yaml".into() }
    pub fn audit_log_path() -> String { "logs/audit.jsonl".into() }
    pub fn classifier_model() -> String { "claude-haiku-4-5-20251001".into() }
    pub fn classifier_timeout_ms() -> u64 { 3_000 }
    pub fn classifier_confidence_threshold() -> f64 { 0.6 }
    pub fn emergency_fallback_model() -> String { "claude-haiku-4-5-20251001".into() }
    pub fn emergency_fallback_oss_provider() -> Provider { Provider::Ollama }
    pub fn emergency_fallback_oss_model() -> String { "llama3.1:8b".into() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> Config {
        toml::from_str(
            r#"
            [gateway]
            client_port = 8080
            admin_port  = 8081

            [backends.ollama]
            base_url = "http://localhost:11434"
            provider = "ollama"

            [backends.anthropic]
            base_url = "https://api.anthropic.com"
            provider = "anthropic"
            api_key_env = "ANTHROPIC_API_KEY"
            "#,
        )
        .expect("minimal config should parse")
    }

    #[test]
    fn parse_example_config() {
        let content = include_str!("../config.example.toml");
        let config: Config = toml::from_str(content).expect("example config should parse");
        config.validate().expect("example config should be valid");
    }

    #[test]
    fn validation_rejects_same_client_and_admin_port() {
        let mut config = minimal_config();
        config.gateway.admin_port = config.gateway.client_port;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_backend_with_empty_base_url() {
        let mut config = minimal_config();
        config.backends.insert(
            "broken".into(),
            BackendConfig {
                base_url: "".into(),
                api_key_env: None,
                timeout_ms: 1_000,
                provider: Provider::OpenAI,
                azure_deployment: None,
                aws_region: None,
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn backend_for_finds_matching_provider() {
        let config = minimal_config();
        let (name, backend) = config.backend_for(Provider::Ollama).expect("ollama configured");
        assert_eq!(name, "ollama");
        assert_eq!(backend.provider, Provider::Ollama);
    }

    #[test]
    fn backend_for_returns_none_for_unconfigured_provider() {
        let config = minimal_config();
        assert!(config.backend_for(Provider::Bedrock).is_none());
    }

    #[test]
    fn gateway_defaults_are_applied_when_section_is_minimal() {
        let config: Config = toml::from_str(
            r#"
            [gateway]
            client_port = 9000
            admin_port  = 9001
            "#,
        )
        .expect("should parse");
        assert_eq!(config.gateway.traffic_log_capacity, 500);
        assert_eq!(config.gateway.classifier_timeout_ms, 3_000);
        assert!((config.gateway.classifier_confidence_threshold - 0.6).abs() < f64::EPSILON);
        assert_eq!(config.gateway.emergency_fallback_model, "claude-haiku-4-5-20251001");
        assert_eq!(config.gateway.emergency_fallback_provider, Provider::Anthropic);
    }

    #[test]
    fn client_for_key_resolves_tenant_identity() {
        let mut config = minimal_config();
        config.clients.push(ClientKeyConfig {
            api_key: "sk-rd-1".into(),
            tenant_id: "acme".into(),
            user_id: Some("alice".into()),
            department: Department::Rd,
            allowed_departments: vec![],
        });
        let client = config.client_for_key("sk-rd-1").expect("key should resolve");
        assert_eq!(client.tenant_id, "acme");
        assert!(client.permits(Department::Rd));
        assert!(!client.permits(Department::Finance));
        assert!(config.client_for_key("sk-unknown").is_none());
    }

    #[test]
    fn provider_classification_sets_are_disjoint() {
        let all = [
            Provider::OpenAI,
            Provider::Anthropic,
            Provider::Gemini,
            Provider::Bedrock,
            Provider::Azure,
            Provider::Ollama,
            Provider::VLlm,
        ];
        for p in all {
            let flags = [p.is_oss(), p.is_direct_commercial(), p.is_compliant_cloud()];
            assert_eq!(flags.iter().filter(|f| **f).count(), 1, "{p} must be in exactly one class");
        }
    }
}
