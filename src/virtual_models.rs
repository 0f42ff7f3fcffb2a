//! Virtual model registry.
//!
//! Clients may address a model by a stable `rb://` virtual id instead of a
//! concrete `provider/model` pair. This lets operators repoint "the cheap
//! model" or "the powerful model" at a new vendor without any client-side
//! change. Virtual ids are loaded from a YAML catalog and resolved to a
//! concrete `(provider, model)` pair at routing time.

use std::{collections::HashMap, path::Path};

use serde::{Deserialize, Serialize};

use crate::config::Provider;

/// Prefix identifying a virtual model reference, e.g. `rb://fast-cheap`.
pub const VIRTUAL_PREFIX: &str = "rb://";

/// A concrete model resolved from either a virtual id or a plain model string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedModel {
    pub model: String,
    pub provider: Provider,
}

#[derive(Debug, Clone, Deserialize)]
struct VirtualModelEntry {
    model: String,
    provider: String,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    virtual_models: HashMap<String, VirtualModelEntry>,
}

/// Loads and resolves the `virtual_models:` catalog from a YAML file.
///
/// Hot-reloadable the same way as [`crate::policy::PolicyEngine`]: `reload()`
/// re-parses the file and the caller swaps the `Arc` behind a lock.
pub struct VirtualModelRegistry {
    entries: HashMap<String, ResolvedModel>,
}

impl VirtualModelRegistry {
    /// Load the catalog from disk. A missing file yields an empty (but
    /// valid) registry — every lookup then falls through to prefix inference.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "virtual models catalog missing — continuing with no entries");
            return Ok(Self { entries: HashMap::new() });
        }

        let content = std::fs::read_to_string(path)?;
        let catalog: CatalogFile = serde_yaml::from_str(&content)?;

        let mut entries = HashMap::with_capacity(catalog.virtual_models.len());
        for (id, entry) in catalog.virtual_models {
            let Some(provider) = Provider::parse(&entry.provider) else {
                tracing::warn!(id = %id, provider = %entry.provider, "unknown provider in virtual model catalog — skipping");
                continue;
            };
            entries.insert(id, ResolvedModel { model: entry.model, provider });
        }

        tracing::info!(count = entries.len(), "virtual model catalog loaded");
        Ok(Self { entries })
    }

    /// True if `id` uses the `rb://` scheme.
    pub fn is_virtual(id: &str) -> bool {
        id.starts_with(VIRTUAL_PREFIX)
    }

    /// Resolve a model string to a concrete `(model, provider)` pair.
    ///
    /// - `rb://...` ids are looked up in the catalog; a miss falls back to
    ///   the safe default (`claude-haiku-4-5-20251001`/`anthropic`).
    /// - Any other string is assumed to already be a concrete model id and
    ///   its provider is inferred from well-known name prefixes.
    pub fn resolve(&self, id: &str) -> ResolvedModel {
        if Self::is_virtual(id) {
            return self.entries.get(id).cloned().unwrap_or_else(|| {
                tracing::warn!(id, "unknown virtual model id — using safe default");
                ResolvedModel {
                    model: "claude-haiku-4-5-20251001".into(),
                    provider: Provider::Anthropic,
                }
            });
        }

        ResolvedModel { model: id.to_string(), provider: infer_provider(id) }
    }

    /// Resolve a list of model/virtual ids, preserving order and dropping
    /// nothing — callers use this to build a fallback candidate chain.
    pub fn resolve_list(&self, ids: &[String]) -> Vec<ResolvedModel> {
        ids.iter().map(|id| self.resolve(id)).collect()
    }

    pub fn get_all(&self) -> impl Iterator<Item = (&str, &ResolvedModel)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl Clone for ResolvedModel {
    fn clone(&self) -> Self {
        Self { model: self.model.clone(), provider: self.provider }
    }
}

/// Infer a provider from a bare model name, e.g. for fallback-chain filtering
/// or when a client sends a concrete model id directly.
pub fn infer_provider(model: &str) -> Provider {
    let lower = model.to_lowercase();
    if lower.starts_with("claude") {
        Provider::Anthropic
    } else if lower.starts_with("gpt") || lower.starts_with("o1") || lower.starts_with("o3") {
        Provider::OpenAI
    } else if lower.starts_with("gemini") {
        Provider::Gemini
    } else if ["llama", "codellama", "deepseek", "mistral", "phi"]
        .iter()
        .any(|oss| lower.contains(oss))
    {
        Provider::Ollama
    } else {
        Provider::OpenAI
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(id: &str, model: &str, provider: &str) -> VirtualModelRegistry {
        let mut entries = HashMap::new();
        entries.insert(
            id.to_string(),
            ResolvedModel { model: model.to_string(), provider: Provider::parse(provider).unwrap() },
        );
        VirtualModelRegistry { entries }
    }

    #[test]
    fn resolves_known_virtual_id() {
        let reg = registry_with("rb://fast-cheap", "gpt-4o-mini", "openai");
        let resolved = reg.resolve("rb://fast-cheap");
        assert_eq!(resolved.model, "gpt-4o-mini");
        assert_eq!(resolved.provider, Provider::OpenAI);
    }

    #[test]
    fn unknown_virtual_id_falls_back_to_safe_default() {
        let reg = VirtualModelRegistry { entries: HashMap::new() };
        let resolved = reg.resolve("rb://does-not-exist");
        assert_eq!(resolved.model, "claude-haiku-4-5-20251001");
        assert_eq!(resolved.provider, Provider::Anthropic);
    }

    #[test]
    fn plain_model_id_infers_provider_by_prefix() {
        let reg = VirtualModelRegistry { entries: HashMap::new() };
        assert_eq!(reg.resolve("gpt-4o").provider, Provider::OpenAI);
        assert_eq!(reg.resolve("claude-sonnet-4-5").provider, Provider::Anthropic);
        assert_eq!(reg.resolve("gemini-2.0-flash").provider, Provider::Gemini);
        assert_eq!(reg.resolve("o1-preview").provider, Provider::OpenAI);
        assert_eq!(reg.resolve("codellama:13b").provider, Provider::Ollama);
    }

    #[test]
    fn is_virtual_detects_scheme() {
        assert!(VirtualModelRegistry::is_virtual("rb://fast-cheap"));
        assert!(!VirtualModelRegistry::is_virtual("gpt-4o"));
    }

    #[test]
    fn resolve_list_preserves_order() {
        let reg = registry_with("rb://a", "model-a", "openai");
        let resolved = reg.resolve_list(&["rb://a".into(), "gpt-4o".into(), "claude-sonnet-4-5".into()]);
        assert_eq!(resolved.len(), 3);
        assert_eq!(resolved[0].model, "model-a");
        assert_eq!(resolved[1].provider, Provider::OpenAI);
        assert_eq!(resolved[2].provider, Provider::Anthropic);
    }
}
