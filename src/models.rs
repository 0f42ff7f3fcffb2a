//! Model pricing catalog.
//!
//! Loaded from the same YAML file as the virtual model catalog
//! ([`crate::virtual_models`]) — a `models:` list alongside its
//! `virtual_models:` map — so an operator maintains both in one place.
//! [`crate::budget::BudgetTracker`] uses this to turn a token count into a
//! dollar estimate; a model with no catalog entry falls back to a
//! conservative per-tier estimate rather than refusing to track spend.

use std::{collections::HashMap, path::Path};

use serde::Deserialize;

use crate::config::Provider;
use crate::types::ModelTier;

/// Rough per-tier cost estimate (USD per million tokens, blended input+output)
/// used when a model has no catalog entry. Deliberately conservative — an
/// overestimate trips the budget guardrail a little early, an underestimate
/// lets real spend run past the configured cap.
const TIER_FALLBACK_PRICE_PER_MTOK: [(ModelTier, f64); 4] = [
    (ModelTier::FastCheap, 0.80),
    (ModelTier::Balanced, 3.00),
    (ModelTier::Powerful, 15.00),
    (ModelTier::Local, 0.0),
];

pub fn tier_fallback_price_per_mtok(tier: ModelTier) -> f64 {
    TIER_FALLBACK_PRICE_PER_MTOK
        .iter()
        .find(|(t, _)| *t == tier)
        .map(|(_, price)| *price)
        .unwrap_or(0.0)
}

#[derive(Debug, Clone)]
pub struct ModelPricing {
    pub model: String,
    pub provider: Provider,
    pub input_price_per_mtok: f64,
    pub output_price_per_mtok: f64,
    pub tier: ModelTier,
}

impl ModelPricing {
    /// Estimate cost in USD for `input_tokens` + `output_tokens`.
    pub fn estimate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let input = input_tokens as f64 / 1_000_000.0 * self.input_price_per_mtok;
        let output = output_tokens as f64 / 1_000_000.0 * self.output_price_per_mtok;
        input + output
    }
}

#[derive(Debug, Deserialize)]
struct ModelPricingEntry {
    model: String,
    provider: String,
    #[serde(default)]
    input_price_per_mtok: f64,
    #[serde(default)]
    output_price_per_mtok: f64,
    tier: String,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    models: Vec<ModelPricingEntry>,
}

/// Catalog of per-model pricing, keyed by `(model, provider)` since the same
/// model name can in principle be served through more than one provider
/// (e.g. an OSS model mirrored on both Ollama and vLLM).
pub struct ModelCatalog {
    entries: HashMap<(String, Provider), ModelPricing>,
}

impl ModelCatalog {
    /// Load `models:` entries from the same YAML file the virtual model
    /// catalog lives in. A missing file yields an empty (but valid) catalog
    /// — every lookup then falls through to the per-tier estimate.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "model pricing catalog missing — falling back to per-tier estimates");
            return Ok(Self { entries: HashMap::new() });
        }

        let content = std::fs::read_to_string(path)?;
        let catalog: CatalogFile = serde_yaml::from_str(&content)?;

        let mut entries = HashMap::with_capacity(catalog.models.len());
        for entry in catalog.models {
            let Some(provider) = Provider::parse(&entry.provider) else {
                tracing::warn!(model = %entry.model, provider = %entry.provider, "unknown provider in model pricing catalog — skipping");
                continue;
            };
            let Some(tier) = ModelTier::parse(&entry.tier) else {
                tracing::warn!(model = %entry.model, tier = %entry.tier, "unknown tier in model pricing catalog — skipping");
                continue;
            };
            entries.insert(
                (entry.model.clone(), provider),
                ModelPricing {
                    model: entry.model,
                    provider,
                    input_price_per_mtok: entry.input_price_per_mtok,
                    output_price_per_mtok: entry.output_price_per_mtok,
                    tier,
                },
            );
        }

        tracing::info!(count = entries.len(), "model pricing catalog loaded");
        Ok(Self { entries })
    }

    pub fn lookup(&self, model: &str, provider: Provider) -> Option<&ModelPricing> {
        self.entries.get(&(model.to_string(), provider))
    }

    /// Every `(model, provider)` pair with a priced catalog entry — used by
    /// `GET /v1/models` to list concretely-priced models alongside the
    /// virtual model catalog.
    pub fn known_models(&self) -> impl Iterator<Item = (&str, Provider)> {
        self.entries.keys().map(|(model, provider)| (model.as_str(), *provider))
    }

    /// Estimate cost for a model, falling back to the per-tier estimate
    /// (keyed by `fallback_tier`, usually the tier the policy rule matched
    /// on) when the model has no catalog entry.
    pub fn estimate_cost(
        &self,
        model: &str,
        provider: Provider,
        fallback_tier: ModelTier,
        input_tokens: u64,
        output_tokens: u64,
    ) -> f64 {
        match self.lookup(model, provider) {
            Some(pricing) => pricing.estimate_cost(input_tokens, output_tokens),
            None => {
                let price = tier_fallback_price_per_mtok(fallback_tier);
                (input_tokens + output_tokens) as f64 / 1_000_000.0 * price
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog_with(model: &str, provider: Provider, tier: ModelTier, in_price: f64, out_price: f64) -> ModelCatalog {
        let mut entries = HashMap::new();
        entries.insert(
            (model.to_string(), provider),
            ModelPricing {
                model: model.to_string(),
                provider,
                input_price_per_mtok: in_price,
                output_price_per_mtok: out_price,
                tier,
            },
        );
        ModelCatalog { entries }
    }

    #[test]
    fn estimate_cost_uses_catalog_entry_when_present() {
        let catalog = catalog_with("gpt-4o-mini", Provider::OpenAI, ModelTier::FastCheap, 0.15, 0.60);
        let cost = catalog.estimate_cost("gpt-4o-mini", Provider::OpenAI, ModelTier::FastCheap, 1_000_000, 1_000_000);
        assert!((cost - 0.75).abs() < 1e-9);
    }

    #[test]
    fn estimate_cost_falls_back_to_tier_price_for_unknown_model() {
        let catalog = ModelCatalog { entries: HashMap::new() };
        let cost = catalog.estimate_cost("some-unlisted-model", Provider::OpenAI, ModelTier::Powerful, 1_000_000, 0);
        assert!((cost - 15.00).abs() < 1e-9);
    }

    #[test]
    fn local_tier_fallback_is_free() {
        assert_eq!(tier_fallback_price_per_mtok(ModelTier::Local), 0.0);
    }

    #[test]
    fn lookup_is_scoped_by_provider() {
        let catalog = catalog_with("llama3.1:8b", Provider::Ollama, ModelTier::Local, 0.0, 0.0);
        assert!(catalog.lookup("llama3.1:8b", Provider::Ollama).is_some());
        assert!(catalog.lookup("llama3.1:8b", Provider::VLlm).is_none());
    }
}
