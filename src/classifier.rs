//! Meta-classification: an LLM call that reads the request and assigns a
//! task type, complexity, and confidence score more accurately than
//! [`crate::analyzer::PreAnalyzer`]'s keyword heuristics can.
//!
//! Calls through the same [`crate::backends::BackendClient`] dispatch as
//! user traffic — no separate SDK client — so the classifier model is just
//! another routable model, resolved through the virtual model catalog like
//! any other. Runs under a hard deadline via a [`CancellationToken`]; a
//! timeout, a malformed response, or a low-confidence result all fall back
//! to the heuristic pre-analysis rather than failing the request. This
//! classifier never errors outward — it always returns a usable
//! [`ClassificationResult`].

use std::sync::OnceLock;
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::analyzer::PreAnalysis;
use crate::backends::BackendClient;
use crate::types::{ClassifiedBy, Complexity, TaskType};

const DEFAULT_SYSTEM_PROMPT: &str = include_str!("../meta_llm_system_prompt.txt");

fn system_prompt() -> &'static str {
    static PROMPT: OnceLock<String> = OnceLock::new();
    PROMPT
        .get_or_init(|| {
            std::env::var("LMG_META_LLM_SYSTEM_PROMPT_PATH")
                .ok()
                .and_then(|path| std::fs::read_to_string(path).ok())
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string())
        })
        .as_str()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub task_type: TaskType,
    pub complexity: Complexity,
    pub confidence: f64,
    pub classified_by: ClassifiedBy,
    pub rationale: String,
    /// A capability the classifier thinks matters (e.g. `"long_context"`,
    /// `"vision"`) — advisory only. It never gates policy matching; it's
    /// surfaced in the audit trail for operators to notice patterns in.
    pub required_capability: Option<String>,
}

/// Shape of the JSON object the meta-LLM is instructed to return.
#[derive(Debug, Deserialize)]
struct RawClassification {
    task_type: String,
    complexity: String,
    confidence: f64,
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    required_capability: Option<String>,
}

pub struct MetaClassifier {
    timeout: Duration,
    confidence_threshold: f64,
}

impl MetaClassifier {
    pub fn new(timeout_ms: u64, confidence_threshold: f64) -> Self {
        Self { timeout: Duration::from_millis(timeout_ms), confidence_threshold }
    }

    /// Classify `text` via `backend`/`model`. Falls back to `pre`
    /// (the heuristic pre-analysis) when the call times out, errors, returns
    /// unparseable JSON, or reports confidence below the configured
    /// threshold.
    pub async fn classify(&self, backend: &BackendClient, model: &str, text: &str, pre: &PreAnalysis) -> ClassificationResult {
        let token = CancellationToken::new();
        let timer_token = token.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            timer_token.cancel();
        });

        let outcome = tokio::select! {
            result = self.call_llm(backend, model, text) => Some(result),
            _ = token.cancelled() => None,
        };

        match outcome {
            Some(Ok(result)) if result.confidence >= self.confidence_threshold => result,
            Some(Ok(result)) => {
                tracing::debug!(confidence = result.confidence, threshold = self.confidence_threshold, "meta-classifier confidence below threshold — using heuristic fallback");
                heuristic_fallback(pre)
            }
            Some(Err(error)) => {
                tracing::warn!(%error, "meta-classifier call failed — using heuristic fallback");
                heuristic_fallback(pre)
            }
            None => {
                tracing::warn!(timeout_ms = self.timeout.as_millis() as u64, "meta-classifier timed out — using heuristic fallback");
                heuristic_fallback(pre)
            }
        }
    }

    async fn call_llm(&self, backend: &BackendClient, model: &str, text: &str) -> anyhow::Result<ClassificationResult> {
        let request = serde_json::json!({
            "model": model,
            "temperature": 0.0,
            "max_tokens": 256,
            "messages": [
                { "role": "system", "content": system_prompt() },
                { "role": "user", "content": text },
            ],
        });

        let response = backend.chat_completions(request).await?;
        let content = response["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("meta-classifier response had no message content"))?;

        parse_classification(content)
    }
}

/// Parse the meta-LLM's JSON reply, stripping a markdown code fence if the
/// model wrapped its output in one (common even under instruction to emit
/// raw JSON).
fn parse_classification(content: &str) -> anyhow::Result<ClassificationResult> {
    let stripped = strip_markdown_fence(content.trim());
    let raw: RawClassification = serde_json::from_str(stripped)
        .map_err(|e| anyhow::anyhow!("parsing meta-classifier JSON: {e} (content: {stripped})"))?;

    let task_type = TaskType::parse(&raw.task_type)
        .ok_or_else(|| anyhow::anyhow!("unknown task_type `{}` from meta-classifier", raw.task_type))?;
    let complexity = Complexity::parse(&raw.complexity)
        .ok_or_else(|| anyhow::anyhow!("unknown complexity `{}` from meta-classifier", raw.complexity))?;

    Ok(ClassificationResult {
        task_type,
        complexity,
        confidence: raw.confidence.clamp(0.0, 1.0),
        classified_by: ClassifiedBy::MetaLlm,
        rationale: raw.rationale,
        required_capability: raw.required_capability,
    })
}

fn strip_markdown_fence(content: &str) -> &str {
    let content = content.strip_prefix("```json").or_else(|| content.strip_prefix("```")).unwrap_or(content);
    content.strip_suffix("```").unwrap_or(content).trim()
}

/// Build a [`ClassificationResult`] from the heuristic pre-analysis, marked
/// as such so downstream consumers know a meta-LLM never weighed in.
pub fn heuristic_fallback(pre: &PreAnalysis) -> ClassificationResult {
    ClassificationResult {
        task_type: pre.task_type,
        complexity: pre.complexity,
        confidence: 1.0,
        classified_by: ClassifiedBy::HeuristicFallback,
        rationale: "heuristic pre-analysis (meta-classifier unavailable or low confidence)".to_string(),
        required_capability: None,
    }
}
