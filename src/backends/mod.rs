//! Backend client factory and unified dispatch interface.
//!
//! [`BackendClient`] is an enum that wraps a concrete provider adapter chosen
//! at construction time from [`BackendConfig::provider`]. All routing code
//! interacts with the same three-method API (`chat_completions`,
//! `chat_completions_stream`, `health_check`); adapter-specific protocol
//! differences — schema translation, auth headers, endpoint paths — are
//! fully encapsulated in the adapter modules.

mod anthropic;
mod azure;
mod bedrock;
mod gemini;
mod ollama;
mod openai;

pub use anthropic::AnthropicAdapter;
pub use azure::AzureAdapter;
pub use bedrock::BedrockAdapter;
pub use gemini::GeminiAdapter;
pub use ollama::OllamaAdapter;
pub use openai::OpenAIAdapter;

use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;
use serde_json::Value;

use crate::config::{BackendConfig, Provider};

/// A `Send`-able, heap-allocated SSE byte stream.
///
/// Each item is either a chunk of raw SSE data (already in OpenAI wire format)
/// or an error. The stream terminates when all data has been yielded.
pub type SseStream = Pin<Box<dyn Stream<Item = anyhow::Result<Bytes>> + Send>>;

/// Unified backend client — enum dispatch over concrete provider adapters.
///
/// Constructed via [`BackendClient::new`] from a [`BackendConfig`]. All callers
/// see a single API; the correct adapter is selected once at construction time.
pub enum BackendClient {
    /// OpenAI-compatible passthrough, also reused verbatim for vLLM (vLLM
    /// serves the same `/v1/chat/completions` shape).
    OpenAI(OpenAIAdapter),
    /// Anthropic Messages API with request/response translation.
    Anthropic(AnthropicAdapter),
    /// Ollama local inference server (OpenAI-compat endpoint).
    Ollama(OllamaAdapter),
    /// Gemini `generateContent` API with request/response translation.
    Gemini(GeminiAdapter),
    /// Bedrock Converse API with request/response translation.
    Bedrock(BedrockAdapter),
    /// Azure OpenAI — OpenAI schema, Azure-shaped URL and auth header.
    Azure(AzureAdapter),
}

impl BackendClient {
    /// Build a backend client from config, resolving any API key from the environment.
    ///
    /// # Errors
    /// Returns an error if a provider that always requires a key (Anthropic,
    /// Gemini, Azure) has no key resolvable from `api_key_env`, or if Azure
    /// is configured without `azure_deployment`.
    pub fn new(cfg: &BackendConfig) -> anyhow::Result<Self> {
        let base_url = cfg.base_url.trim_end_matches('/').to_string();
        let api_key = cfg.api_key();

        Ok(match cfg.provider {
            Provider::OpenAI | Provider::VLlm => {
                Self::OpenAI(OpenAIAdapter::new(base_url, cfg.timeout_ms, api_key))
            }
            Provider::Ollama => Self::Ollama(OllamaAdapter::new(base_url, cfg.timeout_ms)),
            Provider::Anthropic => {
                let key = require_api_key(cfg, "Anthropic")?;
                Self::Anthropic(AnthropicAdapter::new(base_url, cfg.timeout_ms, key))
            }
            Provider::Gemini => {
                let key = require_api_key(cfg, "Gemini")?;
                Self::Gemini(GeminiAdapter::new(base_url, cfg.timeout_ms, key))
            }
            Provider::Bedrock => Self::Bedrock(BedrockAdapter::new(base_url, cfg.timeout_ms, api_key)),
            Provider::Azure => {
                let key = require_api_key(cfg, "Azure")?;
                let deployment = cfg.azure_deployment.clone().ok_or_else(|| {
                    anyhow::anyhow!("Azure backend requires `azure_deployment` to be set")
                })?;
                Self::Azure(AzureAdapter::new(base_url, cfg.timeout_ms, key, deployment))
            }
        })
    }

    /// Forward a `/v1/chat/completions` request to the configured backend.
    ///
    /// The request body should have `model` and `stream` already rewritten by
    /// the router before this is called.
    pub async fn chat_completions(&self, request: Value) -> anyhow::Result<Value> {
        match self {
            Self::OpenAI(a) => a.chat_completions(request).await,
            Self::Anthropic(a) => a.chat_completions(request).await,
            Self::Ollama(a) => a.chat_completions(request).await,
            Self::Gemini(a) => a.chat_completions(request).await,
            Self::Bedrock(a) => a.chat_completions(request).await,
            Self::Azure(a) => a.chat_completions(request).await,
        }
    }

    /// Forward a streaming request and return an [`SseStream`].
    ///
    /// All backends produce OpenAI-compatible SSE output: OpenAI-compatible,
    /// vLLM, Ollama, and Azure backends proxy bytes verbatim; Anthropic
    /// translates on-the-fly from Anthropic's SSE schema. Gemini and Bedrock
    /// are not yet streamed — `chat_completions` is used and the full
    /// response is emitted as a single SSE chunk by the caller.
    pub async fn chat_completions_stream(&self, request: Value) -> anyhow::Result<SseStream> {
        match self {
            Self::OpenAI(a) => a.chat_completions_stream(request).await,
            Self::Ollama(a) => a.chat_completions_stream(request).await,
            Self::Anthropic(a) => a.chat_completions_stream(request).await,
            Self::Azure(a) => a.chat_completions_stream(request).await,
            Self::Gemini(_) | Self::Bedrock(_) => {
                anyhow::bail!("streaming is not yet supported for this provider")
            }
        }
    }

    /// Probe this backend for liveness. Implementation varies by provider.
    pub async fn health_check(&self) -> anyhow::Result<()> {
        match self {
            Self::OpenAI(a) => a.health_check().await,
            Self::Anthropic(a) => a.health_check().await,
            Self::Ollama(a) => a.health_check().await,
            Self::Gemini(a) => a.health_check().await,
            Self::Bedrock(a) => a.health_check().await,
            Self::Azure(a) => a.health_check().await,
        }
    }

    /// True if this backend can stream (see [`Self::chat_completions_stream`]).
    pub fn supports_streaming(&self) -> bool {
        !matches!(self, Self::Gemini(_) | Self::Bedrock(_))
    }
}

fn require_api_key(cfg: &BackendConfig, provider_name: &str) -> anyhow::Result<String> {
    cfg.api_key().ok_or_else(|| {
        let env_var = cfg.api_key_env.as_deref().unwrap_or("<unset>");
        anyhow::anyhow!(
            "{provider_name} backend requires an API key; set the `{env_var}` environment variable"
        )
    })
}
