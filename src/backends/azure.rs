//! Azure OpenAI adapter.
//!
//! Wire-compatible with the OpenAI chat completions schema — Azure OpenAI is
//! the same model family behind a different URL shape and auth header. No
//! body translation is needed, only request routing: `api-key` instead of
//! `Authorization: Bearer`, and the deployment name baked into the path
//! rather than the `model` field.

use std::time::Duration;

use anyhow::Context;
use futures_util::StreamExt as _;
use reqwest::{header, Client};
use serde_json::Value;

use super::SseStream;

const API_VERSION: &str = "2024-06-01";

pub struct AzureAdapter {
    client: Client,
    stream_client: Client,
    base_url: String,
    deployment: String,
}

impl AzureAdapter {
    pub fn new(base_url: String, timeout_ms: u64, api_key: String, deployment: String) -> Self {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            "api-key",
            header::HeaderValue::from_str(&api_key)
                .expect("Azure API key contains invalid header characters"),
        );

        let client = Client::builder()
            .default_headers(headers.clone())
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .expect("failed to build reqwest client");
        let stream_client = Client::builder()
            .default_headers(headers)
            .build()
            .expect("failed to build streaming reqwest client");

        Self { client, stream_client, base_url, deployment }
    }

    fn url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={API_VERSION}",
            self.base_url, self.deployment
        )
    }

    pub async fn chat_completions(&self, body: Value) -> anyhow::Result<Value> {
        let url = self.url();
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;

        let status = response.status();
        let text = response.text().await.context("reading Azure response body")?;

        if !status.is_success() {
            anyhow::bail!("Azure OpenAI returned HTTP {status}: {text}");
        }

        serde_json::from_str(&text).with_context(|| format!("parsing Azure response as JSON: {text}"))
    }

    pub async fn chat_completions_stream(&self, body: Value) -> anyhow::Result<SseStream> {
        let url = self.url();
        let response = self
            .stream_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {url} (streaming)"))?;
        let stream = response.bytes_stream().map(|r| r.map_err(anyhow::Error::from));
        Ok(Box::pin(stream))
    }

    pub async fn health_check(&self) -> anyhow::Result<()> {
        let url = format!(
            "{}/openai/deployments/{}?api-version={API_VERSION}",
            self.base_url, self.deployment
        );
        let response = self.client.get(&url).send().await.with_context(|| format!("GET {url}"))?;
        anyhow::ensure!(
            response.status().is_success(),
            "Azure health check returned HTTP {}",
            response.status()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path_regex, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn chat_completions_hits_deployment_path_with_api_version() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/openai/deployments/gpt4-prod/chat/completions$"))
            .and(query_param("api-version", API_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "content": "hi" } }]
            })))
            .mount(&server)
            .await;

        let adapter = AzureAdapter::new(server.uri(), 5_000, "test-key".into(), "gpt4-prod".into());
        let result = adapter.chat_completions(json!({"messages": []})).await;
        assert!(result.is_ok(), "expected Ok, got {result:?}");
    }

    #[tokio::test]
    async fn chat_completions_errors_on_non_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/openai/deployments/.*/chat/completions$"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .mount(&server)
            .await;

        let adapter = AzureAdapter::new(server.uri(), 5_000, "bad-key".into(), "dep".into());
        let err = adapter.chat_completions(json!({"messages": []})).await.unwrap_err();
        assert!(err.to_string().contains("401"));
    }
}
