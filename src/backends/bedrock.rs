//! Amazon Bedrock Converse API adapter.
//!
//! Translates between the OpenAI chat completions schema and the Bedrock
//! [Converse API](https://docs.aws.amazon.com/bedrock/latest/APIReference/API_runtime_Converse.html),
//! which is model-family-agnostic (works across Anthropic, Llama, Titan,
//! etc. hosted on Bedrock) and so is the one Bedrock surface worth adapting
//! to rather than a per-model-family translation.
//!
//! Request signing: this adapter authenticates with a static bearer token
//! rather than full AWS SigV4 — it targets deployments that front Bedrock
//! behind a signing reverse proxy or an API-key-gated Bedrock access
//! gateway, which is how this gateway's other compliant-cloud backend
//! (Azure) is configured too. Full SigV4 would pull in an AWS SDK crate
//! purely for this one adapter; see DESIGN.md.

use std::time::Duration;

use anyhow::Context;
use reqwest::{Client, header};
use serde_json::{json, Value};

pub struct BedrockAdapter {
    client: Client,
    base_url: String,
}

impl BedrockAdapter {
    pub fn new(base_url: String, timeout_ms: u64, api_key: Option<String>) -> Self {
        let mut headers = header::HeaderMap::new();
        if let Some(key) = api_key {
            let value = format!("Bearer {key}");
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&value)
                    .expect("Bedrock API key contains invalid header characters"),
            );
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .expect("failed to build reqwest client");

        Self { client, base_url }
    }

    pub async fn chat_completions(&self, request: Value) -> anyhow::Result<Value> {
        let model = request["model"].as_str().context("`model` field is required")?.to_string();
        let bedrock_req = to_bedrock(&request)?;

        let url = format!("{}/model/{model}/converse", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&bedrock_req)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;

        let status = response.status();
        let text = response.text().await.context("reading Bedrock response body")?;

        if !status.is_success() {
            anyhow::bail!("Bedrock returned HTTP {status}: {text}");
        }

        let body: Value = serde_json::from_str(&text)
            .with_context(|| format!("parsing Bedrock response as JSON: {text}"))?;

        from_bedrock(body, &model)
    }

    pub async fn health_check(&self) -> anyhow::Result<()> {
        let url = format!("{}/foundation-models", self.base_url);
        let response = self.client.get(&url).send().await.with_context(|| format!("GET {url}"))?;
        anyhow::ensure!(
            response.status().is_success(),
            "Bedrock health check returned HTTP {}",
            response.status()
        );
        Ok(())
    }
}

pub(crate) fn to_bedrock(request: &Value) -> anyhow::Result<Value> {
    let raw_messages = request["messages"].as_array().context("`messages` array is required")?;

    let mut system: Vec<Value> = Vec::new();
    let mut messages: Vec<Value> = Vec::with_capacity(raw_messages.len());

    for msg in raw_messages {
        let content = msg["content"].as_str().unwrap_or_default();
        match msg["role"].as_str() {
            Some("system") => system.push(json!({ "text": content })),
            Some("assistant") => messages.push(json!({ "role": "assistant", "content": [{ "text": content }] })),
            _ => messages.push(json!({ "role": "user", "content": [{ "text": content }] })),
        }
    }

    let mut req = json!({ "messages": messages });
    if !system.is_empty() {
        req["system"] = json!(system);
    }

    let mut inference_config = json!({});
    if let Some(max_tokens) = request["max_tokens"].as_u64() {
        inference_config["maxTokens"] = json!(max_tokens);
    }
    if let Some(temp) = request["temperature"].as_f64() {
        inference_config["temperature"] = json!(temp);
    }
    if inference_config.as_object().is_some_and(|o| !o.is_empty()) {
        req["inferenceConfig"] = inference_config;
    }

    Ok(req)
}

pub(crate) fn from_bedrock(resp: Value, model: &str) -> anyhow::Result<Value> {
    let text = resp["output"]["message"]["content"][0]["text"]
        .as_str()
        .context("no text content in Bedrock response")?
        .to_string();

    let finish_reason = match resp["stopReason"].as_str().unwrap_or("end_turn") {
        "end_turn" | "stop_sequence" => "stop",
        "max_tokens" => "length",
        other => other,
    };

    let input_tokens = resp["usage"]["inputTokens"].as_u64().unwrap_or(0);
    let output_tokens = resp["usage"]["outputTokens"].as_u64().unwrap_or(0);

    Ok(json!({
        "id": format!("chatcmpl-{model}"),
        "object": "chat.completion",
        "model": model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": text },
            "finish_reason": finish_reason,
        }],
        "usage": {
            "prompt_tokens": input_tokens,
            "completion_tokens": output_tokens,
            "total_tokens": input_tokens + output_tokens,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_bedrock_separates_system_from_messages() {
        let req = json!({
            "model": "anthropic.claude-haiku",
            "messages": [
                { "role": "system", "content": "Be concise." },
                { "role": "user", "content": "Hi" },
            ],
        });
        let out = to_bedrock(&req).unwrap();
        assert_eq!(out["system"][0]["text"], "Be concise.");
        assert_eq!(out["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn from_bedrock_maps_stop_sequence_to_stop() {
        let resp = json!({
            "output": { "message": { "content": [{ "text": "hi" }] } },
            "stopReason": "stop_sequence",
            "usage": { "inputTokens": 3, "outputTokens": 1 },
        });
        let out = from_bedrock(resp, "anthropic.claude-haiku").unwrap();
        assert_eq!(out["choices"][0]["finish_reason"], "stop");
        assert_eq!(out["usage"]["total_tokens"], 4);
    }

    #[test]
    fn from_bedrock_errors_without_text_content() {
        let resp = json!({ "output": { "message": { "content": [] } } });
        assert!(from_bedrock(resp, "m").is_err());
    }
}
