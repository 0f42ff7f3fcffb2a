//! Gemini (Generative Language API) adapter.
//!
//! Translates between the OpenAI chat completions schema and Google's
//! `generateContent` API. The API key travels as a `?key=` query parameter
//! rather than an Authorization header — one of several small protocol
//! differences this adapter absorbs so routing code never sees them.
//!
//! | Concern | OpenAI | Gemini |
//! |---|---|---|
//! | Roles | `system`/`user`/`assistant` | `user`/`model`, system is a separate field |
//! | Message shape | `content: string` | `parts: [{text}]` |
//! | Auth | `Authorization: Bearer …` | `?key=…` query parameter |
//! | Response shape | `choices[].message.content` | `candidates[].content.parts[].text` |

use std::time::Duration;

use anyhow::Context;
use reqwest::{Client, header};
use serde_json::{json, Value};

/// Adapter for the Gemini `generateContent` API.
pub struct GeminiAdapter {
    client: Client,
    base_url: String,
    api_key: String,
}

impl GeminiAdapter {
    pub fn new(base_url: String, timeout_ms: u64, api_key: String) -> Self {
        let client = Client::builder()
            .default_headers(header::HeaderMap::new())
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .expect("failed to build reqwest client");
        Self { client, base_url, api_key }
    }

    pub async fn chat_completions(&self, request: Value) -> anyhow::Result<Value> {
        let model = request["model"].as_str().context("`model` field is required")?.to_string();
        let gemini_req = to_gemini(&request)?;

        let url = format!(
            "{}/v1beta/models/{model}:generateContent?key={}",
            self.base_url, self.api_key
        );

        let response = self
            .client
            .post(&url)
            .json(&gemini_req)
            .send()
            .await
            .context("POST generateContent")?;

        let status = response.status();
        let text = response.text().await.context("reading Gemini response body")?;

        if !status.is_success() {
            anyhow::bail!("Gemini returned HTTP {status}: {text}");
        }

        let body: Value = serde_json::from_str(&text)
            .with_context(|| format!("parsing Gemini response as JSON: {text}"))?;

        from_gemini(body, &model)
    }

    pub async fn health_check(&self) -> anyhow::Result<()> {
        let url = format!("{}/v1beta/models?key={}", self.base_url, self.api_key);
        let response = self.client.get(&url).send().await.context("GET models")?;
        anyhow::ensure!(
            response.status().is_success(),
            "Gemini health check returned HTTP {}",
            response.status()
        );
        Ok(())
    }
}

pub(crate) fn to_gemini(request: &Value) -> anyhow::Result<Value> {
    let raw_messages = request["messages"].as_array().context("`messages` array is required")?;

    let mut system_parts: Vec<&str> = Vec::new();
    let mut contents: Vec<Value> = Vec::with_capacity(raw_messages.len());

    for msg in raw_messages {
        let content = msg["content"].as_str().unwrap_or_default();
        match msg["role"].as_str() {
            Some("system") => system_parts.push(content),
            Some("assistant") => contents.push(json!({ "role": "model", "parts": [{ "text": content }] })),
            _ => contents.push(json!({ "role": "user", "parts": [{ "text": content }] })),
        }
    }

    let mut req = json!({ "contents": contents });

    if !system_parts.is_empty() {
        req["systemInstruction"] = json!({ "parts": [{ "text": system_parts.join("\n\n") }] });
    }

    let mut generation_config = json!({});
    if let Some(temp) = request["temperature"].as_f64() {
        generation_config["temperature"] = json!(temp);
    }
    if let Some(max_tokens) = request["max_tokens"].as_u64() {
        generation_config["maxOutputTokens"] = json!(max_tokens);
    }
    if generation_config.as_object().is_some_and(|o| !o.is_empty()) {
        req["generationConfig"] = generation_config;
    }

    Ok(req)
}

pub(crate) fn from_gemini(resp: Value, model: &str) -> anyhow::Result<Value> {
    let text = resp["candidates"][0]["content"]["parts"][0]["text"]
        .as_str()
        .context("no text part in Gemini response")?
        .to_string();

    let finish_reason = match resp["candidates"][0]["finishReason"].as_str().unwrap_or("STOP") {
        "STOP" => "stop",
        "MAX_TOKENS" => "length",
        other => other,
    };

    let input_tokens = resp["usageMetadata"]["promptTokenCount"].as_u64().unwrap_or(0);
    let output_tokens = resp["usageMetadata"]["candidatesTokenCount"].as_u64().unwrap_or(0);

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
    fn to_gemini_maps_assistant_role_to_model() {
        let req = json!({
            "model": "gemini-2.0-flash",
            "messages": [
                { "role": "system", "content": "Be concise." },
                { "role": "user", "content": "Hi" },
                { "role": "assistant", "content": "Hello!" },
            ],
        });
        let out = to_gemini(&req).unwrap();
        assert_eq!(out["systemInstruction"]["parts"][0]["text"], "Be concise.");
        let contents = out["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[1]["role"], "model");
    }

    #[test]
    fn to_gemini_forwards_generation_config() {
        let req = json!({
            "model": "gemini-2.0-flash",
            "messages": [{ "role": "user", "content": "Hi" }],
            "temperature": 0.2,
            "max_tokens": 512,
        });
        let out = to_gemini(&req).unwrap();
        assert!((out["generationConfig"]["temperature"].as_f64().unwrap() - 0.2).abs() < f64::EPSILON);
        assert_eq!(out["generationConfig"]["maxOutputTokens"], 512);
    }

    #[test]
    fn from_gemini_maps_max_tokens_finish_reason() {
        let resp = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "..." }] },
                "finishReason": "MAX_TOKENS",
            }],
            "usageMetadata": { "promptTokenCount": 10, "candidatesTokenCount": 20 },
        });
        let out = from_gemini(resp, "gemini-2.0-flash").unwrap();
        assert_eq!(out["choices"][0]["finish_reason"], "length");
        assert_eq!(out["usage"]["total_tokens"], 30);
    }

    #[test]
    fn from_gemini_errors_when_no_text_part() {
        let resp = json!({ "candidates": [{ "content": { "parts": [] } }] });
        assert!(from_gemini(resp, "gemini-2.0-flash").is_err());
    }
}
