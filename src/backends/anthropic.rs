//! Anthropic Messages API adapter.
//!
//! Translates between the OpenAI chat completions schema (used internally by
//! the gateway) and Anthropic's [`/v1/messages`](https://docs.anthropic.com/en/api/messages)
//! API. Callers route requests as normal OpenAI-format JSON; this adapter
//! handles the schema differences transparently.
//!
//! # Protocol differences handled here
//!
//! | Concern | OpenAI | Anthropic |
//! |---|---|---|
//! | System prompt | First message with `role: "system"` | Top-level `system` field |
//! | Max tokens | Optional (`max_tokens`) | **Required** (`max_tokens`) |
//! | Finish reasons | `"stop"`, `"length"` | `"end_turn"`, `"max_tokens"` |
//! | Response shape | `choices[].message.content` | `content[].text` |
//! | Auth header | `Authorization: Bearer …` | `x-api-key: …` |

use std::time::Duration;

use anyhow::Context;
use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt as _};
use reqwest::{Client, header};
use serde_json::{json, Value};
use uuid::Uuid;

use super::SseStream;

/// Default max_tokens when the caller omits it. Required by Anthropic; sensible
/// ceiling for most conversational use-cases.
const DEFAULT_MAX_TOKENS: u64 = 8_192;

/// Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Adapter for the Anthropic Messages API.
pub struct AnthropicAdapter {
    client: Client,
    base_url: String,
}

impl AnthropicAdapter {
    /// Build an Anthropic adapter with the given API key.
    pub fn new(base_url: String, timeout_ms: u64, api_key: String) -> Self {
        let mut headers = header::HeaderMap::new();

        headers.insert(
            "x-api-key",
            header::HeaderValue::from_str(&api_key)
                .expect("Anthropic API key contains invalid header characters"),
        );
        headers.insert(
            "anthropic-version",
            header::HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .expect("failed to build reqwest client");

        Self { client, base_url }
    }

    /// Translate and forward a chat completions request to `POST /v1/messages`,
    /// then translate the response back to the OpenAI schema.
    pub async fn chat_completions(&self, request: Value) -> anyhow::Result<Value> {
        let anthropic_req = to_anthropic(request)?;
        let url = format!("{}/v1/messages", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&anthropic_req)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;

        let status = response.status();
        let text = response.text().await.context("reading Anthropic response body")?;

        if !status.is_success() {
            anyhow::bail!("Anthropic returned HTTP {status}: {text}");
        }

        let body: Value = serde_json::from_str(&text)
            .with_context(|| format!("parsing Anthropic response as JSON: {text}"))?;

        from_anthropic(body)
    }

    /// Translate and forward a streaming chat completions request, yielding
    /// OpenAI-schema SSE chunks translated on-the-fly from Anthropic's own
    /// event stream (`message_start` → role chunk, `content_block_delta` →
    /// text chunks, `message_delta`'s `stop_reason` → final chunk, then
    /// `[DONE]`).
    pub async fn chat_completions_stream(&self, request: Value) -> anyhow::Result<SseStream> {
        let mut anthropic_req = to_anthropic(request)?;
        anthropic_req["stream"] = json!(true);
        let url = format!("{}/v1/messages", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&anthropic_req)
            .send()
            .await
            .with_context(|| format!("POST {url} (streaming)"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Anthropic returned HTTP {status}: {text}");
        }

        let byte_stream = response.bytes_stream().map(|r| r.map_err(anyhow::Error::from));
        Ok(Box::pin(translate_anthropic_stream(byte_stream)))
    }

    /// Probe Anthropic with a minimal 1-token request.
    ///
    /// Anthropic has no `/v1/models` endpoint, so a cheap model inference call
    /// is the only reliable way to verify auth + connectivity.
    pub async fn health_check(&self) -> anyhow::Result<()> {
        let probe = json!({
            "model": "claude-haiku-4-5-20251001",
            "max_tokens": 1,
            "messages": [{ "role": "user", "content": "ping" }],
        });

        let url = format!("{}/v1/messages", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&probe)
            .send()
            .await
            .with_context(|| format!("health check POST {url}"))?;

        anyhow::ensure!(
            response.status().is_success(),
            "Anthropic health check returned HTTP {}",
            response.status()
        );
        Ok(())
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Schema translation — pub(crate) for unit testing
// ──────────────────────────────────────────────────────────────────────────────

/// Convert an OpenAI chat completions request to the Anthropic Messages format.
pub(crate) fn to_anthropic(request: Value) -> anyhow::Result<Value> {
    let model = request["model"]
        .as_str()
        .context("`model` field is required")?
        .to_string();

    let max_tokens = request["max_tokens"]
        .as_u64()
        .unwrap_or(DEFAULT_MAX_TOKENS);

    let raw_messages = request["messages"]
        .as_array()
        .context("`messages` array is required")?;

    // Anthropic treats system content as a top-level field, not a message role.
    // If multiple system messages are present, concatenate them.
    let mut system_parts: Vec<&str> = Vec::new();
    let mut messages: Vec<Value> = Vec::with_capacity(raw_messages.len());

    for msg in raw_messages {
        if msg["role"].as_str() == Some("system") {
            if let Some(content) = msg["content"].as_str() {
                system_parts.push(content);
            }
        } else {
            messages.push(msg.clone());
        }
    }

    let mut req = json!({
        "model": model,
        "max_tokens": max_tokens,
        "messages": messages,
    });

    if !system_parts.is_empty() {
        req["system"] = Value::String(system_parts.join("\n\n"));
    }

    // Forward compatible parameters
    if let Some(temp) = request["temperature"].as_f64() {
        req["temperature"] = json!(temp);
    }
    if let Some(stop) = request.get("stop") {
        req["stop_sequences"] = stop.clone();
    }

    Ok(req)
}

/// Convert an Anthropic Messages API response to the OpenAI chat completions schema.
pub(crate) fn from_anthropic(resp: Value) -> anyhow::Result<Value> {
    // Anthropic responses contain a `content` array of typed blocks.
    // Extract the first text block; non-text blocks (tool_use, etc.) are
    // ignored until streaming/tool-call support is added.
    let text = resp["content"]
        .as_array()
        .and_then(|blocks| blocks.iter().find(|b| b["type"] == "text"))
        .and_then(|b| b["text"].as_str())
        .context("no text block in Anthropic response `content` array")?
        .to_string();

    let model = resp["model"].as_str().unwrap_or("unknown");

    let finish_reason = match resp["stop_reason"].as_str().unwrap_or("stop") {
        "end_turn" => "stop",
        "max_tokens" => "length",
        other => other,
    };

    let input_tokens = resp["usage"]["input_tokens"].as_u64().unwrap_or(0);
    let output_tokens = resp["usage"]["output_tokens"].as_u64().unwrap_or(0);

    Ok(json!({
        "id": resp["id"],
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

// ──────────────────────────────────────────────────────────────────────────────
// Streaming translation
// ──────────────────────────────────────────────────────────────────────────────

struct StreamState<S> {
    inner: S,
    buffer: BytesMut,
    id: String,
    model: String,
    sent_role: bool,
    done: bool,
}

/// Translate Anthropic's SSE event stream into OpenAI chat-completion-chunk
/// SSE frames. Buffers partial lines across chunk boundaries since a single
/// TCP read can split an `event:`/`data:` pair anywhere.
fn translate_anthropic_stream<S>(inner: S) -> impl Stream<Item = anyhow::Result<Bytes>>
where
    S: Stream<Item = anyhow::Result<Bytes>> + Unpin,
{
    let state = StreamState {
        inner,
        buffer: BytesMut::new(),
        id: format!("chatcmpl-{}", Uuid::new_v4()),
        model: String::new(),
        sent_role: false,
        done: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if state.done {
                return None;
            }

            if let Some(line) = take_line(&mut state.buffer) {
                if let Some(frame) = handle_line(&line, &mut state) {
                    return Some((Ok(frame), state));
                }
                continue;
            }

            match state.inner.next().await {
                Some(Ok(bytes)) => state.buffer.extend_from_slice(&bytes),
                Some(Err(e)) => return Some((Err(e), state)),
                None => {
                    state.done = true;
                    return Some((Ok(Bytes::from_static(b"data: [DONE]\n\n")), state));
                }
            }
        }
    })
}

fn take_line(buffer: &mut BytesMut) -> Option<String> {
    let pos = buffer.iter().position(|&b| b == b'\n')?;
    let line = buffer.split_to(pos + 1);
    Some(String::from_utf8_lossy(&line).trim_end().to_string())
}

/// Process one line of the Anthropic SSE stream. Returns `Some(frame)` when
/// the line produced an OpenAI-schema chunk to emit.
fn handle_line<S>(line: &str, state: &mut StreamState<S>) -> Option<Bytes> {
    let data = line.strip_prefix("data:")?.trim();
    let event: Value = serde_json::from_str(data).ok()?;

    match event["type"].as_str()? {
        "message_start" => {
            state.id = event["message"]["id"].as_str().unwrap_or(&state.id).to_string();
            state.model = event["message"]["model"].as_str().unwrap_or_default().to_string();
            state.sent_role = true;
            Some(sse_chunk(&state.id, &state.model, json!({ "role": "assistant" }), None))
        }
        "content_block_delta" => {
            let text = event["delta"]["text"].as_str()?;
            Some(sse_chunk(&state.id, &state.model, json!({ "content": text }), None))
        }
        "message_delta" => {
            let stop_reason = event["delta"]["stop_reason"].as_str().unwrap_or("end_turn");
            let finish_reason = match stop_reason {
                "end_turn" => "stop",
                "max_tokens" => "length",
                other => other,
            };
            Some(sse_chunk(&state.id, &state.model, json!({}), Some(finish_reason)))
        }
        _ => None,
    }
}

fn sse_chunk(id: &str, model: &str, delta: Value, finish_reason: Option<&str>) -> Bytes {
    let frame = json!({
        "id": id,
        "object": "chat.completion.chunk",
        "model": model,
        "choices": [{
            "index": 0,
            "delta": delta,
            "finish_reason": finish_reason,
        }],
    });
    Bytes::from(format!("data: {frame}\n\n"))
}

// ──────────────────────────────────────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ── to_anthropic ──────────────────────────────────────────────────────────

    #[test]
    fn to_anthropic_extracts_system_message_to_top_level() {
        let req = json!({
            "model": "claude-haiku-4-5-20251001",
            "messages": [
                { "role": "system", "content": "You are a helpful assistant." },
                { "role": "user",   "content": "Hello" },
            ],
        });
        let out = to_anthropic(req).unwrap();

        assert_eq!(out["system"], "You are a helpful assistant.");

        let messages = out["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1, "system message should be removed from messages array");
        assert_eq!(messages[0]["role"], "user");
    }

    #[test]
    fn to_anthropic_concatenates_multiple_system_messages() {
        let req = json!({
            "model": "claude-haiku-4-5-20251001",
            "messages": [
                { "role": "system", "content": "Part one." },
                { "role": "system", "content": "Part two." },
                { "role": "user",   "content": "Hello" },
            ],
        });
        let out = to_anthropic(req).unwrap();
        assert_eq!(out["system"], "Part one.\n\nPart two.");
    }

    #[test]
    fn to_anthropic_defaults_max_tokens_when_absent() {
        let req = json!({
            "model": "claude-haiku-4-5-20251001",
            "messages": [{ "role": "user", "content": "Hi" }],
        });
        let out = to_anthropic(req).unwrap();
        assert_eq!(out["max_tokens"], DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn to_anthropic_uses_caller_max_tokens() {
        let req = json!({
            "model": "claude-haiku-4-5-20251001",
            "max_tokens": 256,
            "messages": [{ "role": "user", "content": "Hi" }],
        });
        let out = to_anthropic(req).unwrap();
        assert_eq!(out["max_tokens"], 256);
    }

    #[test]
    fn to_anthropic_forwards_temperature() {
        let req = json!({
            "model": "claude-haiku-4-5-20251001",
            "messages": [{ "role": "user", "content": "Hi" }],
            "temperature": 0.3,
        });
        let out = to_anthropic(req).unwrap();
        assert!((out["temperature"].as_f64().unwrap() - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn to_anthropic_errors_without_model() {
        let req = json!({ "messages": [] });
        assert!(to_anthropic(req).is_err());
    }

    #[test]
    fn to_anthropic_errors_without_messages() {
        let req = json!({ "model": "claude-haiku-4-5-20251001" });
        assert!(to_anthropic(req).is_err());
    }

    // ── from_anthropic ────────────────────────────────────────────────────────

    #[test]
    fn from_anthropic_maps_end_turn_to_stop() {
        let resp = json!({
            "id": "msg_123",
            "model": "claude-haiku-4-5-20251001",
            "content": [{ "type": "text", "text": "Hello!" }],
            "stop_reason": "end_turn",
            "usage": { "input_tokens": 10, "output_tokens": 5 },
        });
        let out = from_anthropic(resp).unwrap();

        assert_eq!(out["choices"][0]["finish_reason"], "stop");
        assert_eq!(out["choices"][0]["message"]["content"], "Hello!");
        assert_eq!(out["usage"]["prompt_tokens"], 10);
        assert_eq!(out["usage"]["completion_tokens"], 5);
        assert_eq!(out["usage"]["total_tokens"], 15);
    }

    #[test]
    fn from_anthropic_maps_max_tokens_stop_reason_to_length() {
        let resp = json!({
            "id": "msg_456",
            "model": "claude-haiku-4-5-20251001",
            "content": [{ "type": "text", "text": "…" }],
            "stop_reason": "max_tokens",
            "usage": { "input_tokens": 100, "output_tokens": 1024 },
        });
        let out = from_anthropic(resp).unwrap();
        assert_eq!(out["choices"][0]["finish_reason"], "length");
    }

    #[test]
    fn from_anthropic_errors_when_no_text_block_present() {
        let resp = json!({
            "id": "msg_789",
            "model": "claude-haiku-4-5-20251001",
            "content": [{
                "type": "tool_use",
                "id": "toolu_1",
                "name": "calculator",
                "input": {},
            }],
            "stop_reason": "tool_use",
            "usage": { "input_tokens": 10, "output_tokens": 5 },
        });
        assert!(from_anthropic(resp).is_err());
    }

    // ── streaming translation ─────────────────────────────────────────────────

    fn fresh_state() -> StreamState<futures_util::stream::Empty<anyhow::Result<Bytes>>> {
        StreamState {
            inner: futures_util::stream::empty(),
            buffer: BytesMut::new(),
            id: "chatcmpl-placeholder".into(),
            model: String::new(),
            sent_role: false,
            done: false,
        }
    }

    #[test]
    fn message_start_emits_role_chunk() {
        let mut state = fresh_state();
        let line = r#"data: {"type":"message_start","message":{"id":"msg_1","model":"claude-haiku-4-5-20251001"}}"#;
        let frame = handle_line(line, &mut state).expect("should emit a frame");
        let text = String::from_utf8(frame.to_vec()).unwrap();
        assert!(text.contains("\"role\":\"assistant\""));
        assert_eq!(state.model, "claude-haiku-4-5-20251001");
    }

    #[test]
    fn content_block_delta_emits_text_chunk() {
        let mut state = fresh_state();
        let line = r#"data: {"type":"content_block_delta","delta":{"text":"Hi"}}"#;
        let frame = handle_line(line, &mut state).expect("should emit a frame");
        let text = String::from_utf8(frame.to_vec()).unwrap();
        assert!(text.contains("\"content\":\"Hi\""));
    }

    #[test]
    fn message_delta_maps_stop_reason_to_finish_reason() {
        let mut state = fresh_state();
        let line = r#"data: {"type":"message_delta","delta":{"stop_reason":"max_tokens"}}"#;
        let frame = handle_line(line, &mut state).expect("should emit a frame");
        let text = String::from_utf8(frame.to_vec()).unwrap();
        assert!(text.contains("\"finish_reason\":\"length\""));
    }

    #[test]
    fn non_content_events_are_ignored() {
        let mut state = fresh_state();
        let line = r#"data: {"type":"ping"}"#;
        assert!(handle_line(line, &mut state).is_none());
    }

    #[test]
    fn take_line_buffers_partial_lines_across_chunks() {
        let mut buffer = BytesMut::from(&b"data: {\"type\":\"pin"[..]);
        assert!(take_line(&mut buffer).is_none());
        buffer.extend_from_slice(b"g\"}\n");
        let line = take_line(&mut buffer).expect("full line now available");
        assert_eq!(line, r#"data: {"type":"ping"}"#);
    }

    #[test]
    fn from_anthropic_preserves_message_id() {
        let resp = json!({
            "id": "msg_abc",
            "model": "claude-haiku-4-5-20251001",
            "content": [{ "type": "text", "text": "Hi" }],
            "stop_reason": "end_turn",
            "usage": { "input_tokens": 1, "output_tokens": 1 },
        });
        let out = from_anthropic(resp).unwrap();
        assert_eq!(out["id"], "msg_abc");
    }
}
