//! Anthropic Messages API client: the production [`Reasoner`].

use crate::reasoner::{Reasoner, ReasonerReply, ToolRequest, ToolSpec};
use crate::transcript::Turn;
use crate::{Error, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_API_ATTEMPTS: u64 = 10;

// Long runs would otherwise grow the request without bound: past this many
// turns, only the first turn and the most recent TRIM_TAIL go on the wire.
const TRIM_THRESHOLD: usize = 40;
const TRIM_TAIL: usize = 30;

/// Reasoning model settings, usually loaded from the run config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmConfig {
    pub model: String,
    pub api_base: String,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            api_base: "https://api.anthropic.com/v1".to_string(),
            max_tokens: 4096,
            request_timeout_secs: 120,
        }
    }
}

/// Talks to the Anthropic Messages API. Rate limits and server errors are
/// retried with a linear backoff before giving up.
pub struct ClaudeReasoner {
    http: reqwest::Client,
    config: LlmConfig,
    api_key: String,
}

impl ClaudeReasoner {
    pub fn new(config: LlmConfig, api_key: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            config,
            api_key: api_key.into(),
        }
    }

    async fn call_api_with_retry(&self, body: &Value) -> Result<Value> {
        let url = format!("{}/messages", self.config.api_base.trim_end_matches('/'));
        for attempt in 0..MAX_API_ATTEMPTS {
            let resp = self
                .http
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(body)
                .send()
                .await;

            let resp = match resp {
                Ok(r) => r,
                Err(e) if e.is_timeout() || e.is_connect() => {
                    if attempt + 1 == MAX_API_ATTEMPTS {
                        return Err(e.into());
                    }
                    let wait = (attempt + 1) * 5;
                    warn!("request failed ({}), retrying in {}s", e, wait);
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let status = resp.status();
            let json: Value = resp.json().await?;

            let retryable = status == 429
                || status.is_server_error()
                || json["error"]["type"] == "rate_limit_error"
                || json["error"]["type"] == "overloaded_error";
            if retryable {
                if attempt + 1 == MAX_API_ATTEMPTS {
                    return Err(Error::Api(format!(
                        "api still returning {} after {} attempts",
                        status, MAX_API_ATTEMPTS
                    )));
                }
                let wait = (attempt + 1) * 5;
                warn!("api returned {}, retrying in {}s", status, wait);
                tokio::time::sleep(Duration::from_secs(wait)).await;
                continue;
            }

            if let Some(err) = json.get("error") {
                let message = err["message"].as_str().unwrap_or("unknown api error");
                return Err(Error::Api(format!("{}: {}", status, message)));
            }
            return Ok(json);
        }
        Err(Error::Api("api retries exhausted".to_string()))
    }
}

#[async_trait]
impl Reasoner for ClaudeReasoner {
    async fn respond(
        &self,
        system: &str,
        turns: &[Turn],
        tools: &[ToolSpec],
    ) -> Result<ReasonerReply> {
        let mut body = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "system": system,
            "messages": to_wire_messages(turns),
        });
        if !tools.is_empty() {
            let defs: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.input_schema,
                    })
                })
                .collect();
            body["tools"] = Value::Array(defs);
        }

        let resp = self.call_api_with_retry(&body).await?;

        let mut text = String::new();
        let mut tool_call = None;
        for block in resp["content"].as_array().map(Vec::as_slice).unwrap_or(&[]) {
            match block["type"].as_str() {
                Some("text") => {
                    let t = block["text"].as_str().unwrap_or("");
                    if !t.is_empty() {
                        if !text.is_empty() {
                            text.push('\n');
                        }
                        text.push_str(t);
                    }
                }
                Some("tool_use") => {
                    if tool_call.is_none() {
                        tool_call = Some(ToolRequest {
                            id: block["id"].as_str().unwrap_or("").to_string(),
                            name: block["name"].as_str().unwrap_or("").to_string(),
                            args: block["input"].clone(),
                        });
                    } else {
                        warn!("reply carried more than one tool call, extras ignored");
                    }
                }
                _ => {}
            }
        }
        debug!(
            stop_reason = resp["stop_reason"].as_str().unwrap_or(""),
            has_tool = tool_call.is_some(),
            "reasoner reply"
        );
        Ok(ReasonerReply { text, tool_call })
    }
}

/// Fold typed turns into Messages API messages.
///
/// Adjacent turns that land in the same role merge into one message with
/// multiple content blocks, which keeps tool results at the front of the
/// user message that follows a tool call. Only the newest screenshot is
/// sent as pixels; older ones collapse to a placeholder line.
pub(crate) fn to_wire_messages(turns: &[Turn]) -> Vec<Value> {
    let selected = select_turns(turns);
    let newest_image = selected
        .iter()
        .rposition(|t| matches!(t, Turn::Image { .. }));

    let mut messages: Vec<Value> = Vec::new();
    let mut push_block = |role: &str, block: Value, messages: &mut Vec<Value>| {
        if let Some(last) = messages.last_mut() {
            if last["role"] == role {
                if let Some(content) = last["content"].as_array_mut() {
                    content.push(block);
                    return;
                }
            }
        }
        messages.push(json!({ "role": role, "content": [block] }));
    };

    for (i, turn) in selected.iter().enumerate() {
        match turn {
            Turn::User { text } => {
                push_block("user", json!({ "type": "text", "text": text }), &mut messages);
            }
            Turn::Assistant { text } => {
                if !text.is_empty() {
                    push_block(
                        "assistant",
                        json!({ "type": "text", "text": text }),
                        &mut messages,
                    );
                }
            }
            Turn::Image { image } => {
                let block = if Some(i) == newest_image {
                    json!({
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": image.media_type,
                            "data": BASE64.encode(&image.data),
                        }
                    })
                } else {
                    json!({ "type": "text", "text": "[screenshot omitted]" })
                };
                push_block("user", block, &mut messages);
            }
            Turn::ToolCall { id, name, args } => {
                push_block(
                    "assistant",
                    json!({ "type": "tool_use", "id": id, "name": name, "input": args }),
                    &mut messages,
                );
            }
            Turn::ToolResult {
                id,
                payload,
                is_error,
                ..
            } => {
                push_block(
                    "user",
                    json!({
                        "type": "tool_result",
                        "tool_use_id": id,
                        "content": payload,
                        "is_error": is_error,
                    }),
                    &mut messages,
                );
            }
        }
    }
    messages
}

/// Keep the first turn plus the most recent tail once the transcript gets
/// long. The tail may not open with a tool result whose call was dropped.
fn select_turns(turns: &[Turn]) -> Vec<&Turn> {
    if turns.len() <= TRIM_THRESHOLD {
        return turns.iter().collect();
    }
    let mut tail_start = turns.len() - TRIM_TAIL;
    while tail_start < turns.len() && matches!(turns[tail_start], Turn::ToolResult { .. }) {
        tail_start += 1;
    }
    turns
        .iter()
        .take(1)
        .chain(turns.iter().skip(tail_start))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
