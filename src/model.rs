use std::thread;
use std::time::Duration;

use crate::{
    jitter_ratio, parse_retry_after, AssistantTurn, Message, Settings, ToolCall, ToolSpec,
};

const RETRY_BASE_SECS: f64 = 0.5;
const RETRY_MAX_SECS: f64 = 8.0;
const MAX_COMPLETION_TOKENS: u64 = 4096;

/// Black-box completion service. The planner only ever sees this trait, so
/// any vendor speaking the same contract is substitutable (and tests script
/// responses without a network).
pub(crate) trait CompletionBackend {
    /// Ask for the next action given the full history and tool specs.
    fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<AssistantTurn, String>;

    /// Plain text-in/text-out call used by history summarization.
    fn summarize(&self, instructions: &str, text: &str) -> Result<String, String> {
        let messages = vec![Message::User { text: text.to_string() }];
        let turn = self.complete(instructions, &messages, &[])?;
        turn.text.ok_or_else(|| "summarizer returned no text".to_string())
    }
}

/// OpenAI-compatible chat-completions client (the reference deployment is
/// DeepSeek, but nothing here is vendor-specific beyond the wire shape).
pub(crate) struct ChatModel {
    api_key: String,
    endpoint: String,
    model: String,
    temperature: f64,
    max_retries: usize,
    agent: ureq::Agent,
}

impl ChatModel {
    pub(crate) fn new(settings: &Settings) -> Self {
        let base = settings.model_api_base.trim_end_matches('/');
        ChatModel {
            api_key: settings.model_api_key.clone(),
            endpoint: format!("{base}/chat/completions"),
            model: settings.model_name.clone(),
            temperature: settings.model_temperature,
            max_retries: settings.model_max_retries,
            agent: ureq::AgentBuilder::new()
                .timeout_connect(Duration::from_secs(20))
                .timeout_read(Duration::from_secs(120))
                .timeout_write(Duration::from_secs(120))
                .build(),
        }
    }

    fn build_payload(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": MAX_COMPLETION_TOKENS,
            "messages": to_wire_messages(system, messages),
        });
        if !tools.is_empty() {
            payload["tools"] = serde_json::json!(to_wire_tools(tools));
            payload["tool_choice"] = serde_json::json!("auto");
        }
        payload
    }
}

impl CompletionBackend for ChatModel {
    fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<AssistantTurn, String> {
        let payload = self.build_payload(system, messages, tools);
        let retryable = |status: u16| matches!(status, 429 | 500 | 502 | 503 | 504);

        let mut last_error = String::new();
        for attempt in 0..=self.max_retries {
            let response = self
                .agent
                .post(&self.endpoint)
                .set("content-type", "application/json")
                .set("authorization", &format!("Bearer {}", self.api_key))
                .send_json(payload.clone());
            match response {
                Ok(resp) => {
                    let body: serde_json::Value = resp
                        .into_json()
                        .map_err(|e| format!("model response decode failed: {e}"))?;
                    return parse_completion(&body);
                }
                Err(ureq::Error::Status(code, resp)) => {
                    let retry_after = parse_retry_after(&resp);
                    let text = resp.into_string().unwrap_or_default();
                    last_error = format!("model error {code}: {}", text.trim());
                    if attempt < self.max_retries && retryable(code) {
                        let mut delay =
                            (RETRY_BASE_SECS * 2.0_f64.powi(attempt as i32)).min(RETRY_MAX_SECS);
                        if let Some(retry_after) = retry_after {
                            delay = delay.max(retry_after);
                        }
                        delay *= 1.0 + jitter_ratio() * 0.2;
                        thread::sleep(Duration::from_secs_f64(delay));
                        continue;
                    }
                    break;
                }
                Err(err) => {
                    last_error = format!("model transport error: {err}");
                    if attempt < self.max_retries {
                        let delay =
                            (RETRY_BASE_SECS * 2.0_f64.powi(attempt as i32)).min(RETRY_MAX_SECS);
                        thread::sleep(Duration::from_secs_f64(delay));
                        continue;
                    }
                    break;
                }
            }
        }
        eprintln!("[model] request failed after {} retries: {last_error}", self.max_retries);
        Err(last_error)
    }
}

// ── Wire format ─────────────────────────────────────────────────────────

pub(crate) fn to_wire_messages(system: &str, messages: &[Message]) -> Vec<serde_json::Value> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    if !system.trim().is_empty() {
        out.push(serde_json::json!({ "role": "system", "content": system }));
    }
    for msg in messages {
        match msg {
            Message::User { text } => {
                out.push(serde_json::json!({ "role": "user", "content": text }));
            }
            Message::Summary { text } => {
                // A compressed prefix re-enters the wire as system context so
                // the model treats it as background, not as a user request.
                out.push(serde_json::json!({
                    "role": "system",
                    "content": format!("Summary of the earlier conversation:\n{text}"),
                }));
            }
            Message::Assistant { text, tool_calls } => {
                let mut entry = serde_json::json!({
                    "role": "assistant",
                    "content": text.clone().unwrap_or_default(),
                });
                if !tool_calls.is_empty() {
                    let calls: Vec<serde_json::Value> = tool_calls
                        .iter()
                        .map(|call| {
                            serde_json::json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": call.name,
                                    "arguments": call.args.to_string(),
                                }
                            })
                        })
                        .collect();
                    entry["tool_calls"] = serde_json::json!(calls);
                }
                out.push(entry);
            }
            Message::ToolResult { call_id, payload, .. } => {
                out.push(serde_json::json!({
                    "role": "tool",
                    "tool_call_id": call_id,
                    "content": payload,
                }));
            }
        }
    }
    out
}

fn to_wire_tools(tools: &[ToolSpec]) -> Vec<serde_json::Value> {
    tools
        .iter()
        .map(|spec| {
            serde_json::json!({
                "type": "function",
                "function": {
                    "name": spec.name,
                    "description": spec.description,
                    "parameters": spec.parameters.clone(),
                }
            })
        })
        .collect()
}

pub(crate) fn parse_completion(body: &serde_json::Value) -> Result<AssistantTurn, String> {
    let message = body
        .get("choices")
        .and_then(|v| v.as_array())
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .ok_or("model response missing choices[0].message")?;

    let text = message
        .get("content")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .filter(|s| !s.trim().is_empty());

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(|v| v.as_array()) {
        for call in calls {
            let id = call.get("id").and_then(|v| v.as_str()).unwrap_or("").to_string();
            let function = call.get("function").cloned().unwrap_or_default();
            let name = function
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let args = function
                .get("arguments")
                .and_then(|v| v.as_str())
                .and_then(|raw| serde_json::from_str::<serde_json::Value>(raw).ok())
                .unwrap_or_else(|| serde_json::json!({}));
            tool_calls.push(ToolCall { id, name, args });
        }
    }

    Ok(AssistantTurn { text, tool_calls })
}
