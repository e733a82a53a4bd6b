//! Anthropic `/v1/messages` wire format.
//!
//! Not grounded in the teacher's `clients/claude.rs` (which merely delegates
//! to the OpenAI-compatible transport and implements none of this); written
//! fresh from the normalization rules, enriched from provider wire-format
//! examples in the broader reference corpus.

use super::{finish_reason, Compat, ParsedChunk, StreamState, ToolCallAccumulator};
use crate::cloudllm::error::CoordinatorError;
use crate::cloudllm::model::{
    ContentPart, LLMResponse, Message, Reasoning, Role, Settings, ToolCall, ToolChoice, ToolEvent, UnifiedTool, Usage,
};
use crate::cloudllm::sanitizer::NameSanitizer;
use serde_json::{json, Value};

const DEFAULT_MAX_TOKENS: u32 = 8192;
const DEFAULT_THINKING_BUDGET: u32 = 51200;
const THINKING_SENTINEL: &str = "__thinking__";

pub struct AnthropicCompat;

impl AnthropicCompat {
    pub fn new() -> Self {
        AnthropicCompat
    }

    fn thinking_budget(settings: &Settings) -> u32 {
        settings
            .reasoning
            .as_ref()
            .and_then(|r| r.budget)
            .or(settings.reasoning_budget)
            .unwrap_or(DEFAULT_THINKING_BUDGET)
    }

    /// Anthropic requires contiguous reasoning across every assistant turn;
    /// otherwise the whole `thinking` payload is omitted.
    fn reasoning_enabled(settings: &Settings, messages: &[Message]) -> bool {
        let wants_reasoning = settings.reasoning.as_ref().map(|r| r.enabled).unwrap_or(false);
        if !wants_reasoning {
            return false;
        }
        messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .all(|m| m.reasoning.as_ref().map(|r| !r.text.is_empty()).unwrap_or(false))
    }

    /// Converts the working history into Anthropic's `messages[]` + `system`.
    fn build_messages(messages: &[Message], include_reasoning: bool) -> (Option<String>, Vec<Value>) {
        let mut system: Option<String> = None;
        let mut out: Vec<Value> = Vec::new();
        let mut pending_tool_results: Vec<Value> = Vec::new();

        let flush = |pending: &mut Vec<Value>, out: &mut Vec<Value>| {
            if !pending.is_empty() {
                out.push(json!({ "role": "user", "content": std::mem::take(pending) }));
            }
        };

        for message in messages {
            match message.role {
                Role::System => {
                    if system.is_none() {
                        let text: String = message.content.iter().filter_map(ContentPart::as_text).collect();
                        system = Some(text);
                    }
                    // subsequent system messages dropped
                }
                Role::User => {
                    flush(&mut pending_tool_results, &mut out);
                    let blocks = text_blocks(message);
                    out.push(json!({ "role": "user", "content": blocks }));
                }
                Role::Assistant => {
                    flush(&mut pending_tool_results, &mut out);
                    let mut blocks: Vec<Value> = Vec::new();
                    if include_reasoning {
                        if let Some(r) = &message.reasoning {
                            if !r.text.is_empty() {
                                blocks.push(json!({ "type": "thinking", "text": r.text }));
                            }
                        }
                    }
                    blocks.extend(text_blocks(message));
                    if let Some(calls) = &message.tool_calls {
                        for c in calls {
                            blocks.push(json!({
                                "type": "tool_use",
                                "id": c.id,
                                "name": c.name,
                                "input": c.arguments,
                            }));
                        }
                    }
                    out.push(json!({ "role": "assistant", "content": blocks }));
                }
                Role::Tool => {
                    let tool_use_id = message.tool_call_id.clone().unwrap_or_default();
                    let result = message
                        .content
                        .iter()
                        .find_map(|p| match p {
                            ContentPart::ToolResult { result, .. } => Some(result.clone()),
                            _ => None,
                        })
                        .unwrap_or(Value::Null);
                    pending_tool_results.push(json!({
                        "type": "tool_result",
                        "tool_use_id": tool_use_id,
                        "content": serde_json::to_string(&result).unwrap_or_default(),
                    }));
                }
            }
        }
        flush(&mut pending_tool_results, &mut out);

        (system, out)
    }
}

/// Text blocks for a user/assistant message, filtering empty/whitespace-only
/// text while preserving an empty array when there is genuinely nothing.
fn text_blocks(message: &Message) -> Vec<Value> {
    message
        .content
        .iter()
        .filter_map(ContentPart::as_text)
        .filter(|t| !t.trim().is_empty())
        .map(|t| json!({ "type": "text", "text": t }))
        .collect()
}

impl Default for AnthropicCompat {
    fn default() -> Self {
        Self::new()
    }
}

impl Compat for AnthropicCompat {
    fn provider_name(&self) -> &'static str {
        "anthropic"
    }

    fn build_payload(
        &self,
        model: &str,
        settings: &Settings,
        messages: &[Message],
        tools: &[UnifiedTool],
        tool_choice: Option<&ToolChoice>,
        sanitizer: &mut NameSanitizer,
    ) -> Result<Value, CoordinatorError> {
        let include_reasoning = Self::reasoning_enabled(settings, messages);
        let (system, anthropic_messages) = Self::build_messages(messages, include_reasoning);

        let mut payload = serde_json::Map::new();
        payload.insert("model".to_string(), json!(model));
        payload.insert("max_tokens".to_string(), json!(settings.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)));
        payload.insert("messages".to_string(), Value::Array(anthropic_messages));
        if let Some(s) = system {
            payload.insert("system".to_string(), json!(s));
        }
        if let Some(t) = settings.temperature {
            payload.insert("temperature".to_string(), json!(t));
        }
        if let Some(p) = settings.top_p {
            payload.insert("top_p".to_string(), json!(p));
        }
        if !settings.stop.is_empty() {
            payload.insert("stop_sequences".to_string(), json!(settings.stop));
        }
        if include_reasoning {
            payload.insert(
                "thinking".to_string(),
                json!({ "type": "enabled", "budget_tokens": Self::thinking_budget(settings) }),
            );
        }
        // seed, penalties, logitBias, logprobs are silently dropped: unsupported by Anthropic.

        if !tools.is_empty() {
            payload.insert("tools".to_string(), self.serialize_tools(tools, sanitizer));
        }
        if let Some(choice) = tool_choice {
            payload.insert("tool_choice".to_string(), self.serialize_tool_choice(choice));
        }

        Ok(Value::Object(payload))
    }

    fn parse_response(&self, raw: &Value, model: &str) -> Result<LLMResponse, CoordinatorError> {
        let blocks = raw.get("content").and_then(Value::as_array).cloned().unwrap_or_default();

        let mut text = String::new();
        let mut reasoning_text = String::new();
        let mut tool_calls = Vec::new();

        for (i, block) in blocks.iter().enumerate() {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    if let Some(t) = block.get("text").and_then(Value::as_str) {
                        text.push_str(t);
                    }
                }
                Some("thinking") => {
                    if let Some(t) = block.get("text").and_then(Value::as_str) {
                        reasoning_text.push_str(t);
                    }
                }
                Some("tool_use") => {
                    let id = block
                        .get("id")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| crate::cloudllm::model::synthesize_call_id(i));
                    let name = block.get("name").and_then(Value::as_str).unwrap_or("").to_string();
                    let arguments = block.get("input").cloned().unwrap_or_else(|| json!({}));
                    tool_calls.push(ToolCall { id, name, arguments });
                }
                _ => {}
            }
        }

        let content = if text.is_empty() {
            vec![ContentPart::text("")]
        } else {
            vec![ContentPart::text(text)]
        };

        let reasoning = if reasoning_text.is_empty() {
            None
        } else {
            Some(Reasoning {
                text: reasoning_text,
                redacted: raw
                    .get("content")
                    .and_then(Value::as_array)
                    .and_then(|blocks| blocks.iter().find(|b| b.get("type").and_then(Value::as_str) == Some("thinking")))
                    .and_then(|b| b.get("redacted"))
                    .and_then(Value::as_bool),
                metadata: Default::default(),
            })
        };

        let usage = raw.get("usage").map(|u| Usage {
            prompt_tokens: u.get("input_tokens").and_then(Value::as_u64),
            completion_tokens: u.get("output_tokens").and_then(Value::as_u64),
            total_tokens: None,
            reasoning_tokens: None,
        });

        let finish_reason = raw
            .get("stop_reason")
            .and_then(Value::as_str)
            .map(finish_reason::map_anthropic);

        Ok(LLMResponse {
            provider: "anthropic".to_string(),
            model: model.to_string(),
            role: Role::Assistant,
            content,
            tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
            reasoning,
            usage,
            finish_reason,
            raw: Default::default(),
        })
    }

    fn parse_stream_chunk(&self, chunk: &Value, state: &mut StreamState) -> Result<ParsedChunk, CoordinatorError> {
        let mut out = ParsedChunk::default();
        let chunk_type = chunk.get("type").and_then(Value::as_str).unwrap_or("");

        match chunk_type {
            "message_start" | "message_stop" => {
                *state = StreamState::default();
            }
            "content_block_start" => {
                let index = chunk.get("index").and_then(Value::as_u64).map(|i| i.to_string());
                let content_block = chunk.get("content_block");
                let (index, content_block) = match (index, content_block) {
                    (Some(i), Some(cb)) if !cb.is_null() => (i, cb),
                    _ => {
                        return Err(CoordinatorError::BadResponse {
                            provider: "anthropic".to_string(),
                            message: "content_block_start with null index or content_block".to_string(),
                        })
                    }
                };
                match content_block.get("type").and_then(Value::as_str) {
                    Some("tool_use") => {
                        let call_id = content_block.get("id").and_then(Value::as_str).unwrap_or("").to_string();
                        let name = content_block.get("name").and_then(Value::as_str).unwrap_or("").to_string();
                        state.by_index.insert(index.clone(), ToolCallAccumulator { call_id: call_id.clone(), name: name.clone(), args_buf: String::new() });
                        out.tool_events.push(ToolEvent::ToolCallStart { call_id, name });
                        state.seen_tool_call_in_stream = true;
                    }
                    Some("thinking") => {
                        state.by_index.insert(
                            index,
                            ToolCallAccumulator { call_id: String::new(), name: THINKING_SENTINEL.to_string(), args_buf: String::new() },
                        );
                    }
                    _ => {}
                }
            }
            "content_block_delta" => {
                let index = chunk.get("index").and_then(Value::as_u64).map(|i| i.to_string());
                let delta = chunk.get("delta");
                let (index, delta) = match (index, delta) {
                    (Some(i), Some(d)) if !d.is_null() => (i, d),
                    _ => {
                        return Err(CoordinatorError::BadResponse {
                            provider: "anthropic".to_string(),
                            message: "content_block_delta with null index or delta".to_string(),
                        })
                    }
                };
                match delta.get("type").and_then(Value::as_str) {
                    Some("input_json_delta") => {
                        if let Some(partial) = delta.get("partial_json").and_then(Value::as_str) {
                            if let Some(acc) = state.by_index.get_mut(&index) {
                                acc.args_buf.push_str(partial);
                                out.tool_events.push(ToolEvent::ToolCallArgumentsDelta {
                                    call_id: acc.call_id.clone(),
                                    arguments_delta: partial.to_string(),
                                });
                            }
                            // unknown index: ignored
                        }
                    }
                    Some("text_delta") => {
                        if let Some(text) = delta.get("text").and_then(Value::as_str) {
                            if !text.is_empty() {
                                let is_thinking = state.by_index.get(&index).map(|a| a.name == THINKING_SENTINEL).unwrap_or(false);
                                if is_thinking {
                                    out.reasoning = Some(Reasoning { text: text.to_string(), redacted: None, metadata: Default::default() });
                                } else {
                                    out.text = Some(text.to_string());
                                }
                            }
                        }
                    }
                    _ => {
                        if let Some(r) = extract_reasoning_delta(chunk) {
                            out.reasoning = Some(r);
                        }
                    }
                }
            }
            "content_block_stop" => {
                if let Some(index) = chunk.get("index").and_then(Value::as_u64).map(|i| i.to_string()) {
                    if let Some(acc) = state.by_index.remove(&index) {
                        if acc.name != THINKING_SENTINEL {
                            out.tool_events.push(ToolEvent::ToolCallEnd { call_id: acc.call_id, name: acc.name, arguments: acc.args_buf });
                        }
                    }
                }
            }
            "message_delta" => {
                if let Some(stop_reason) = chunk.get("delta").and_then(|d| d.get("stop_reason")).and_then(Value::as_str) {
                    out.finish_reason = Some(finish_reason::map_anthropic(stop_reason));
                    if stop_reason == "tool_use" {
                        out.finished_with_tool_calls = true;
                    }
                }
                if let Some(usage) = chunk.get("usage") {
                    out.usage = Some(Usage {
                        prompt_tokens: usage.get("input_tokens").and_then(Value::as_u64),
                        completion_tokens: usage.get("output_tokens").and_then(Value::as_u64),
                        total_tokens: None,
                        reasoning_tokens: None,
                    });
                }
            }
            _ => {
                if let Some(r) = extract_reasoning_delta(chunk) {
                    out.reasoning = Some(r);
                }
            }
        }

        Ok(out)
    }

    fn serialize_tools(&self, tools: &[UnifiedTool], sanitizer: &mut NameSanitizer) -> Value {
        Value::Array(
            tools
                .iter()
                .map(|t| {
                    let sanitized = sanitizer.register(&t.name).unwrap_or_else(|_| t.name.clone());
                    json!({
                        "name": sanitized,
                        "description": t.description,
                        "input_schema": t.parameters_json_schema,
                    })
                })
                .collect(),
        )
    }

    fn serialize_tool_choice(&self, choice: &ToolChoice) -> Value {
        match choice {
            ToolChoice::Auto => json!({ "type": "auto" }),
            ToolChoice::None => json!({ "type": "none" }),
            ToolChoice::Single { name } => json!({ "type": "tool", "name": name }),
            ToolChoice::Required { .. } => json!({ "type": "any" }),
        }
    }
}

/// Handles the remaining documented reasoning-delta shapes: a top-level
/// `chunk.thinking` string, `delta.thinking` (string / `{text}` /
/// `{content:[{text}...]}`), or `delta.analysis`.
fn extract_reasoning_delta(chunk: &Value) -> Option<Reasoning> {
    let text = chunk
        .get("thinking")
        .and_then(Value::as_str)
        .or_else(|| chunk.get("delta").and_then(|d| d.get("thinking")).and_then(Value::as_str))
        .or_else(|| {
            chunk
                .get("delta")
                .and_then(|d| d.get("thinking"))
                .and_then(|t| t.get("text"))
                .and_then(Value::as_str)
        })
        .or_else(|| {
            chunk
                .get("delta")
                .and_then(|d| d.get("thinking"))
                .and_then(|t| t.get("content"))
                .and_then(Value::as_array)
                .and_then(|arr| arr.first())
                .and_then(|c| c.get("text"))
                .and_then(Value::as_str)
        })
        .or_else(|| chunk.get("delta").and_then(|d| d.get("analysis")).and_then(Value::as_str));

    match text {
        Some(t) if !t.is_empty() => Some(Reasoning { text: t.to_string(), redacted: None, metadata: Default::default() }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_first_system_message_is_extracted() {
        let compat = AnthropicCompat::new();
        let mut sanitizer = NameSanitizer::new();
        let messages = vec![Message::system("first"), Message::system("second"), Message::user("hi")];
        let payload = compat.build_payload("claude-sonnet-4-0", &Settings::default(), &messages, &[], None, &mut sanitizer).unwrap();
        assert_eq!(payload["system"], json!("first"));
    }

    #[test]
    fn max_tokens_defaults_to_8192() {
        let compat = AnthropicCompat::new();
        let mut sanitizer = NameSanitizer::new();
        let payload = compat.build_payload("claude-sonnet-4-0", &Settings::default(), &[Message::user("hi")], &[], None, &mut sanitizer).unwrap();
        assert_eq!(payload["max_tokens"], json!(8192));
    }

    #[test]
    fn tool_results_are_synthesized_into_a_user_message() {
        let compat = AnthropicCompat::new();
        let mut sanitizer = NameSanitizer::new();
        let mut assistant = Message::assistant("");
        assistant.tool_calls = Some(vec![ToolCall { id: "call_0".into(), name: "echo".into(), arguments: json!({}) }]);
        let tool_msg = Message::tool_result("call_0", "echo", json!({"ok": true}));
        let messages = vec![Message::user("go"), assistant, tool_msg];
        let payload = compat.build_payload("claude-sonnet-4-0", &Settings::default(), &messages, &[], None, &mut sanitizer).unwrap();
        let last = payload["messages"].as_array().unwrap().last().unwrap();
        assert_eq!(last["role"], "user");
        assert_eq!(last["content"][0]["type"], "tool_result");
        assert_eq!(last["content"][0]["tool_use_id"], "call_0");
    }

    #[test]
    fn reasoning_omitted_unless_every_assistant_turn_has_it() {
        let settings = Settings { reasoning: Some(crate::cloudllm::model::ReasoningSettings { enabled: true, ..Default::default() }), ..Default::default() };
        let with_reasoning = Message { reasoning: Some(Reasoning { text: "thinking...".into(), ..Default::default() }), ..Message::assistant("hi") };
        let without_reasoning = Message::assistant("bye");
        assert!(AnthropicCompat::reasoning_enabled(&settings, &[with_reasoning.clone()]));
        assert!(!AnthropicCompat::reasoning_enabled(&settings, &[with_reasoning, without_reasoning]));
    }

    #[test]
    fn stream_tool_use_start_delta_end_and_finish() {
        let compat = AnthropicCompat::new();
        let mut state = StreamState::default();

        let start = json!({ "type": "content_block_start", "index": 0, "content_block": { "type": "tool_use", "id": "call-1", "name": "echo" } });
        let p = compat.parse_stream_chunk(&start, &mut state).unwrap();
        assert!(matches!(p.tool_events[0], ToolEvent::ToolCallStart { .. }));

        let delta1 = json!({ "type": "content_block_delta", "index": 0, "delta": { "type": "input_json_delta", "partial_json": "{\"text\":" } });
        compat.parse_stream_chunk(&delta1, &mut state).unwrap();
        let delta2 = json!({ "type": "content_block_delta", "index": 0, "delta": { "type": "input_json_delta", "partial_json": "\"hi\"}" } });
        compat.parse_stream_chunk(&delta2, &mut state).unwrap();

        let stop = json!({ "type": "content_block_stop", "index": 0 });
        let p = compat.parse_stream_chunk(&stop, &mut state).unwrap();
        match &p.tool_events[0] {
            ToolEvent::ToolCallEnd { arguments, .. } => assert_eq!(arguments, "{\"text\":\"hi\"}"),
            other => panic!("expected END, got {:?}", other),
        }

        let message_delta = json!({ "type": "message_delta", "delta": { "stop_reason": "tool_use" } });
        let p = compat.parse_stream_chunk(&message_delta, &mut state).unwrap();
        assert!(p.finished_with_tool_calls);
    }

    #[test]
    fn null_content_block_on_start_is_an_error() {
        let compat = AnthropicCompat::new();
        let mut state = StreamState::default();
        let chunk = json!({ "type": "content_block_start", "index": 0, "content_block": null });
        assert!(compat.parse_stream_chunk(&chunk, &mut state).is_err());
    }

    #[test]
    fn message_start_clears_prior_stream_state() {
        let compat = AnthropicCompat::new();
        let mut state = StreamState::default();
        state.seen_tool_call_in_stream = true;
        state.by_index.insert("0".to_string(), ToolCallAccumulator::default());
        compat.parse_stream_chunk(&json!({ "type": "message_start" }), &mut state).unwrap();
        assert!(!state.seen_tool_call_in_stream);
        assert!(state.by_index.is_empty());
    }
}
