//! OpenAI chat-completions wire format.

use super::{finish_reason, normalize_arguments, Compat, ParsedChunk, StreamState, ToolCallAccumulator};
use crate::cloudllm::error::CoordinatorError;
use crate::cloudllm::model::{
    ContentPart, LLMResponse, Message, Role, Settings, ToolCall, ToolChoice, ToolEvent, UnifiedTool, Usage,
};
use crate::cloudllm::sanitizer::NameSanitizer;
use serde_json::{json, Value};

pub struct OpenAiCompat;

impl OpenAiCompat {
    pub fn new() -> Self {
        OpenAiCompat
    }

    fn role_str(role: Role) -> &'static str {
        match role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    fn message_to_json(message: &Message, sanitizer: &mut NameSanitizer) -> Value {
        let mut obj = serde_json::Map::new();
        obj.insert("role".to_string(), json!(Self::role_str(message.role)));

        let content_value = if message.role == Role::Tool {
            let result = message.content.iter().find_map(|p| match p {
                ContentPart::ToolResult { result, .. } => Some(result),
                _ => None,
            });
            match result {
                Some(Value::String(s)) => json!(s),
                Some(other) => json!(other.to_string()),
                None => json!(""),
            }
        } else {
            let text_parts: Vec<&str> = message.content.iter().filter_map(ContentPart::as_text).collect();
            if message.role == Role::Assistant && text_parts.is_empty() {
                json!("")
            } else {
                json!(text_parts.join(""))
            }
        };
        obj.insert("content".to_string(), content_value);

        if let Some(calls) = &message.tool_calls {
            let tool_calls: Vec<Value> = calls
                .iter()
                .map(|c| {
                    json!({
                        "id": c.id,
                        "type": "function",
                        "function": {
                            "name": c.name,
                            "arguments": serde_json::to_string(&c.arguments).unwrap_or_else(|_| "{}".to_string()),
                        }
                    })
                })
                .collect();
            obj.insert("tool_calls".to_string(), Value::Array(tool_calls));
        }

        if let Some(tool_call_id) = &message.tool_call_id {
            obj.insert("tool_call_id".to_string(), json!(tool_call_id));
        }

        if let Some(name) = &message.name {
            obj.insert("name".to_string(), json!(sanitizer.register(name).unwrap_or_else(|_| name.clone())));
        }

        Value::Object(obj)
    }
}

impl Default for OpenAiCompat {
    fn default() -> Self {
        Self::new()
    }
}

impl Compat for OpenAiCompat {
    fn provider_name(&self) -> &'static str {
        "openai"
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
        let mut payload = serde_json::Map::new();
        payload.insert("model".to_string(), json!(model));
        payload.insert(
            "messages".to_string(),
            Value::Array(messages.iter().map(|m| Self::message_to_json(m, sanitizer)).collect()),
        );

        if let Some(t) = settings.temperature {
            payload.insert("temperature".to_string(), json!(t));
        }
        if let Some(p) = settings.top_p {
            payload.insert("top_p".to_string(), json!(p));
        }
        if let Some(mt) = settings.max_tokens {
            payload.insert("max_tokens".to_string(), json!(mt));
        }
        if !settings.stop.is_empty() {
            payload.insert("stop".to_string(), json!(settings.stop));
        }
        if let Some(seed) = settings.seed {
            payload.insert("seed".to_string(), json!(seed));
        }
        if let Some(fp) = settings.frequency_penalty {
            payload.insert("frequency_penalty".to_string(), json!(fp));
        }
        if let Some(pp) = settings.presence_penalty {
            payload.insert("presence_penalty".to_string(), json!(pp));
        }
        if let Some(lb) = &settings.logit_bias {
            payload.insert("logit_bias".to_string(), lb.clone());
        }
        if let Some(lp) = settings.logprobs {
            payload.insert("logprobs".to_string(), json!(lp));
        }
        if let Some(tlp) = settings.top_logprobs {
            payload.insert("top_logprobs".to_string(), json!(tlp));
        }
        if let Some(rf) = &settings.response_format {
            payload.insert("response_format".to_string(), rf.clone());
        }

        if !tools.is_empty() {
            payload.insert("tools".to_string(), self.serialize_tools(tools, sanitizer));
        }
        if let Some(choice) = tool_choice {
            payload.insert("tool_choice".to_string(), self.serialize_tool_choice(choice));
        }

        Ok(Value::Object(payload))
    }

    fn parse_response(&self, raw: &Value, model: &str) -> Result<LLMResponse, CoordinatorError> {
        let choice = raw.get("choices").and_then(|c| c.get(0)).cloned().unwrap_or(Value::Null);
        let message = choice.get("message").cloned().unwrap_or(Value::Null);

        let text = message.get("content").and_then(Value::as_str).unwrap_or("").to_string();
        let content = if text.is_empty() && message.get("content").map(Value::is_null).unwrap_or(true) {
            vec![ContentPart::text("")]
        } else {
            vec![ContentPart::text(text)]
        };

        let tool_calls = message.get("tool_calls").and_then(Value::as_array).map(|arr| {
            arr.iter()
                .enumerate()
                .map(|(i, tc)| {
                    let id = tc
                        .get("id")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| crate::cloudllm::model::synthesize_call_id(i));
                    let name = tc
                        .get("function")
                        .and_then(|f| f.get("name"))
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string();
                    let args_str = tc.get("function").and_then(|f| f.get("arguments")).and_then(Value::as_str);
                    ToolCall {
                        id,
                        name,
                        arguments: normalize_arguments(args_str),
                    }
                })
                .collect::<Vec<_>>()
        });

        let usage = raw.get("usage").map(|u| Usage {
            prompt_tokens: field_u64(u, "prompt_tokens"),
            completion_tokens: field_u64(u, "completion_tokens"),
            total_tokens: field_u64(u, "total_tokens"),
            reasoning_tokens: u
                .get("completion_tokens_details")
                .and_then(|d| field_u64(d, "reasoning_tokens")),
        });

        let finish_reason = choice
            .get("finish_reason")
            .and_then(Value::as_str)
            .map(finish_reason::map_openai);

        Ok(LLMResponse {
            provider: "openai".to_string(),
            model: model.to_string(),
            role: Role::Assistant,
            content,
            tool_calls,
            reasoning: None,
            usage,
            finish_reason,
            raw: Default::default(),
        })
    }

    fn parse_stream_chunk(&self, chunk: &Value, state: &mut StreamState) -> Result<ParsedChunk, CoordinatorError> {
        let mut out = ParsedChunk::default();
        let choice = chunk.get("choices").and_then(|c| c.get(0));
        let delta = choice.and_then(|c| c.get("delta"));

        if let Some(text) = delta.and_then(|d| d.get("content")).and_then(Value::as_str) {
            if !text.is_empty() {
                out.text = Some(text.to_string());
            }
        }

        let mut carried_tool_calls_delta = false;
        if let Some(tool_calls) = delta.and_then(|d| d.get("tool_calls")).and_then(Value::as_array) {
            carried_tool_calls_delta = true;
            for tc in tool_calls {
                let index = tc.get("index").and_then(Value::as_u64).unwrap_or(0).to_string();
                let has_new_call = tc.get("id").and_then(Value::as_str).is_some()
                    && tc.get("function").and_then(|f| f.get("name")).and_then(Value::as_str).is_some();

                if has_new_call && !state.by_index.contains_key(&index) {
                    let call_id = tc.get("id").and_then(Value::as_str).unwrap_or("").to_string();
                    let name = tc.get("function").and_then(|f| f.get("name")).and_then(Value::as_str).unwrap_or("").to_string();
                    state.by_index.insert(
                        index.clone(),
                        ToolCallAccumulator { call_id: call_id.clone(), name: name.clone(), args_buf: String::new() },
                    );
                    out.tool_events.push(ToolEvent::ToolCallStart { call_id, name });
                    state.seen_tool_call_in_stream = true;
                }

                if let Some(acc) = state.by_index.get_mut(&index) {
                    if let Some(args_delta) = tc.get("function").and_then(|f| f.get("arguments")).and_then(Value::as_str) {
                        acc.args_buf.push_str(args_delta);
                        out.tool_events.push(ToolEvent::ToolCallArgumentsDelta {
                            call_id: acc.call_id.clone(),
                            arguments_delta: args_delta.to_string(),
                        });
                    }
                }
                // unknown index with no prior registration and no new-call id: ignored (no crash).
            }
        }

        let finish_reason = choice.and_then(|c| c.get("finish_reason")).and_then(Value::as_str);
        if let Some(reason) = finish_reason {
            out.finish_reason = Some(finish_reason::map_openai(reason));
            if reason == "tool_calls" {
                if carried_tool_calls_delta {
                    if let Some(tool_calls) = delta.and_then(|d| d.get("tool_calls")).and_then(Value::as_array) {
                        for tc in tool_calls {
                            let index = tc.get("index").and_then(Value::as_u64).unwrap_or(0).to_string();
                            if let Some(acc) = state.by_index.get(&index) {
                                out.tool_events.push(ToolEvent::ToolCallEnd {
                                    call_id: acc.call_id.clone(),
                                    name: acc.name.clone(),
                                    arguments: acc.args_buf.clone(),
                                });
                            }
                        }
                    }
                } else {
                    out.finished_with_tool_calls = true;
                }
            }
        }

        if let Some(usage) = chunk.get("usage") {
            out.usage = Some(Usage {
                prompt_tokens: field_u64(usage, "prompt_tokens"),
                completion_tokens: field_u64(usage, "completion_tokens"),
                total_tokens: field_u64(usage, "total_tokens"),
                reasoning_tokens: usage.get("completion_tokens_details").and_then(|d| field_u64(d, "reasoning_tokens")),
            });
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
                        "type": "function",
                        "function": {
                            "name": sanitized,
                            "description": t.description,
                            "parameters": t.parameters_json_schema,
                        }
                    })
                })
                .collect(),
        )
    }

    fn serialize_tool_choice(&self, choice: &ToolChoice) -> Value {
        match choice {
            ToolChoice::Auto => json!("auto"),
            ToolChoice::None => json!("none"),
            ToolChoice::Single { name } => json!({ "type": "function", "function": { "name": name } }),
            ToolChoice::Required { allowed } if allowed.len() == 1 => {
                json!({ "type": "function", "function": { "name": allowed[0] } })
            }
            ToolChoice::Required { .. } => json!("required"),
        }
    }
}

fn field_u64(v: &Value, key: &str) -> Option<u64> {
    v.get(key).and_then(Value::as_u64)
}
