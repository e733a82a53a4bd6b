//! Google Gemini `generateContent` wire format.
//!
//! Grounded in the teacher's `clients/gemini.rs` for the `Model` enum shape
//! and the pattern of constructing raw `serde_json::json!` bodies against a
//! non-OpenAI-compatible endpoint (seen there in `generate_image`); the
//! chat-completion path itself is written fresh since the teacher delegates
//! that path to an OpenAI-compatible shim.

use super::{finish_reason, Compat, ParsedChunk, StreamState, ToolCallAccumulator};
use crate::cloudllm::error::CoordinatorError;
use crate::cloudllm::model::{
    synthesize_call_id, ContentPart, LLMResponse, Message, Reasoning, Role, Settings, ToolCall, ToolChoice, ToolEvent,
    UnifiedTool, Usage,
};
use crate::cloudllm::sanitizer::NameSanitizer;
use crate::cloudllm::schema_converter::to_gemini_schema;
use serde_json::{json, Value};

pub struct GeminiCompat;

impl GeminiCompat {
    pub fn new() -> Self {
        GeminiCompat
    }

    fn role_str(role: Role) -> &'static str {
        match role {
            Role::Assistant => "model",
            // user, tool, and any stray system turns all ride as "user" content parts
            _ => "user",
        }
    }

    fn message_to_part(part: &ContentPart, sanitizer: &mut NameSanitizer) -> Option<Value> {
        match part {
            ContentPart::Text { text } => Some(json!({ "text": text })),
            ContentPart::ToolResult { tool_name, result } => {
                let name = sanitizer.register(tool_name).unwrap_or_else(|_| tool_name.clone());
                Some(json!({
                    "functionResponse": { "name": name, "response": Self::function_response_body(result) }
                }))
            }
            _ => None,
        }
    }

    /// `{ output: joined-text }` when `result` carries text (a bare string, or
    /// an array of strings joined with `\n`); the raw value otherwise.
    fn function_response_body(result: &Value) -> Value {
        match result {
            Value::String(s) => json!({ "output": s }),
            Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_string) => {
                let joined = items.iter().filter_map(Value::as_str).collect::<Vec<_>>().join("\n");
                json!({ "output": joined })
            }
            other => other.clone(),
        }
    }
}

impl Default for GeminiCompat {
    fn default() -> Self {
        Self::new()
    }
}

impl Compat for GeminiCompat {
    fn provider_name(&self) -> &'static str {
        "google"
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
        let mut system_parts: Vec<String> = Vec::new();
        let mut contents: Vec<Value> = Vec::new();

        for message in messages {
            if message.role == Role::System {
                system_parts.push(message.text());
                continue;
            }

            let mut parts: Vec<Value> = message.content.iter().filter_map(|part| Self::message_to_part(part, sanitizer)).collect();

            if let Some(calls) = &message.tool_calls {
                for c in calls {
                    parts.push(json!({ "functionCall": { "name": c.name, "args": c.arguments } }));
                }
            }

            if parts.is_empty() {
                parts.push(json!({ "text": "" }));
            }

            contents.push(json!({ "role": Self::role_str(message.role), "parts": parts }));
        }

        let mut payload = serde_json::Map::new();
        payload.insert("model".to_string(), json!(model));
        payload.insert("contents".to_string(), Value::Array(contents));

        if !system_parts.is_empty() {
            payload.insert(
                "systemInstruction".to_string(),
                json!({ "parts": [{ "text": system_parts.join("\n") }] }),
            );
        }

        let mut generation_config = serde_json::Map::new();
        if let Some(t) = settings.temperature {
            generation_config.insert("temperature".to_string(), json!(t));
        }
        if let Some(p) = settings.top_p {
            generation_config.insert("topP".to_string(), json!(p));
        }
        if let Some(m) = settings.max_tokens {
            generation_config.insert("maxOutputTokens".to_string(), json!(m));
        }
        if !settings.stop.is_empty() {
            generation_config.insert("stopSequences".to_string(), json!(settings.stop));
        }
        if let Some(reasoning) = &settings.reasoning {
            if reasoning.enabled {
                let mut thinking = serde_json::Map::new();
                thinking.insert("includeThoughts".to_string(), json!(true));
                if let Some(budget) = reasoning.budget.or(settings.reasoning_budget) {
                    thinking.insert("thinkingBudget".to_string(), json!(budget));
                }
                generation_config.insert("thinkingConfig".to_string(), Value::Object(thinking));
            }
        }
        if !generation_config.is_empty() {
            payload.insert("generationConfig".to_string(), Value::Object(generation_config));
        }

        if !tools.is_empty() {
            payload.insert("tools".to_string(), self.serialize_tools(tools, sanitizer));
        }
        if let Some(choice) = tool_choice {
            payload.insert("toolConfig".to_string(), self.serialize_tool_choice(choice));
        }

        Ok(Value::Object(payload))
    }

    fn parse_response(&self, raw: &Value, model: &str) -> Result<LLMResponse, CoordinatorError> {
        let candidate = raw
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|arr| arr.first())
            .ok_or_else(|| CoordinatorError::BadResponse {
                provider: "google".to_string(),
                message: "no candidates in response".to_string(),
            })?;

        let parts = candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut text = String::new();
        let mut reasoning_text = String::new();
        let mut tool_calls = Vec::new();

        for (i, part) in parts.iter().enumerate() {
            if let Some(t) = part.get("text").and_then(Value::as_str) {
                if part.get("thought").and_then(Value::as_bool).unwrap_or(false) {
                    reasoning_text.push_str(t);
                } else {
                    text.push_str(t);
                }
            } else if let Some(fc) = part.get("functionCall") {
                let name = fc.get("name").and_then(Value::as_str).unwrap_or("").to_string();
                let arguments = fc.get("args").cloned().unwrap_or_else(|| json!({}));
                tool_calls.push(ToolCall { id: synthesize_call_id(i), name, arguments });
            }
        }

        let content = vec![ContentPart::text(text)];
        let reasoning = if reasoning_text.is_empty() {
            None
        } else {
            Some(Reasoning { text: reasoning_text, redacted: None, metadata: Default::default() })
        };

        let usage = raw.get("usageMetadata").map(|u| Usage {
            prompt_tokens: u.get("promptTokenCount").and_then(Value::as_u64),
            completion_tokens: u.get("candidatesTokenCount").and_then(Value::as_u64),
            total_tokens: u.get("totalTokenCount").and_then(Value::as_u64),
            reasoning_tokens: u.get("thoughtsTokenCount").and_then(Value::as_u64),
        });

        let finish_reason = candidate.get("finishReason").and_then(Value::as_str).map(finish_reason::map_google);

        Ok(LLMResponse {
            provider: "google".to_string(),
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

    /// Gemini's stream carries a complete candidate per chunk rather than an
    /// incremental token delta; each chunk is parsed like a full response and
    /// only the first `functionCall` part within a chunk is processed.
    fn parse_stream_chunk(&self, chunk: &Value, state: &mut StreamState) -> Result<ParsedChunk, CoordinatorError> {
        let mut out = ParsedChunk::default();

        let candidate = match chunk.get("candidates").and_then(Value::as_array).and_then(|a| a.first()) {
            Some(c) => c,
            None => return Ok(out),
        };

        let parts = candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut function_call_processed = false;
        for part in &parts {
            if let Some(t) = part.get("text").and_then(Value::as_str) {
                if t.is_empty() {
                    continue;
                }
                if part.get("thought").and_then(Value::as_bool).unwrap_or(false) {
                    out.reasoning = Some(Reasoning { text: t.to_string(), redacted: None, metadata: Default::default() });
                } else {
                    out.text = Some(out.text.take().unwrap_or_default() + t);
                }
            } else if let Some(fc) = part.get("functionCall") {
                if function_call_processed {
                    continue;
                }
                function_call_processed = true;
                let name = fc.get("name").and_then(Value::as_str).unwrap_or("").to_string();
                let args = fc.get("args").cloned().unwrap_or_else(|| json!({}));
                let index = state.by_index.len().to_string();
                let call_id = synthesize_call_id(state.by_index.len());
                state.by_index.insert(
                    index,
                    ToolCallAccumulator { call_id: call_id.clone(), name: name.clone(), args_buf: args.to_string() },
                );
                state.seen_tool_call_in_stream = true;
                out.tool_events.push(ToolEvent::ToolCallStart { call_id: call_id.clone(), name: name.clone() });
                out.tool_events.push(ToolEvent::ToolCallArgumentsDelta { call_id: call_id.clone(), arguments_delta: args.to_string() });
                out.tool_events.push(ToolEvent::ToolCallEnd { call_id, name, arguments: args.to_string() });
                out.finished_with_tool_calls = true;
            }
        }

        if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
            out.finish_reason = Some(finish_reason::map_google(reason));
        }

        if let Some(usage) = chunk.get("usageMetadata") {
            out.usage = Some(Usage {
                prompt_tokens: usage.get("promptTokenCount").and_then(Value::as_u64),
                completion_tokens: usage.get("candidatesTokenCount").and_then(Value::as_u64),
                total_tokens: usage.get("totalTokenCount").and_then(Value::as_u64),
                reasoning_tokens: usage.get("thoughtsTokenCount").and_then(Value::as_u64),
            });
        }

        Ok(out)
    }

    fn serialize_tools(&self, tools: &[UnifiedTool], sanitizer: &mut NameSanitizer) -> Value {
        let declarations: Vec<Value> = tools
            .iter()
            .map(|t| {
                let sanitized = sanitizer.register(&t.name).unwrap_or_else(|_| t.name.clone());
                json!({
                    "name": sanitized,
                    "description": t.description,
                    "parameters": to_gemini_schema(&t.parameters_json_schema),
                })
            })
            .collect();
        json!([{ "functionDeclarations": declarations }])
    }

    fn serialize_tool_choice(&self, choice: &ToolChoice) -> Value {
        match choice {
            ToolChoice::Auto => json!({ "functionCallingConfig": { "mode": "AUTO" } }),
            ToolChoice::None => json!({ "functionCallingConfig": { "mode": "NONE" } }),
            ToolChoice::Single { name } => json!({ "functionCallingConfig": { "mode": "ANY", "allowedFunctionNames": [name] } }),
            ToolChoice::Required { allowed } => json!({ "functionCallingConfig": { "mode": "ANY", "allowedFunctionNames": allowed } }),
        }
    }
}
