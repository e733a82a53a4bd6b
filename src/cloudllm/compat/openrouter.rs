//! OpenRouter: rides the OpenAI chat-completions wire shape and layers a
//! small set of provider-routing extension keys on top.

use super::openai::OpenAiCompat;
use super::{Compat, ParsedChunk, StreamState};
use crate::cloudllm::error::CoordinatorError;
use crate::cloudllm::model::{LLMResponse, Message, Settings, ToolChoice, UnifiedTool};
use crate::cloudllm::sanitizer::NameSanitizer;
use serde_json::Value;
use std::collections::HashMap;

/// Extension keys OpenRouter recognizes on top of the OpenAI request body.
const EXTENSION_KEYS: &[&str] = &["provider", "transforms", "route", "models"];

pub struct OpenRouterCompat {
    inner: OpenAiCompat,
}

impl OpenRouterCompat {
    pub fn new() -> Self {
        OpenRouterCompat { inner: OpenAiCompat::new() }
    }
}

impl Default for OpenRouterCompat {
    fn default() -> Self {
        Self::new()
    }
}

impl Compat for OpenRouterCompat {
    fn provider_name(&self) -> &'static str {
        "openrouter"
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
        let payload = self.inner.build_payload(model, settings, messages, tools, tool_choice, sanitizer)?;
        Ok(self.apply_provider_extensions(payload, &settings.extras))
    }

    fn parse_response(&self, raw: &Value, model: &str) -> Result<LLMResponse, CoordinatorError> {
        self.inner.parse_response(raw, model)
    }

    fn new_stream_state(&self) -> StreamState {
        self.inner.new_stream_state()
    }

    fn parse_stream_chunk(&self, chunk: &Value, state: &mut StreamState) -> Result<ParsedChunk, CoordinatorError> {
        self.inner.parse_stream_chunk(chunk, state)
    }

    fn serialize_tools(&self, tools: &[UnifiedTool], sanitizer: &mut NameSanitizer) -> Value {
        self.inner.serialize_tools(tools, sanitizer)
    }

    fn serialize_tool_choice(&self, choice: &ToolChoice) -> Value {
        self.inner.serialize_tool_choice(choice)
    }

    fn apply_provider_extensions(&self, payload: Value, extras: &HashMap<String, Value>) -> Value {
        let mut payload = payload;
        if let Some(obj) = payload.as_object_mut() {
            for key in EXTENSION_KEYS {
                if let Some(v) = extras.get(*key) {
                    obj.insert(key.to_string(), v.clone());
                }
            }
        }
        payload
    }

    fn recognized_extension_keys(&self) -> &'static [&'static str] {
        EXTENSION_KEYS
    }
}
