//! Per-provider-family normalization. Each [`Compat`] implementation builds
//! a provider-native request payload, parses a full response, and parses
//! streaming chunks against explicit, stream-scoped [`StreamState`].
//!
//! A fresh [`StreamState`] is created at the start of every stream and
//! dropped at the end; it is never shared across streams (§5).

pub mod anthropic;
pub mod finish_reason;
pub mod gemini;
pub mod openai;
pub mod openrouter;

use crate::cloudllm::error::CoordinatorError;
use crate::cloudllm::model::{LLMResponse, Message, Reasoning, ToolChoice, ToolEvent, UnifiedTool, Usage};
use crate::cloudllm::sanitizer::NameSanitizer;
use std::collections::HashMap;

/// Accumulator for one in-flight tool call within a single stream.
#[derive(Debug, Clone, Default)]
pub struct ToolCallAccumulator {
    pub call_id: String,
    pub name: String,
    pub args_buf: String,
}

/// Per-stream state: index→accumulator map, whether any tool call has been
/// seen in this stream, and the rolling reasoning accumulator. Scoped to one
/// stream; a new stream always gets a new, empty instance.
#[derive(Debug, Clone, Default)]
pub struct StreamState {
    pub by_index: HashMap<String, ToolCallAccumulator>,
    pub seen_tool_call_in_stream: bool,
    pub reasoning_accumulator: Reasoning,
}

/// The normalized result of parsing one streaming chunk.
#[derive(Debug, Clone, Default)]
pub struct ParsedChunk {
    pub text: Option<String>,
    pub reasoning: Option<Reasoning>,
    pub tool_events: Vec<ToolEvent>,
    pub usage: Option<Usage>,
    pub finished_with_tool_calls: bool,
    pub finish_reason: Option<String>,
}

/// The capability set every provider family implements (§4.3).
pub trait Compat: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// Builds the provider-native request body for a blocking or streaming call.
    fn build_payload(
        &self,
        model: &str,
        settings: &crate::cloudllm::model::Settings,
        messages: &[Message],
        tools: &[UnifiedTool],
        tool_choice: Option<&ToolChoice>,
        sanitizer: &mut NameSanitizer,
    ) -> Result<serde_json::Value, CoordinatorError>;

    /// Parses a full (non-streaming) response into the unified shape.
    fn parse_response(&self, raw: &serde_json::Value, model: &str) -> Result<LLMResponse, CoordinatorError>;

    /// A fresh, empty stream state for a new stream.
    fn new_stream_state(&self) -> StreamState {
        StreamState::default()
    }

    /// Parses one streaming chunk against `state`, mutating it in place.
    fn parse_stream_chunk(
        &self,
        chunk: &serde_json::Value,
        state: &mut StreamState,
    ) -> Result<ParsedChunk, CoordinatorError>;

    /// Request-body patch needed to turn on streaming (`{}` for SDK providers
    /// that take a separate flag).
    fn streaming_flags(&self) -> serde_json::Value {
        serde_json::json!({ "stream": true })
    }

    fn serialize_tools(&self, tools: &[UnifiedTool], sanitizer: &mut NameSanitizer) -> serde_json::Value;

    fn serialize_tool_choice(&self, choice: &ToolChoice) -> serde_json::Value;

    /// Forwards known provider extension keys from `extras` onto `payload`;
    /// unknown keys are dropped (caller logs the warning).
    fn apply_provider_extensions(
        &self,
        payload: serde_json::Value,
        extras: &HashMap<String, serde_json::Value>,
    ) -> serde_json::Value {
        let _ = extras;
        payload
    }

    /// `providerExtras` keys this provider forwards via
    /// [`Compat::apply_provider_extensions`]. Empty for providers with no
    /// extension points; the caller logs a warning for every `extras` key
    /// outside this set (§3 Settings).
    fn recognized_extension_keys(&self) -> &'static [&'static str] {
        &[]
    }
}

/// Logs `warn!("Extra field not supported: '<key>'")` for every `extras` key
/// a provider's [`Compat::recognized_extension_keys`] does not name (§3
/// Settings). Call once per outgoing request, after
/// `apply_provider_extensions`.
pub fn warn_on_unrecognized_extras(
    provider: &str,
    extras: &HashMap<String, serde_json::Value>,
    recognized: &[&str],
) {
    for key in extras.keys() {
        if !recognized.contains(&key.as_str()) {
            log::warn!("{}: Extra field not supported: '{}'", provider, key);
        }
    }
}

/// `content: null/undefined/[]` normalizes to a single empty text part.
pub fn empty_content_if_null(content: Option<Vec<crate::cloudllm::model::ContentPart>>) -> Vec<crate::cloudllm::model::ContentPart> {
    match content {
        Some(parts) if !parts.is_empty() => parts,
        _ => vec![crate::cloudllm::model::ContentPart::text("")],
    }
}

/// Missing/null/empty-string arguments normalize to `{}`.
pub fn normalize_arguments(raw: Option<&str>) -> serde_json::Value {
    match raw {
        None => serde_json::json!({}),
        Some(s) if s.trim().is_empty() => serde_json::json!({}),
        Some(s) => serde_json::from_str(s).unwrap_or_else(|_| serde_json::json!({})),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_content_becomes_single_empty_text_part() {
        let parts = empty_content_if_null(None);
        assert_eq!(parts, vec![crate::cloudllm::model::ContentPart::text("")]);
        let parts = empty_content_if_null(Some(vec![]));
        assert_eq!(parts, vec![crate::cloudllm::model::ContentPart::text("")]);
    }

    #[test]
    fn normalize_arguments_handles_missing_null_and_empty() {
        assert_eq!(normalize_arguments(None), serde_json::json!({}));
        assert_eq!(normalize_arguments(Some("")), serde_json::json!({}));
        assert_eq!(normalize_arguments(Some("  ")), serde_json::json!({}));
        assert_eq!(normalize_arguments(Some(r#"{"a":1}"#)), serde_json::json!({"a":1}));
    }
}
