//! Unified data model shared by every Compat module and both coordinators.
//!
//! Everything here is provider-agnostic: a [`Message`] built by a caller, or
//! returned in an [`LLMResponse`], never carries provider-specific shape.
//! Normalizing to and from the wire formats is the job of `crate::cloudllm::compat`.
//!
//! ```rust
//! use llm_coordinator::cloudllm::model::{Message, Role, ContentPart};
//!
//! let msg = Message::user("hello");
//! assert_eq!(msg.role, Role::User);
//! assert_eq!(msg.content, vec![ContentPart::Text { text: "hello".to_string() }]);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Conversational role. Ordering within a history is significant; duplicates are allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One piece of message content. Tagged union mirroring the provider-neutral content model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Image {
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        base64: Option<Vec<u8>>,
        #[serde(skip_serializing_if = "Option::is_none", rename = "mimeType")]
        mime_type: Option<String>,
    },
    Document {
        source: DocumentSource,
    },
    ToolResult {
        #[serde(rename = "toolName")]
        tool_name: String,
        result: serde_json::Value,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    /// The text of this part, if it is (or carries) text; `None` for image/document.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text { text } => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DocumentSource {
    FilePath { #[serde(rename = "filePath")] file_path: String },
    Url { url: String },
    Base64 { base64: Vec<u8> },
}

/// A tool invocation the model asked for. `id` is unique within a single response;
/// see [`crate::cloudllm::model::synthesize_call_id`] for the fallback rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Synthesizes the deterministic fallback id for a tool call missing a provider id.
pub fn synthesize_call_id(index: usize) -> String {
    format!("call_{}", index)
}

/// Accumulated reasoning/thinking content for an assistant turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reasoning {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redacted: Option<bool>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Reasoning {
    /// Merges another reasoning segment into this one: text concatenates in arrival
    /// order, metadata merges last-writer-wins per key.
    pub fn merge(&mut self, other: Reasoning) {
        self.text.push_str(&other.text);
        if let Some(r) = other.redacted {
            self.redacted = Some(r);
        }
        for (k, v) in other.metadata {
            self.metadata.insert(k, v);
        }
    }
}

/// Token accounting. Every field distinguishes "absent" (`None`) from "zero" (`Some(0)`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default, rename = "promptTokens", skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, rename = "completionTokens", skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(default, rename = "totalTokens", skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, rename = "reasoningTokens", skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
}

/// One message in a working conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
    #[serde(default, rename = "toolCalls", skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, rename = "toolCallId", skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<Reasoning>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self::plain(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::plain(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, text)
    }

    fn plain(role: Role, text: impl Into<String>) -> Self {
        Message {
            role,
            content: vec![ContentPart::text(text)],
            tool_calls: None,
            tool_call_id: None,
            reasoning: None,
            name: None,
        }
    }

    /// A `tool` role message carrying the result of one invocation.
    pub fn tool_result(tool_call_id: impl Into<String>, tool_name: impl Into<String>, result: serde_json::Value) -> Self {
        Message {
            role: Role::Tool,
            content: vec![ContentPart::ToolResult {
                tool_name: tool_name.into(),
                result,
            }],
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            reasoning: None,
            name: None,
        }
    }

    /// Concatenation of every text content part, joined with no separator.
    pub fn text(&self) -> String {
        self.content.iter().filter_map(ContentPart::as_text).collect()
    }
}

/// A named function tool exposed to the model, in canonical (pre-sanitized) form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedTool {
    pub name: String,
    pub description: String,
    #[serde(rename = "parametersJsonSchema")]
    pub parameters_json_schema: serde_json::Value,
}

/// How the model is steered toward (or away from) invoking tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolChoice {
    Auto,
    None,
    Single { name: String },
    Required { allowed: Vec<String> },
}

/// `reasoning` settings sub-object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReasoningSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<ReasoningEffort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

/// How prior tool results/reasoning are preserved across history cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PreservePolicy {
    Keyword(PreserveKeyword),
    Count(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreserveKeyword {
    All,
    None,
}

impl Default for PreservePolicy {
    fn default() -> Self {
        PreservePolicy::Keyword(PreserveKeyword::All)
    }
}

/// Recognized generation/runtime settings. Unknown keys land in `extras` and are
/// forwarded to `Compat::apply_provider_extensions` verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, rename = "topP", skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, rename = "maxTokens", skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default, rename = "frequencyPenalty", skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, rename = "presencePenalty", skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, rename = "logitBias", skip_serializing_if = "Option::is_none")]
    pub logit_bias: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<bool>,
    #[serde(default, rename = "topLogprobs", skip_serializing_if = "Option::is_none")]
    pub top_logprobs: Option<u32>,
    #[serde(default, rename = "responseFormat", skip_serializing_if = "Option::is_none")]
    pub response_format: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningSettings>,
    #[serde(default, rename = "reasoningBudget", skip_serializing_if = "Option::is_none")]
    pub reasoning_budget: Option<u32>,
    #[serde(default, rename = "maxToolIterations", skip_serializing_if = "Option::is_none")]
    pub max_tool_iterations: Option<u32>,
    #[serde(default, rename = "parallelToolExecution")]
    pub parallel_tool_execution: bool,
    #[serde(default, rename = "toolCountdownEnabled")]
    pub tool_countdown_enabled: bool,
    #[serde(default, rename = "toolFinalPromptEnabled")]
    pub tool_final_prompt_enabled: bool,
    #[serde(default, rename = "preserveToolResults")]
    pub preserve_tool_results: PreservePolicy,
    #[serde(default, rename = "preserveReasoning")]
    pub preserve_reasoning: PreservePolicy,
    #[serde(default, rename = "toolResultMaxChars", skip_serializing_if = "Option::is_none")]
    pub tool_result_max_chars: Option<usize>,
    #[serde(default, rename = "batchId", skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    #[serde(default, flatten)]
    pub extras: HashMap<String, serde_json::Value>,
}

/// One entry in the priority-ordered provider/model fallback list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderTarget {
    pub provider: String,
    pub model: String,
}

/// Declarative call input. Owned by the caller; coordinators never mutate it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LLMCallSpec {
    pub messages: Vec<Message>,
    #[serde(rename = "llmPriority")]
    pub llm_priority: Vec<ProviderTarget>,
    #[serde(default, rename = "functionToolNames")]
    pub function_tool_names: Vec<String>,
    #[serde(default, rename = "mcpServers")]
    pub mcp_servers: Vec<String>,
    #[serde(default, rename = "toolChoice", skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default, rename = "vectorContext", skip_serializing_if = "Option::is_none")]
    pub vector_context: Option<crate::cloudllm::vector_context::VectorContextSpec>,
    #[serde(default, rename = "rateLimitRetryDelays")]
    pub rate_limit_retry_delays: Vec<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<CallMetadata>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallMetadata {
    #[serde(default, rename = "correlationId", skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// One `{ tool, callId, result }` entry accumulated across a whole tool loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultRecord {
    pub tool: String,
    #[serde(rename = "callId")]
    pub call_id: String,
    pub result: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawResponseInfo {
    #[serde(default, rename = "toolResults", skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResultRecord>,
}

/// The output of `run`, and the payload of the streaming `done` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMResponse {
    pub provider: String,
    pub model: String,
    pub role: Role,
    pub content: Vec<ContentPart>,
    #[serde(default, rename = "toolCalls", skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<Reasoning>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, rename = "finishReason", skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub raw: RawResponseInfo,
}

/// One event kind of the three that make up `TOOL { toolEvent }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolEvent {
    ToolCallStart { call_id: String, name: String },
    ToolCallArgumentsDelta { call_id: String, arguments_delta: String },
    ToolCallEnd { call_id: String, name: String, arguments: String },
    ToolResult { call_id: String, name: String, result: serde_json::Value },
}

/// A single event emitted by `runStream`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Delta { content: String },
    Tool { #[serde(rename = "toolEvent")] tool_event: ToolEvent },
    ToolCall { #[serde(rename = "toolCall")] tool_call: ToolCall },
    Token { metadata: TokenMetadata },
    Done { response: LLMResponse },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub usage: Usage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_has_single_text_part() {
        let m = Message::user("hi");
        assert_eq!(m.text(), "hi");
        assert_eq!(m.role, Role::User);
    }

    #[test]
    fn reasoning_merge_concatenates_text_and_last_writer_wins_metadata() {
        let mut a = Reasoning {
            text: "foo".to_string(),
            redacted: None,
            metadata: HashMap::from([("k".to_string(), serde_json::json!(1))]),
        };
        let b = Reasoning {
            text: "bar".to_string(),
            redacted: Some(true),
            metadata: HashMap::from([("k".to_string(), serde_json::json!(2))]),
        };
        a.merge(b);
        assert_eq!(a.text, "foobar");
        assert_eq!(a.redacted, Some(true));
        assert_eq!(a.metadata["k"], serde_json::json!(2));
    }

    #[test]
    fn synthesize_call_id_is_zero_based() {
        assert_eq!(synthesize_call_id(0), "call_0");
        assert_eq!(synthesize_call_id(3), "call_3");
    }

    #[test]
    fn usage_distinguishes_absent_from_zero() {
        let json = serde_json::json!({ "promptTokens": 0 });
        let usage: Usage = serde_json::from_value(json).unwrap();
        assert_eq!(usage.prompt_tokens, Some(0));
        assert_eq!(usage.completion_tokens, None);
    }
}
