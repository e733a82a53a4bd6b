//! Result Redactor/Truncator (§4.6): applies `toolResultMaxChars` truncation
//! and the `preserveToolResults`/`preserveReasoning` history-redaction
//! policies across prior cycles.

use crate::cloudllm::model::{ContentPart, Message, PreserveKeyword, PreservePolicy, Role};

pub const REDACTION_PLACEHOLDER: &str =
    "This is a placeholder, not the original tool response; the tool output has been redacted to save context.";

/// Truncates `text` at `max_chars`: keeps the first `max_chars - 1`
/// characters (char boundaries, not bytes) and appends an ellipsis plus the
/// literal word "truncated". No-op if `text` already fits.
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars || max_chars == 0 {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{}\u{2026}truncated", kept)
}

/// Truncates the `result` of every `tool` role message in place.
pub fn truncate_tool_results(messages: &mut [Message], max_chars: Option<usize>) {
    let Some(max_chars) = max_chars else { return };
    for message in messages.iter_mut() {
        if message.role != Role::Tool {
            continue;
        }
        for part in message.content.iter_mut() {
            if let ContentPart::ToolResult { result, .. } = part {
                if let Some(s) = result.as_str() {
                    *result = serde_json::Value::String(truncate_text(s, max_chars));
                }
            }
        }
    }
}

fn keep_count(policy: &PreservePolicy) -> Option<usize> {
    match policy {
        PreservePolicy::Keyword(PreserveKeyword::All) => None,
        PreservePolicy::Keyword(PreserveKeyword::None) => Some(0),
        PreservePolicy::Count(n) => Some(*n as usize),
    }
}

/// Redacts tool-result text in prior cycles per `preserveToolResults`. The
/// most recently added tool-result message is always exempt, matching the
/// spec's "not the just-added pair" carve-out; `keep` additional verbatim
/// results beyond that are kept, counting backward from most recent.
pub fn redact_prior_tool_results(messages: &mut [Message], policy: &PreservePolicy) {
    let Some(keep) = keep_count(policy) else { return };

    let tool_indices: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == Role::Tool)
        .map(|(i, _)| i)
        .collect();

    if tool_indices.len() <= 1 {
        return;
    }

    let prior = &tool_indices[..tool_indices.len() - 1];
    let redact_up_to = prior.len().saturating_sub(keep);

    for &idx in &prior[..redact_up_to] {
        for part in messages[idx].content.iter_mut() {
            if let ContentPart::ToolResult { result, .. } = part {
                *result = serde_json::Value::String(REDACTION_PLACEHOLDER.to_string());
            }
        }
    }
}

/// Analogous policy applied to assistant `reasoning.text`, per `preserveReasoning`.
pub fn redact_prior_reasoning(messages: &mut [Message], policy: &PreservePolicy) {
    let Some(keep) = keep_count(policy) else { return };

    let reasoning_indices: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == Role::Assistant && m.reasoning.as_ref().map(|r| !r.text.is_empty()).unwrap_or(false))
        .map(|(i, _)| i)
        .collect();

    if reasoning_indices.len() <= 1 {
        return;
    }

    let prior = &reasoning_indices[..reasoning_indices.len() - 1];
    let redact_up_to = prior.len().saturating_sub(keep);

    for &idx in &prior[..redact_up_to] {
        if let Some(r) = messages[idx].reasoning.as_mut() {
            r.text = REDACTION_PLACEHOLDER.to_string();
        }
    }
}
