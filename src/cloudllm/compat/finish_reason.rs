//! Finish-reason mapping (§4.3). Idempotent: re-running the mapping on an
//! already-unified value is a no-op, and unknown strings pass through
//! unchanged — decided deliberately, see `DESIGN.md`.

/// Maps an Anthropic `stop_reason` to the unified value.
pub fn map_anthropic(reason: &str) -> String {
    match reason {
        "end_turn" | "stop_sequence" | "stop" => "stop".to_string(),
        "max_tokens" | "length" => "length".to_string(),
        "tool_use" | "tool_calls" => "tool_calls".to_string(),
        other => other.to_string(),
    }
}

/// OpenAI finish reasons already match the unified vocabulary; passed through.
pub fn map_openai(reason: &str) -> String {
    reason.to_string()
}

/// Google finish reasons already match the unified vocabulary; passed through.
pub fn map_google(reason: &str) -> String {
    reason.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anthropic_end_turn_and_stop_sequence_map_to_stop() {
        assert_eq!(map_anthropic("end_turn"), "stop");
        assert_eq!(map_anthropic("stop_sequence"), "stop");
    }

    #[test]
    fn anthropic_max_tokens_maps_to_length() {
        assert_eq!(map_anthropic("max_tokens"), "length");
    }

    #[test]
    fn anthropic_tool_use_maps_to_tool_calls() {
        assert_eq!(map_anthropic("tool_use"), "tool_calls");
    }

    #[test]
    fn unknown_values_pass_through_unchanged() {
        assert_eq!(map_anthropic("unknown_reason"), "unknown_reason");
        assert_eq!(map_openai("content_filter"), "content_filter");
        assert_eq!(map_google("SAFETY"), "SAFETY");
    }

    #[test]
    fn mapping_is_idempotent() {
        let once = map_anthropic("end_turn");
        let twice = map_anthropic(&once);
        assert_eq!(once, twice);
    }
}
