//! LLM Coordinator — blocking `run(spec) -> LLMResponse` (§4.8).
//!
//! Implements provider fallback, the tool-use loop, tool budgeting, prior-
//! cycle redaction/truncation, and final response assembly. Mirrors
//! `llm_session.rs`'s history-management idiom and `orchestration.rs`'s
//! `async fn` + typed-error fallback walk, generalized from a single
//! transport to a priority-ordered list of `(provider, model)` targets.

use crate::cloudllm::compat::Compat;
use crate::cloudllm::config::CoordinatorConfig;
use crate::cloudllm::error::CoordinatorError;
use crate::cloudllm::invoker::{classify, HttpInvoker, RawAttempt, ReqwestInvoker};
use crate::cloudllm::model::{
    LLMCallSpec, LLMResponse, Message, ToolResultRecord, UnifiedTool,
};
use crate::cloudllm::redactor;
use crate::cloudllm::sanitizer::NameSanitizer;
use crate::cloudllm::tool_budget::{countdown_text, ToolCallBudget, FINAL_PROMPT_TEXT};
use crate::cloudllm::tool_router::ToolRouter;
use crate::cloudllm::vector_context;
use log::{debug, error, log_enabled, warn, Level};
use serde_json::json;
use std::sync::Mutex;
use std::time::Duration;

/// Resolves a provider name to the `Compat` implementation that understands
/// its wire format. Provider names are lowercase (`openai`, `anthropic`,
/// `google`, `openrouter`).
pub fn compat_for(provider: &str) -> Option<Box<dyn Compat>> {
    match provider {
        "openai" => Some(Box::new(crate::cloudllm::compat::openai::OpenAiCompat::new())),
        "anthropic" => Some(Box::new(crate::cloudllm::compat::anthropic::AnthropicCompat::new())),
        "google" => Some(Box::new(crate::cloudllm::compat::gemini::GeminiCompat::new())),
        "openrouter" => Some(Box::new(crate::cloudllm::compat::openrouter::OpenRouterCompat::new())),
        _ => None,
    }
}

/// Resolves the base URL and auth header name for a provider. Credentials
/// themselves come from a caller-provided accessor (§6); the core never
/// reads environment variables directly.
pub trait CredentialAccessor: Send + Sync {
    fn api_key(&self, provider: &str) -> Option<String>;
    fn base_url(&self, provider: &str) -> String;
}

/// The auth header `(name, value)` a provider expects its API key carried
/// in. Anthropic and Google use a bare key header; everyone else takes a
/// bearer token.
fn auth_header(provider: &str, api_key: &str) -> (String, String) {
    match provider {
        "anthropic" => ("x-api-key".to_string(), api_key.to_string()),
        "google" => ("x-goog-api-key".to_string(), api_key.to_string()),
        _ => ("Authorization".to_string(), format!("Bearer {}", api_key)),
    }
}

/// The coordinator's process-wide mutable state: the log-tag `batchId` (§5, §10).
pub struct Coordinator {
    config: CoordinatorConfig,
    credentials: Box<dyn CredentialAccessor>,
    invoker: Box<dyn HttpInvoker>,
    batch_id: Mutex<Option<String>>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, credentials: Box<dyn CredentialAccessor>) -> Self {
        Self::with_invoker(config, credentials, Box::new(ReqwestInvoker))
    }

    /// Constructs a coordinator against a caller-supplied transport. Tests use
    /// this to drive `run`/`drive_one_provider` against hand-built fakes
    /// instead of a live network call.
    pub fn with_invoker(config: CoordinatorConfig, credentials: Box<dyn CredentialAccessor>, invoker: Box<dyn HttpInvoker>) -> Self {
        Self { config, credentials, invoker, batch_id: Mutex::new(None) }
    }

    fn set_batch_id(&self, id: Option<String>) {
        *self.batch_id.lock().expect("batch_id mutex poisoned") = id;
    }

    fn log_tag(&self) -> String {
        match self.batch_id.lock().expect("batch_id mutex poisoned").as_ref() {
            Some(id) => format!("[{}] ", id),
            None => String::new(),
        }
    }

    /// Tagging hook for `runStream` (§5, §10): records the call's `batchId`
    /// so subsequent log lines carry the same tag `run` would have used.
    pub fn begin_call(&self, batch_id: Option<String>) {
        self.set_batch_id(batch_id);
    }

    /// The coordinator's configuration, for callers building a streaming call
    /// outside `run` (e.g. `stream_coordinator::run_stream`).
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Releases pooled compat/state. Idempotent; the coordinator holds no
    /// unmanaged resources beyond the shared HTTP client pool.
    pub fn close(&self) {}

    /// Blocking coordinator entry point (§4.8).
    pub async fn run(&self, spec: &LLMCallSpec, router: &ToolRouter) -> Result<LLMResponse, CoordinatorError> {
        self.set_batch_id(spec.settings.batch_id.clone());

        let mut history = spec.messages.clone();

        if let Some(vc_spec) = &spec.vector_context {
            use crate::cloudllm::vector_context::VectorContextMode;
            if matches!(vc_spec.mode, VectorContextMode::Auto | VectorContextMode::Both) {
                let stores = std::collections::HashMap::new();
                if let Some(injected) = vector_context::inject_auto(vc_spec, &history, &stores).await {
                    history.insert(0, injected);
                }
            }
        }

        let mut tools: Vec<UnifiedTool> = router.unified_tools();
        if let Some(vc_spec) = &spec.vector_context {
            use crate::cloudllm::vector_context::VectorContextMode;
            if matches!(vc_spec.mode, VectorContextMode::Tool | VectorContextMode::Both) {
                tools.push(vector_context::tool_schema(vc_spec));
            }
        }

        let max_iterations = spec.settings.max_tool_iterations.unwrap_or(self.config.default_max_tool_iterations);
        let retry_delays = if spec.rate_limit_retry_delays.is_empty() {
            self.config.default_rate_limit_retry_delays.clone()
        } else {
            spec.rate_limit_retry_delays.clone()
        };

        let mut last_error: Option<CoordinatorError> = None;

        for target in &spec.llm_priority {
            let Some(compat) = compat_for(&target.provider) else {
                last_error = Some(CoordinatorError::Other(format!("unknown provider '{}'", target.provider)));
                continue;
            };

            let mut budget = ToolCallBudget::new(max_iterations);
            let mut sanitizer = NameSanitizer::new();
            let mut tool_results: Vec<ToolResultRecord> = Vec::new();
            let mut attempt_history = history.clone();

            match self
                .drive_one_provider(
                    compat.as_ref(),
                    target,
                    &mut attempt_history,
                    &tools,
                    spec,
                    &mut budget,
                    &mut sanitizer,
                    router,
                    &retry_delays,
                    &mut tool_results,
                )
                .await
            {
                Ok(mut response) => {
                    response.raw.tool_results = tool_results;
                    return Ok(response);
                }
                Err(e) => {
                    error!("{}provider '{}' attempt failed: {}", self.log_tag(), target.provider, e);
                    let falls_through = e.falls_through();
                    last_error = Some(e);
                    if !falls_through {
                        return Err(last_error.unwrap());
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| CoordinatorError::Other("no providers configured".to_string())))
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive_one_provider(
        &self,
        compat: &dyn Compat,
        target: &crate::cloudllm::model::ProviderTarget,
        history: &mut Vec<Message>,
        tools: &[UnifiedTool],
        spec: &LLMCallSpec,
        budget: &mut ToolCallBudget,
        sanitizer: &mut NameSanitizer,
        router: &ToolRouter,
        retry_delays: &[u64],
        tool_results: &mut Vec<ToolResultRecord>,
    ) -> Result<LLMResponse, CoordinatorError> {
        loop {
            redactor::redact_prior_tool_results(history, &spec.settings.preserve_tool_results);
            redactor::redact_prior_reasoning(history, &spec.settings.preserve_reasoning);

            let active_tools = if budget.exhausted() { &[][..] } else { tools };
            let active_choice = if budget.exhausted() { None } else { spec.tool_choice.as_ref() };

            let mut payload = compat.build_payload(&target.model, &spec.settings, history, active_tools, active_choice, sanitizer)?;
            payload = compat.apply_provider_extensions(payload, &spec.settings.extras);
            crate::cloudllm::compat::warn_on_unrecognized_extras(compat.provider_name(), &spec.settings.extras, compat.recognized_extension_keys());

            let headers: Vec<(String, String)> = self
                .credentials
                .api_key(compat.provider_name())
                .map(|key| vec![auth_header(compat.provider_name(), &key)])
                .unwrap_or_default();

            if log_enabled!(Level::Debug) {
                let header_lines: String = headers.iter().map(|(k, v)| format!("{}: {}\n", k, v)).collect();
                debug!(
                    "{}-> {} {}: {}{}",
                    self.log_tag(),
                    target.provider,
                    target.model,
                    redact_headers_in_log(&header_lines),
                    redact_headers_in_log(&payload)
                );
            }

            let raw = self.invoke_with_retries(compat.provider_name(), &target.model, &headers, &payload, retry_delays).await?;
            let response = compat.parse_response(&raw, &target.model)?;

            if response.content.is_empty() {
                return Err(CoordinatorError::BadResponse {
                    provider: target.provider.clone(),
                    message: "Malformed LLM response".to_string(),
                });
            }

            let Some(tool_calls) = &response.tool_calls else {
                return Ok(response);
            };
            if tool_calls.is_empty() || budget.exhausted() {
                return Ok(response);
            }

            let mut assistant_message = Message::assistant("");
            assistant_message.content = response.content.clone();
            assistant_message.tool_calls = Some(tool_calls.clone());
            assistant_message.reasoning = response.reasoning.clone();
            history.push(assistant_message);

            let consumed_ok = budget.consume(tool_calls.len() as u32);
            let will_exhaust = budget.will_exhaust_after(0);

            for call in tool_calls {
                let canonical = sanitizer.canonical_of(&call.name).unwrap_or(&call.name).to_string();

                let result = if !consumed_ok {
                    json!({ "error": "tool_execution_failed", "details": "tool_call_budget_exhausted" })
                } else {
                    router.route_and_invoke(&canonical, &call.arguments).await
                };

                tool_results.push(ToolResultRecord { tool: canonical.clone(), call_id: call.id.clone(), result: result.clone() });

                let mut annotated = annotate_result(result, spec, budget);
                if spec.settings.tool_countdown_enabled {
                    annotated = append_countdown(annotated, &countdown_text(budget));
                }
                history.push(Message::tool_result(call.id.clone(), canonical, annotated));
            }

            if !consumed_ok || (spec.settings.tool_final_prompt_enabled && will_exhaust) {
                history.push(Message::system(FINAL_PROMPT_TEXT));
            }

            redactor::truncate_tool_results(history, spec.settings.tool_result_max_chars);
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn invoke_with_retries(
        &self,
        provider: &str,
        model: &str,
        headers: &[(String, String)],
        payload: &serde_json::Value,
        retry_delays: &[u64],
    ) -> Result<serde_json::Value, CoordinatorError> {
        let mut delays = retry_delays.iter();
        loop {
            let attempt: RawAttempt = self.invoker.send(&self.credentials.base_url(provider), headers, payload).await?;

            match classify(provider, &attempt) {
                None => return Ok(attempt.body),
                Some(CoordinatorError::RateLimit { .. }) => {
                    if let Some(delay_ms) = delays.next() {
                        warn!("{}rate limited by {} ({}), retrying in {}ms", self.log_tag(), provider, model, delay_ms);
                        tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
                        continue;
                    }
                    return Err(CoordinatorError::RateLimit { provider: provider.to_string(), message: "retry schedule exhausted".to_string() });
                }
                Some(other) => return Err(other),
            }
        }
    }
}

fn annotate_result(result: serde_json::Value, spec: &LLMCallSpec, budget: &ToolCallBudget) -> serde_json::Value {
    let mut result = result;
    if let Some(max_chars) = spec.settings.tool_result_max_chars {
        if let Some(s) = result.as_str() {
            result = serde_json::Value::String(redactor::truncate_text(s, max_chars));
        }
    }
    let _ = budget;
    result
}

/// Appends the countdown suffix (`"Tool calls used X of Y"`) to a string
/// result, or attaches it as a `countdown` field on an object result.
fn append_countdown(result: serde_json::Value, countdown: &str) -> serde_json::Value {
    match result {
        serde_json::Value::String(s) => serde_json::Value::String(format!("{} ({})", s, countdown)),
        serde_json::Value::Object(mut obj) => {
            obj.insert("countdown".to_string(), json!(countdown));
            serde_json::Value::Object(obj)
        }
        other => other,
    }
}

/// Redacts `Bearer`/`x-api-key`/`x-goog-api-key` values in outgoing header
/// lines or a payload body before either is formatted into a debug log line
/// (§6, §10): applied unconditionally, not only when file logging is active.
fn redact_headers_in_log(text: impl std::fmt::Display) -> String {
    crate::cloudllm::header_redaction::redact(&text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annotate_result_truncates_string_results_when_configured() {
        let spec = LLMCallSpec { settings: crate::cloudllm::model::Settings { tool_result_max_chars: Some(5), ..Default::default() }, ..Default::default() };
        let budget = ToolCallBudget::new(3);
        let out = annotate_result(json!("0123456789"), &spec, &budget);
        assert_eq!(out, json!("0123\u{2026}truncated"));
    }
}
