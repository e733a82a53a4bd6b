//! Stream Coordinator — `runStream(spec) -> AsyncSequence<Event>` (§4.9).
//!
//! Mirrors `coordinator.rs`'s provider-fallback and tool-loop shape, but
//! emits every transition as an [`Event`] instead of returning once. Built on
//! `futures_util::stream::unfold` (already a teacher dependency) so chunks
//! are processed lazily, one at a time, in arrival order — never eagerly
//! collected — matching §5's ordering guarantee for per-index compat state.

use crate::cloudllm::compat::{Compat, StreamState};
use crate::cloudllm::coordinator::{compat_for, Coordinator};
use crate::cloudllm::error::CoordinatorError;
use crate::cloudllm::model::{
    ContentPart, LLMCallSpec, LLMResponse, Message, ProviderTarget, Reasoning, Role, ToolCall, ToolEvent,
    ToolResultRecord, UnifiedTool, Usage,
};
use crate::cloudllm::model::Event as CEvent;
use crate::cloudllm::redactor;
use crate::cloudllm::sanitizer::NameSanitizer;
use crate::cloudllm::tool_budget::{countdown_text, ToolCallBudget, FINAL_PROMPT_TEXT};
use crate::cloudllm::tool_router::ToolRouter;
use async_trait::async_trait;
use futures_util::future::join_all;
use futures_util::stream::{self, Stream};
use log::{error, warn};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;

pub type EventStream = Pin<Box<dyn Stream<Item = Result<CEvent, CoordinatorError>> + Send>>;

/// A single open provider stream. The concrete SSE/websocket framing is an
/// external collaborator (§6 Non-goal); this trait is the narrow contract
/// the stream coordinator depends on.
#[async_trait]
pub trait ChunkStream: Send {
    async fn next_chunk(&mut self) -> Result<Option<Value>, CoordinatorError>;
}

/// Opens a streaming call against one `(provider, model)` target.
#[async_trait]
pub trait ProviderStreamOpener: Send + Sync {
    async fn open_stream(&self, provider: &str, model: &str, payload: &Value) -> Result<Box<dyn ChunkStream>, CoordinatorError>;
}

struct Ctx {
    coordinator: Arc<Coordinator>,
    router: Arc<ToolRouter>,
    opener: Arc<dyn ProviderStreamOpener>,
    spec: LLMCallSpec,
    priority_idx: usize,
    history: Vec<Message>,
    tools: Vec<UnifiedTool>,
    sanitizer: NameSanitizer,
    budget: ToolCallBudget,
    compat: Box<dyn Compat>,
    target: ProviderTarget,
    stream_state: StreamState,
    chunk_stream: Option<Box<dyn ChunkStream>>,
    content_buffer: String,
    reasoning_accum: Reasoning,
    tool_calls_accum: Vec<ToolCall>,
    usage_last: Option<Usage>,
    finish_reason_last: Option<String>,
    tool_results: Vec<ToolResultRecord>,
    pending: VecDeque<Result<CEvent, CoordinatorError>>,
    terminal: bool,
}

/// Streaming coordinator entry point (§4.9).
pub fn run_stream(
    coordinator: Arc<Coordinator>,
    spec: LLMCallSpec,
    router: Arc<ToolRouter>,
    opener: Arc<dyn ProviderStreamOpener>,
) -> EventStream {
    coordinator.begin_call(spec.settings.batch_id.clone());

    let tools = router.unified_tools();
    let history = spec.messages.clone();
    let max_iterations = spec.settings.max_tool_iterations.unwrap_or(coordinator.config().default_max_tool_iterations);

    let Some(first_target) = spec.llm_priority.first().cloned() else {
        return Box::pin(stream::once(async { Err(CoordinatorError::Other("no providers configured".to_string())) }));
    };
    let Some(compat) = compat_for(&first_target.provider) else {
        let msg = format!("unknown provider '{}'", first_target.provider);
        return Box::pin(stream::once(async move { Err(CoordinatorError::Other(msg)) }));
    };

    let ctx = Ctx {
        coordinator,
        router,
        opener,
        spec,
        priority_idx: 0,
        history,
        tools,
        sanitizer: NameSanitizer::new(),
        budget: ToolCallBudget::new(max_iterations),
        compat,
        target: first_target,
        stream_state: StreamState::default(),
        chunk_stream: None,
        content_buffer: String::new(),
        reasoning_accum: Reasoning::default(),
        tool_calls_accum: Vec::new(),
        usage_last: None,
        finish_reason_last: None,
        tool_results: Vec::new(),
        pending: VecDeque::new(),
        terminal: false,
    };

    Box::pin(stream::unfold(ctx, |mut ctx| async move {
        if let Some(event) = ctx.pending.pop_front() {
            return Some((event, ctx));
        }
        if ctx.terminal {
            return None;
        }
        step(&mut ctx).await;
        ctx.pending.pop_front().map(|event| (event, ctx))
    }))
}

async fn step(ctx: &mut Ctx) {
    if ctx.chunk_stream.is_none() {
        if !open_next_stream(ctx).await {
            return;
        }
    }

    let chunk = {
        let stream_ref = ctx.chunk_stream.as_mut().expect("chunk stream just opened");
        stream_ref.next_chunk().await
    };

    let chunk = match chunk {
        Ok(Some(chunk)) => chunk,
        Ok(None) => {
            finish_turn(ctx);
            return;
        }
        Err(e) => {
            error!("stream from '{}' interrupted: {}", ctx.target.provider, e);
            ctx.pending.push_back(Err(e));
            ctx.terminal = true;
            return;
        }
    };

    let parsed = match ctx.compat.parse_stream_chunk(&chunk, &mut ctx.stream_state) {
        Ok(p) => p,
        Err(e) => {
            ctx.pending.push_back(Err(e));
            ctx.terminal = true;
            return;
        }
    };

    if let Some(text) = &parsed.text {
        ctx.content_buffer.push_str(text);
        ctx.pending.push_back(Ok(CEvent::Delta { content: text.clone() }));
    }
    if let Some(r) = parsed.reasoning {
        ctx.reasoning_accum.merge(r);
    }
    for event in parsed.tool_events {
        if let ToolEvent::ToolCallEnd { call_id, name, arguments } = &event {
            let canonical = ctx.sanitizer.canonical_of(name).unwrap_or(name).to_string();
            let args = crate::cloudllm::compat::normalize_arguments(Some(arguments.as_str()));
            ctx.tool_calls_accum.push(ToolCall { id: call_id.clone(), name: canonical.clone(), arguments: args.clone() });
            ctx.pending.push_back(Ok(CEvent::Tool { tool_event: event.clone() }));
            ctx.pending.push_back(Ok(CEvent::ToolCall { tool_call: ToolCall { id: call_id.clone(), name: canonical, arguments: args } }));
        } else {
            ctx.pending.push_back(Ok(CEvent::Tool { tool_event: event }));
        }
    }
    if let Some(usage) = parsed.usage {
        ctx.usage_last = Some(usage);
        ctx.pending.push_back(Ok(CEvent::Token { metadata: crate::cloudllm::model::TokenMetadata { usage } }));
    }
    if let Some(reason) = parsed.finish_reason {
        ctx.finish_reason_last = Some(reason);
    }

    if parsed.finished_with_tool_calls {
        execute_tool_cycle(ctx).await;
    } else if ctx.finish_reason_last.is_some() {
        finish_turn(ctx);
    }
}

async fn open_next_stream(ctx: &mut Ctx) -> bool {
    ctx.stream_state = StreamState::default();
    ctx.content_buffer.clear();
    ctx.tool_calls_accum.clear();

    redactor::redact_prior_tool_results(&mut ctx.history, &ctx.spec.settings.preserve_tool_results);
    redactor::redact_prior_reasoning(&mut ctx.history, &ctx.spec.settings.preserve_reasoning);

    let active_tools: &[UnifiedTool] = if ctx.budget.exhausted() { &[] } else { &ctx.tools };
    let active_choice = if ctx.budget.exhausted() { None } else { ctx.spec.tool_choice.as_ref() };

    let mut payload = match ctx.compat.build_payload(&ctx.target.model, &ctx.spec.settings, &ctx.history, active_tools, active_choice, &mut ctx.sanitizer) {
        Ok(p) => p,
        Err(e) => {
            ctx.pending.push_back(Err(e));
            ctx.terminal = true;
            return false;
        }
    };
    if let Some(obj) = payload.as_object_mut() {
        for (k, v) in ctx.compat.streaming_flags().as_object().cloned().unwrap_or_default() {
            obj.insert(k, v);
        }
    }
    payload = ctx.compat.apply_provider_extensions(payload, &ctx.spec.settings.extras);
    crate::cloudllm::compat::warn_on_unrecognized_extras(ctx.compat.provider_name(), &ctx.spec.settings.extras, ctx.compat.recognized_extension_keys());

    match ctx.opener.open_stream(ctx.compat.provider_name(), &ctx.target.model, &payload).await {
        Ok(cs) => {
            ctx.chunk_stream = Some(cs);
            true
        }
        Err(e) if e.falls_through() && ctx.content_buffer.is_empty() => {
            warn!("stream open failed for '{}', falling back: {}", ctx.target.provider, e);
            ctx.priority_idx += 1;
            match ctx.spec.llm_priority.get(ctx.priority_idx).cloned() {
                Some(next_target) => match compat_for(&next_target.provider) {
                    Some(next_compat) => {
                        ctx.target = next_target;
                        ctx.compat = next_compat;
                        Box::pin(open_next_stream(ctx)).await
                    }
                    None => {
                        ctx.pending.push_back(Err(CoordinatorError::Other(format!("unknown provider '{}'", next_target.provider))));
                        ctx.terminal = true;
                        false
                    }
                },
                None => {
                    ctx.pending.push_back(Err(e));
                    ctx.terminal = true;
                    false
                }
            }
        }
        Err(e) => {
            ctx.pending.push_back(Err(e));
            ctx.terminal = true;
            false
        }
    }
}

async fn execute_tool_cycle(ctx: &mut Ctx) {
    let calls = std::mem::take(&mut ctx.tool_calls_accum);
    let mut assistant_message = Message::assistant("");
    assistant_message.content = vec![ContentPart::text(std::mem::take(&mut ctx.content_buffer))];
    assistant_message.tool_calls = Some(calls.clone());
    assistant_message.reasoning = if ctx.reasoning_accum.text.is_empty() { None } else { Some(ctx.reasoning_accum.clone()) };
    ctx.history.push(assistant_message);

    let consumed_ok = ctx.budget.consume(calls.len() as u32);
    let will_exhaust = ctx.budget.will_exhaust_after(0);

    if !consumed_ok {
        for call in &calls {
            let result = json!({ "error": "tool_execution_failed", "details": "tool_call_budget_exhausted" });
            ctx.tool_results.push(ToolResultRecord { tool: call.name.clone(), call_id: call.id.clone(), result: result.clone() });
            ctx.pending.push_back(Ok(CEvent::Tool {
                tool_event: ToolEvent::ToolResult { call_id: call.id.clone(), name: call.name.clone(), result: result.clone() },
            }));
            ctx.history.push(Message::tool_result(call.id.clone(), call.name.clone(), result));
        }
    } else if ctx.spec.settings.parallel_tool_execution {
        let router = Arc::clone(&ctx.router);
        let futures = calls.iter().map(|call| {
            let router = Arc::clone(&router);
            let name = call.name.clone();
            let arguments = call.arguments.clone();
            async move { router.route_and_invoke(&name, &arguments).await }
        });
        let results = join_all(futures).await;
        for (call, result) in calls.iter().zip(results.into_iter()) {
            finish_one_tool_call(ctx, call, result);
        }
    } else {
        for call in &calls {
            let result = ctx.router.route_and_invoke(&call.name, &call.arguments).await;
            finish_one_tool_call(ctx, call, result);
        }
    }

    if !consumed_ok || (ctx.spec.settings.tool_final_prompt_enabled && will_exhaust) {
        ctx.history.push(Message::system(FINAL_PROMPT_TEXT));
    }

    redactor::truncate_tool_results(&mut ctx.history, ctx.spec.settings.tool_result_max_chars);

    ctx.chunk_stream = None;
}

fn finish_one_tool_call(ctx: &mut Ctx, call: &ToolCall, result: Value) {
    ctx.tool_results.push(ToolResultRecord { tool: call.name.clone(), call_id: call.id.clone(), result: result.clone() });

    let mut annotated = result.clone();
    if let Some(max_chars) = ctx.spec.settings.tool_result_max_chars {
        if let Some(s) = annotated.as_str() {
            annotated = Value::String(redactor::truncate_text(s, max_chars));
        }
    }
    if ctx.spec.settings.tool_countdown_enabled {
        let countdown = countdown_text(&ctx.budget);
        annotated = match annotated {
            Value::String(s) => Value::String(format!("{} ({})", s, countdown)),
            Value::Object(mut obj) => {
                obj.insert("countdown".to_string(), json!(countdown));
                Value::Object(obj)
            }
            other => other,
        };
    }

    ctx.pending.push_back(Ok(CEvent::Tool {
        tool_event: ToolEvent::ToolResult { call_id: call.id.clone(), name: call.name.clone(), result: result.clone() },
    }));
    ctx.history.push(Message::tool_result(call.id.clone(), call.name.clone(), annotated));
}

fn finish_turn(ctx: &mut Ctx) {
    let content = vec![ContentPart::text(std::mem::take(&mut ctx.content_buffer))];
    let reasoning = if ctx.reasoning_accum.text.is_empty() { None } else { Some(ctx.reasoning_accum.clone()) };

    let response = LLMResponse {
        provider: ctx.target.provider.clone(),
        model: ctx.target.model.clone(),
        role: Role::Assistant,
        content,
        tool_calls: None,
        reasoning,
        usage: ctx.usage_last,
        finish_reason: ctx.finish_reason_last.clone(),
        raw: crate::cloudllm::model::RawResponseInfo { tool_results: std::mem::take(&mut ctx.tool_results) },
    };

    ctx.pending.push_back(Ok(CEvent::Done { response }));
    ctx.terminal = true;
}
