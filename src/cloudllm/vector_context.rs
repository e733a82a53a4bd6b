//! Vector Context Injector (§4.7): builds a query from recent history, runs
//! it against a priority-ordered list of stores, and either injects the
//! result as context or exposes a search tool the model can call directly.

use crate::cloudllm::model::{Message, Role, UnifiedTool};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// One retrieved hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorHit {
    pub id: String,
    pub score: f64,
    pub text: String,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

#[derive(Debug)]
pub struct VectorStoreError(pub String);

impl fmt::Display for VectorStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vector store error: {}", self.0)
    }
}

impl std::error::Error for VectorStoreError {}

#[derive(Debug, Clone, Default)]
pub struct VectorQueryRequest {
    pub query: String,
    pub top_k: u32,
    pub filter: Option<Value>,
    pub score_threshold: Option<f64>,
}

/// A concrete driver (Qdrant, in-process, …) implements this; the injector
/// depends only on the trait.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn query(&self, request: &VectorQueryRequest) -> Result<Vec<VectorHit>, VectorStoreError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConstruction {
    #[serde(default = "default_messages_to_include", rename = "messagesToInclude")]
    pub messages_to_include: u32,
    #[serde(default, rename = "includeAssistantMessages")]
    pub include_assistant_messages: bool,
    #[serde(default, rename = "includeSystemPrompt")]
    pub include_system_prompt: bool,
}

fn default_messages_to_include() -> u32 {
    3
}

impl Default for QueryConstruction {
    fn default() -> Self {
        Self { messages_to_include: default_messages_to_include(), include_assistant_messages: false, include_system_prompt: false }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterLocks {
    #[serde(default, rename = "topK", skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
    #[serde(default, rename = "scoreThreshold", skip_serializing_if = "Option::is_none")]
    pub score_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorContextMode {
    Auto,
    Tool,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InjectAs {
    System,
    PrependUser,
}

impl Default for InjectAs {
    fn default() -> Self {
        InjectAs::System
    }
}

fn default_inject_template() -> String {
    "{{results}}".to_string()
}

fn default_top_k() -> u32 {
    5
}

fn default_tool_name() -> String {
    "search_context".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorContextSpec {
    pub mode: VectorContextMode,
    pub stores: Vec<String>,
    #[serde(default, rename = "queryConstruction")]
    pub query_construction: QueryConstruction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
    #[serde(default, rename = "scoreThreshold", skip_serializing_if = "Option::is_none")]
    pub score_threshold: Option<f64>,
    #[serde(default = "default_top_k", rename = "topK")]
    pub top_k: u32,
    #[serde(default = "default_inject_template", rename = "injectTemplate")]
    pub inject_template: String,
    #[serde(default, rename = "injectAs")]
    pub inject_as: InjectAs,
    #[serde(default = "default_tool_name", rename = "toolName")]
    pub tool_name: String,
    #[serde(default)]
    pub locks: ParameterLocks,
}

impl Default for VectorContextSpec {
    fn default() -> Self {
        Self {
            mode: VectorContextMode::Auto,
            stores: Vec::new(),
            query_construction: QueryConstruction::default(),
            filter: None,
            score_threshold: None,
            top_k: default_top_k(),
            inject_template: default_inject_template(),
            inject_as: InjectAs::default(),
            tool_name: default_tool_name(),
            locks: ParameterLocks::default(),
        }
    }
}

/// Builds the text query fed to the store from the tail of `messages`.
pub fn build_query(messages: &[Message], construction: &QueryConstruction) -> String {
    let mut selected: Vec<&Message> = Vec::new();
    for m in messages.iter().rev() {
        if selected.len() as u32 >= construction.messages_to_include {
            break;
        }
        match m.role {
            Role::User => selected.push(m),
            Role::Assistant if construction.include_assistant_messages => selected.push(m),
            Role::System if construction.include_system_prompt => selected.push(m),
            _ => {}
        }
    }
    selected.reverse();
    selected.iter().map(|m| m.text()).collect::<Vec<_>>().join("\n")
}

fn effective_request(spec: &VectorContextSpec, query: String) -> VectorQueryRequest {
    VectorQueryRequest {
        query,
        top_k: spec.locks.top_k.unwrap_or(spec.top_k),
        filter: spec.locks.filter.clone().or_else(|| spec.filter.clone()),
        score_threshold: spec.locks.score_threshold.or(spec.score_threshold),
    }
}

fn render_template(template: &str, hits: &[VectorHit]) -> String {
    let rendered = hits.iter().map(|h| h.text.as_str()).collect::<Vec<_>>().join("\n\n");
    template.replace("{{results}}", &rendered)
}

/// Runs the `auto` injection path: tries each store in `spec.stores` order
/// until one returns at least one hit above `scoreThreshold`, renders the
/// template, and returns the message to insert. Errors are swallowed by the
/// caller (logged, not raised) per §4.7.
pub async fn inject_auto(
    spec: &VectorContextSpec,
    messages: &[Message],
    stores: &HashMap<String, Arc<dyn VectorStore>>,
) -> Option<Message> {
    let query = build_query(messages, &spec.query_construction);
    let request = effective_request(spec, query);

    let candidate_stores: Vec<&String> = match &spec.locks.store {
        Some(locked) => vec![locked],
        None => spec.stores.iter().collect(),
    };

    for name in candidate_stores {
        let Some(store) = stores.get(name) else { continue };
        match store.query(&request).await {
            Ok(hits) if !hits.is_empty() => {
                let filtered: Vec<VectorHit> = match request.score_threshold {
                    Some(t) => hits.into_iter().filter(|h| h.score >= t).collect(),
                    None => hits,
                };
                if filtered.is_empty() {
                    continue;
                }
                let rendered = render_template(&spec.inject_template, &filtered);
                return Some(match spec.inject_as {
                    InjectAs::System => Message::system(rendered),
                    InjectAs::PrependUser => Message::user(rendered),
                });
            }
            Ok(_) => continue,
            Err(_) => continue,
        }
    }
    None
}

/// Builds the `tool` mode's exposed search tool, with locked parameters
/// removed from the schema the model sees.
pub fn tool_schema(spec: &VectorContextSpec) -> UnifiedTool {
    let mut properties = serde_json::Map::new();
    properties.insert("query".to_string(), json!({ "type": "string", "description": "search query" }));
    if spec.locks.top_k.is_none() {
        properties.insert("topK".to_string(), json!({ "type": "integer" }));
    }
    if spec.locks.filter.is_none() {
        properties.insert("filter".to_string(), json!({ "type": "object" }));
    }

    UnifiedTool {
        name: spec.tool_name.clone(),
        description: "Searches the configured vector store for relevant context.".to_string(),
        parameters_json_schema: json!({
            "type": "object",
            "properties": Value::Object(properties),
            "required": ["query"],
        }),
    }
}

/// Executes a tool-mode search call, applying parameter locks server-side
/// regardless of what the model supplied.
pub async fn run_tool_query(
    spec: &VectorContextSpec,
    arguments: &Value,
    stores: &HashMap<String, Arc<dyn VectorStore>>,
) -> Result<Vec<VectorHit>, VectorStoreError> {
    let query = arguments.get("query").and_then(Value::as_str).unwrap_or("").to_string();
    let mut request = effective_request(spec, query);
    if spec.locks.top_k.is_none() {
        if let Some(k) = arguments.get("topK").and_then(Value::as_u64) {
            request.top_k = k as u32;
        }
    }
    if spec.locks.filter.is_none() {
        if let Some(f) = arguments.get("filter") {
            request.filter = Some(f.clone());
        }
    }

    let name = spec.locks.store.clone().or_else(|| spec.stores.first().cloned());
    let store = name
        .and_then(|n| stores.get(&n))
        .ok_or_else(|| VectorStoreError("no vector store configured".to_string()))?;
    store.query(&request).await
}

/// In-process test double; not a production driver.
pub struct InMemoryVectorStore {
    hits: Vec<VectorHit>,
}

impl InMemoryVectorStore {
    pub fn new(hits: Vec<VectorHit>) -> Self {
        Self { hits }
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn query(&self, request: &VectorQueryRequest) -> Result<Vec<VectorHit>, VectorStoreError> {
        Ok(self.hits.iter().take(request.top_k as usize).cloned().collect())
    }
}
