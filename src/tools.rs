//! Retrieval tools the model can call mid-conversation.
//!
//! Two built-ins are registered in a [`ToolRegistry`]:
//!
//! | Tool | Argument | Result |
//! |------|----------|--------|
//! | `search` | `query` | top-K chunks as `[chunk_id]\ncontent` blocks |
//! | `lookup_topic` | `topic` | best chunk for a canonical topic, prefixed with the topic |
//!
//! The registry also produces the function declarations sent to the model
//! and dispatches the model's [`ToolCall`]s by name. Both tools are
//! read-only.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::SopError;
use crate::retriever::{Retriever, CONTEXT_SEPARATOR};
use sop_agent_core::conversation::ToolCall;

/// Returned by `search` when nothing matches.
pub const NO_RESULTS: &str = "No relevant procedures found for this query.";

/// Shared state handed to every tool invocation.
#[derive(Clone)]
pub struct ToolContext {
    pub retriever: Retriever,
}

impl ToolContext {
    pub fn new(retriever: Retriever) -> Self {
        Self { retriever }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model uses to call the tool; also the `POST /tools/{name}` path.
    fn name(&self) -> &str;

    /// One-line description shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema for the arguments object.
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String>;
}

/// Function declaration in the shape chat-completion hosts expect.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Pull a single string argument out of `params`.
///
/// Accepts `{"<key>": "..."}` or a bare JSON string.
fn string_arg(params: &Value, key: &str) -> Result<String> {
    let value = match params {
        Value::String(s) => Some(s.as_str()),
        other => other.get(key).and_then(|v| v.as_str()),
    };
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(SopError::InvalidArgument(format!("{} must be a non-empty string", key)).into()),
    }
}

// ============ search ============

pub struct SearchTool;

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search the standard operating procedures for guidance on greeting callers, \
         scheduling, rescheduling or cancelling appointments, walk-ins, directions, wait \
         times, late arrivals, online booking, holds, communication, and closing calls."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to look up, e.g. \"late arrival policy\""
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String> {
        let query = string_arg(&params, "query")?;
        let results = ctx
            .retriever
            .search(&query, ctx.retriever.default_top_k())
            .await?;

        tracing::info!(tool = "search", query = %query, results = results.len(), "tool executed");

        if results.is_empty() {
            return Ok(NO_RESULTS.to_string());
        }

        Ok(results
            .iter()
            .map(|r| format!("[{}]\n{}", r.chunk.label(), r.chunk.content.trim()))
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR))
    }
}

// ============ lookup_topic ============

/// Canonical SOP topics with hand-tuned retrieval queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    Greeting,
    Scheduling,
    Cancellation,
    Reschedule,
    WalkIn,
    Directions,
    WaitTimes,
    LateArrival,
    OnlineBooking,
    Closing,
    Hold,
    Communication,
}

impl Topic {
    pub const ALL: [Topic; 12] = [
        Topic::Greeting,
        Topic::Scheduling,
        Topic::Cancellation,
        Topic::Reschedule,
        Topic::WalkIn,
        Topic::Directions,
        Topic::WaitTimes,
        Topic::LateArrival,
        Topic::OnlineBooking,
        Topic::Closing,
        Topic::Hold,
        Topic::Communication,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Greeting => "greeting",
            Topic::Scheduling => "scheduling",
            Topic::Cancellation => "cancellation",
            Topic::Reschedule => "reschedule",
            Topic::WalkIn => "walk-in",
            Topic::Directions => "directions",
            Topic::WaitTimes => "wait times",
            Topic::LateArrival => "late arrival",
            Topic::OnlineBooking => "online booking",
            Topic::Closing => "closing",
            Topic::Hold => "hold",
            Topic::Communication => "communication",
        }
    }

    pub fn search_query(&self) -> &'static str {
        match self {
            Topic::Greeting => "greeting caller opening phone answer",
            Topic::Scheduling => "schedule new appointment booking",
            Topic::Cancellation => "cancel appointment cancellation",
            Topic::Reschedule => "reschedule change appointment",
            Topic::WalkIn => "walk-in without appointment availability",
            Topic::Directions => "directions location clinic address",
            Topic::WaitTimes => "wait time current delay how long",
            Topic::LateArrival => "late arrival 15 minute policy running late",
            Topic::OnlineBooking => "online website scheduling book appointment",
            Topic::Closing => "closing end call goodbye hang up",
            Topic::Hold => "hold waiting please hold",
            Topic::Communication => "communication guidelines tone professional",
        }
    }

    /// Case-insensitive; hyphens and spaces are interchangeable
    /// (`wait-times` == `wait times`, `walk in` == `walk-in`).
    pub fn parse(topic: &str) -> Option<Topic> {
        let wanted = topic.trim().to_lowercase().replace('-', " ");
        Topic::ALL
            .into_iter()
            .find(|t| t.as_str().replace('-', " ") == wanted)
    }
}

pub struct LookupTopicTool;

impl LookupTopicTool {
    /// The query actually searched for `topic`: the tuned query for a
    /// canonical topic, otherwise the topic itself.
    pub fn rewrite(topic: &str) -> String {
        Topic::parse(topic)
            .map(|t| t.search_query().to_string())
            .unwrap_or_else(|| topic.to_string())
    }
}

#[async_trait]
impl Tool for LookupTopicTool {
    fn name(&self) -> &str {
        "lookup_topic"
    }

    fn description(&self) -> &str {
        "Get the procedure for one canonical topic: greeting, scheduling, cancellation, \
         reschedule, walk-in, directions, wait times, late arrival, online booking, closing, \
         hold, or communication."
    }

    fn parameters_schema(&self) -> Value {
        let topics: Vec<&str> = Topic::ALL.iter().map(|t| t.as_str()).collect();
        serde_json::json!({
            "type": "object",
            "properties": {
                "topic": {
                    "type": "string",
                    "description": format!("One of: {}", topics.join(", "))
                }
            },
            "required": ["topic"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String> {
        let topic = string_arg(&params, "topic")?;
        let query = Self::rewrite(&topic);
        let results = ctx.retriever.search(&query, 1).await?;

        tracing::info!(tool = "lookup_topic", topic = %topic, query = %query, found = !results.is_empty(), "tool executed");

        match results.first() {
            Some(top) => Ok(format!(
                "Procedure for '{}':\n\n{}",
                topic,
                top.chunk.content.trim()
            )),
            None => Ok(format!("No procedure found for topic: {}", topic)),
        }
    }
}

// ============ registry ============

/// Name → tool lookup, validated before any dispatch.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registry holding `search` and `lookup_topic`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SearchTool));
        registry.register(Box::new(LookupTopicTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Declarations for every registered tool.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    /// Run the tool named by `call`. Unknown names are [`SopError::UnknownTool`].
    pub async fn dispatch(&self, call: &ToolCall, ctx: &ToolContext) -> Result<String> {
        let tool = self
            .find(&call.name)
            .ok_or_else(|| SopError::UnknownTool(call.name.clone()))?;
        tool.execute(call.arguments.clone(), ctx).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
