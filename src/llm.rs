//! Chat-completion client used by the agent.
//!
//! The agent depends only on [`ChatModel`]; [`OpenAiChatModel`] talks to
//! either the OpenAI API or an Azure OpenAI deployment, both of which use
//! the same chat-completions wire format with function calling.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::LlmConfig;
use crate::retry::send_json_with_retry;
use crate::tools::ToolSpec;
use sop_agent_core::conversation::{Message, ToolCall};

/// One model reply: plain content, tool calls, or both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssistantReply {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model or deployment name, for logging.
    fn name(&self) -> &str;

    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<AssistantReply>;
}

enum Endpoint {
    OpenAi { api_key: String },
    Azure { url: String, api_key: String },
}

pub struct OpenAiChatModel {
    model: String,
    endpoint: Endpoint,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiChatModel {
    /// Build a client for `config.provider` (`openai` or `azure`).
    ///
    /// Reads `OPENAI_API_KEY` or `AZURE_OPENAI_API_KEY` from the
    /// environment.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let endpoint = match config.provider.as_str() {
            "openai" => Endpoint::OpenAi {
                api_key: std::env::var("OPENAI_API_KEY")
                    .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?,
            },
            "azure" => {
                let base = config
                    .url
                    .clone()
                    .or_else(|| std::env::var("AZURE_OPENAI_ENDPOINT").ok())
                    .ok_or_else(|| {
                        anyhow::anyhow!("llm.url or AZURE_OPENAI_ENDPOINT required for Azure")
                    })?;
                Endpoint::Azure {
                    url: format!(
                        "{}/openai/deployments/{}/chat/completions?api-version={}",
                        base.trim_end_matches('/'),
                        config.model,
                        config.api_version
                    ),
                    api_key: std::env::var("AZURE_OPENAI_API_KEY").map_err(|_| {
                        anyhow::anyhow!("AZURE_OPENAI_API_KEY environment variable not set")
                    })?,
                }
            }
            other => anyhow::bail!("Unknown llm provider: {}", other),
        };

        Ok(Self {
            model: config.model.clone(),
            endpoint,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()?,
        })
    }

    fn request_body(&self, messages: &[Message], tools: &[ToolSpec]) -> Value {
        let mut body = json!({
            "messages": messages.iter().map(message_to_wire).collect::<Vec<_>>(),
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        if let Endpoint::OpenAi { .. } = self.endpoint {
            body["model"] = json!(self.model);
        }
        if !tools.is_empty() {
            body["tools"] = json!(tools.iter().map(tool_to_wire).collect::<Vec<_>>());
            body["tool_choice"] = json!("auto");
        }
        body
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<AssistantReply> {
        let body = self.request_body(messages, tools);
        let json = match &self.endpoint {
            Endpoint::OpenAi { api_key } => {
                send_json_with_retry("OpenAI API", self.max_retries, || {
                    self.client
                        .post("https://api.openai.com/v1/chat/completions")
                        .bearer_auth(api_key)
                        .json(&body)
                })
                .await?
            }
            Endpoint::Azure { url, api_key } => {
                send_json_with_retry("Azure OpenAI API", self.max_retries, || {
                    self.client
                        .post(url)
                        .header("api-key", api_key)
                        .json(&body)
                })
                .await?
            }
        };
        parse_chat_response(&json)
    }
}

fn message_to_wire(message: &Message) -> Value {
    match message {
        Message::System { content } => json!({"role": "system", "content": content}),
        Message::User { content } => json!({"role": "user", "content": content}),
        Message::Assistant {
            content,
            tool_calls,
        } => {
            if tool_calls.is_empty() {
                return json!({"role": "assistant", "content": content});
            }
            let calls: Vec<Value> = tool_calls
                .iter()
                .map(|c| {
                    json!({
                        "id": c.id,
                        "type": "function",
                        "function": {"name": c.name, "arguments": c.arguments.to_string()},
                    })
                })
                .collect();
            let content = if content.is_empty() {
                Value::Null
            } else {
                json!(content)
            };
            json!({"role": "assistant", "content": content, "tool_calls": calls})
        }
        Message::Tool {
            tool_call_id,
            content,
            ..
        } => json!({"role": "tool", "tool_call_id": tool_call_id, "content": content}),
    }
}

fn tool_to_wire(spec: &ToolSpec) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": spec.name,
            "description": spec.description,
            "parameters": spec.parameters,
        }
    })
}

/// Extract `choices[0].message` from a chat-completions response.
///
/// Tool-call arguments arrive as a JSON-encoded string; a string that does
/// not parse is passed through as a bare JSON string.
pub fn parse_chat_response(json: &Value) -> Result<AssistantReply> {
    let message = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .context("Invalid chat response: missing choices[0].message")?;

    let content = message
        .get("content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .filter(|c| !c.trim().is_empty());

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(|t| t.as_array()) {
        for call in calls {
            let function = call
                .get("function")
                .context("Invalid chat response: tool call without function")?;
            let name = function
                .get("name")
                .and_then(|n| n.as_str())
                .context("Invalid chat response: tool call without name")?;
            let raw = function
                .get("arguments")
                .and_then(|a| a.as_str())
                .unwrap_or("{}");
            let arguments =
                serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
            let id = call
                .get("id")
                .and_then(|i| i.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| format!("call_{}", tool_calls.len()));
            tool_calls.push(ToolCall {
                id,
                name: name.to_string(),
                arguments,
            });
        }
    }

    Ok(AssistantReply {
        content,
        tool_calls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_reply() {
        let json = json!({"choices": [{"message": {"role": "assistant", "content": "Walk-ins are welcome."}}]});
        let reply = parse_chat_response(&json).unwrap();
        assert_eq!(reply.content.as_deref(), Some("Walk-ins are welcome."));
        assert!(reply.tool_calls.is_empty());
    }

    #[test]
    fn parses_tool_calls_with_string_arguments() {
        let json = json!({"choices": [{"message": {
            "role": "assistant",
            "content": null,
            "tool_calls": [{
                "id": "call_abc",
                "type": "function",
                "function": {"name": "lookup_topic", "arguments": "{\"topic\":\"walk-in\"}"}
            }]
        }}]});
        let reply = parse_chat_response(&json).unwrap();
        assert!(reply.content.is_none());
        assert_eq!(
            reply.tool_calls,
            vec![ToolCall {
                id: "call_abc".into(),
                name: "lookup_topic".into(),
                arguments: json!({"topic": "walk-in"}),
            }]
        );
    }

    #[test]
    fn missing_choices_is_an_error() {
        assert!(parse_chat_response(&json!({"error": "nope"})).is_err());
    }

    #[test]
    fn assistant_tool_calls_encode_arguments_as_string() {
        let message = Message::Assistant {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: "c1".into(),
                name: "search".into(),
                arguments: json!({"query": "hours"}),
            }],
        };
        let wire = message_to_wire(&message);
        assert_eq!(wire["content"], Value::Null);
        assert_eq!(wire["tool_calls"][0]["function"]["arguments"], json!("{\"query\":\"hours\"}"));

        let tool = Message::Tool {
            tool_call_id: "c1".into(),
            name: "search".into(),
            content: "ctx".into(),
        };
        assert_eq!(
            message_to_wire(&tool),
            json!({"role": "tool", "tool_call_id": "c1", "content": "ctx"})
        );
    }

    #[test]
    fn tool_spec_is_wrapped_as_function() {
        let spec = ToolSpec {
            name: "search".into(),
            description: "d".into(),
            parameters: json!({"type": "object"}),
        };
        assert_eq!(tool_to_wire(&spec)["function"]["name"], "search");
        assert_eq!(tool_to_wire(&spec)["type"], "function");
    }
}
