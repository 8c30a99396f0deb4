//! Turn orchestration: model ⇄ tools loop over a [`ConversationState`].
//!
//! ```text
//! respond(query, history)
//!   └─ begin_turn ─▶ model ──tool calls──▶ dispatch ──▶ model ─ … ─▶ reply
//!                        (at most max_tool_rounds tool round-trips)
//! ```
//!
//! A turn always produces an answer. Model failures, tool failures, an
//! empty reply, the round cap, and the turn timeout all end the turn with
//! [`ERROR_FALLBACK`]; the caller's message is still recorded in the
//! returned history.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AgentConfig;
use crate::error::{as_sop_error, SopError};
use crate::llm::ChatModel;
use crate::prompts::{
    no_results_hint, strip_greeting, system_prompt_for, CLARIFICATION, CLOSING, ERROR_FALLBACK,
    GREETING, SYSTEM_PROMPT,
};
use crate::retriever::Retriever;
use crate::tools::{ToolContext, ToolRegistry, NO_RESULTS};
use sop_agent_core::conversation::{CallStage, ConversationState, Message, TurnPhase};

pub struct SopAgent {
    model: Arc<dyn ChatModel>,
    tools: Arc<ToolRegistry>,
    ctx: ToolContext,
    system_prompt: String,
    max_tool_rounds: usize,
    turn_timeout: Duration,
    persist_tool_messages: bool,
}

impl SopAgent {
    /// Agent with the built-in `search` and `lookup_topic` tools.
    pub fn new(model: Arc<dyn ChatModel>, retriever: Retriever, config: &AgentConfig) -> Self {
        Self::with_tools(
            model,
            Arc::new(ToolRegistry::with_builtins()),
            retriever,
            config,
        )
    }

    pub fn with_tools(
        model: Arc<dyn ChatModel>,
        tools: Arc<ToolRegistry>,
        retriever: Retriever,
        config: &AgentConfig,
    ) -> Self {
        Self {
            model,
            tools,
            ctx: ToolContext::new(retriever),
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| SYSTEM_PROMPT.to_string()),
            max_tool_rounds: config.max_tool_rounds.max(1),
            turn_timeout: Duration::from_secs(config.turn_timeout_secs),
            persist_tool_messages: config.persist_tool_messages,
        }
    }

    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = timeout;
        self
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn tool_context(&self) -> &ToolContext {
        &self.ctx
    }

    /// Opening line for a new call.
    pub fn greet(&self) -> String {
        GREETING.to_string()
    }

    /// Answer `query` given the session's prior `history`.
    ///
    /// Returns the spoken reply and the updated history: `history`
    /// verbatim (system messages dropped) followed by this turn's messages.
    /// Never fails.
    pub async fn respond(&self, query: &str, history: &[Message]) -> (String, Vec<Message>) {
        let query = query.trim();
        let stage = CallStage::classify(history, query);
        let system = system_prompt_for(&self.system_prompt, stage);
        let mut state = ConversationState::begin_turn(&system, history, query);

        if query.is_empty() {
            tracing::info!("blank caller turn");
            state.fail("blank query", CLARIFICATION);
        } else {
            let outcome = tokio::time::timeout(self.turn_timeout, self.drive(&mut state)).await;
            let err = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e),
                Err(_) => Some(SopError::TurnTimeout(self.turn_timeout.as_secs()).into()),
            };
            if let Some(e) = err {
                tracing::error!(error = %e, stage = ?stage, rounds = state.tool_rounds(), "turn failed");
                state.fail(format!("{:#}", e), ERROR_FALLBACK);
            }
        }

        let rounds = state.tool_rounds();
        match state.into_outcome(self.persist_tool_messages) {
            Ok((response, updated)) => {
                tracing::info!(
                    stage = ?stage,
                    rounds,
                    history = updated.len(),
                    "turn complete"
                );
                (response, updated)
            }
            Err(e) => {
                tracing::error!(error = %e, "turn ended in an inconsistent state");
                let mut updated: Vec<Message> =
                    history.iter().filter(|m| !m.is_system()).cloned().collect();
                updated.push(Message::user(query));
                updated.push(Message::assistant(ERROR_FALLBACK));
                (ERROR_FALLBACK.to_string(), updated)
            }
        }
    }

    async fn drive(&self, state: &mut ConversationState) -> Result<()> {
        let specs = self.tools.specs();

        loop {
            let reply = self.model.complete(state.messages(), &specs).await?;

            let has_content = reply.content.as_deref().is_some_and(|c| !c.trim().is_empty());
            if reply.tool_calls.is_empty() && !has_content {
                return Err(SopError::EmptyReply.into());
            }
            if !reply.tool_calls.is_empty() && state.tool_rounds() >= self.max_tool_rounds {
                return Err(SopError::ToolRoundLimit(self.max_tool_rounds).into());
            }

            match state.record_model_reply(reply.content, reply.tool_calls)? {
                TurnPhase::ExecutingTool => self.execute_pending(state).await?,
                TurnPhase::Responding => {
                    let candidate = state.candidate_response().unwrap_or_default().to_string();
                    let response = strip_greeting(&candidate).unwrap_or_else(|| {
                        tracing::debug!("reply was only the greeting");
                        CLOSING.to_string()
                    });
                    state.finish(response)?;
                    return Ok(());
                }
                other => anyhow::bail!("unexpected turn phase {:?}", other),
            }
        }
    }

    async fn execute_pending(&self, state: &mut ConversationState) -> Result<()> {
        let calls = state.pending_tool_calls().to_vec();
        let round = state.tool_rounds();

        for call in calls {
            let output = match self.tools.dispatch(&call, &self.ctx).await {
                Ok(out) if out == NO_RESULTS || out.starts_with("No procedure found") => {
                    format!("{}\n\n{}", out, no_results_hint())
                }
                Ok(out) => out,
                Err(e) => {
                    let rejected = matches!(
                        as_sop_error(&e),
                        Some(SopError::UnknownTool(_)) | Some(SopError::InvalidArgument(_))
                    );
                    if !rejected {
                        return Err(e.context(format!("tool '{}' failed", call.name)));
                    }
                    tracing::warn!(tool = %call.name, round, error = %e, "tool call rejected");
                    format!("Error: {}", e)
                }
            };
            tracing::debug!(tool = %call.name, round, chars = output.len(), "tool result");
            state.record_tool_result(&call.id, output)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::AssistantReply;
    use crate::tools::ToolSpec;
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;
    use sop_agent_core::conversation::ToolCall;
    use sop_agent_core::embedding::HashingEmbedder;
    use sop_agent_core::index::VectorIndex;
    use sop_agent_core::models::{Chunk, ChunkPosition};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned replies and records what it was sent.
    struct ScriptedModel {
        replies: Mutex<VecDeque<Result<AssistantReply>>>,
        seen: Mutex<Vec<Vec<Message>>>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<Result<AssistantReply>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, messages: &[Message], _tools: &[ToolSpec]) -> Result<AssistantReply> {
            self.seen.lock().unwrap().push(messages.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow::anyhow!("script exhausted")))
        }
    }

    /// Asks for a tool on every call.
    struct LoopingModel;

    #[async_trait]
    impl ChatModel for LoopingModel {
        fn name(&self) -> &str {
            "looping"
        }

        async fn complete(&self, messages: &[Message], _tools: &[ToolSpec]) -> Result<AssistantReply> {
            Ok(tool("search", json!({"query": format!("round {}", messages.len())})))
        }
    }

    struct SlowModel;

    #[async_trait]
    impl ChatModel for SlowModel {
        fn name(&self) -> &str {
            "slow"
        }

        async fn complete(&self, _messages: &[Message], _tools: &[ToolSpec]) -> Result<AssistantReply> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(text("too late"))
        }
    }

    fn text(content: &str) -> AssistantReply {
        AssistantReply {
            content: Some(content.to_string()),
            tool_calls: Vec::new(),
        }
    }

    fn tool(name: &str, arguments: serde_json::Value) -> AssistantReply {
        AssistantReply {
            content: None,
            tool_calls: vec![ToolCall {
                id: format!("call_{}", name),
                name: name.to_string(),
                arguments,
            }],
        }
    }

    fn retriever() -> Retriever {
        let texts = [
            "Scheduling: all appointments are booked through our website. Offer to text the scheduling link.",
            "Walk-in patients are always welcome. No appointment is needed to walk in during clinic hours.",
            "Late arrival policy: patients more than 15 minutes late may need to reschedule.",
        ];
        let embedder = HashingEmbedder::new(256).unwrap();
        let mut index = VectorIndex::new(256);
        for (i, t) in texts.iter().enumerate() {
            let chunk = Chunk::new(i as u32 + 1, t.to_string(), ChunkPosition::Middle, "sop.txt", Utc::now());
            index.insert(chunk, embedder.embed_one(t)).unwrap();
        }
        Retriever::new(index, Arc::new(embedder), 3)
    }

    fn agent(model: Arc<dyn ChatModel>) -> SopAgent {
        SopAgent::new(model, retriever(), &AgentConfig::default())
    }

    #[tokio::test]
    async fn two_turn_call_keeps_four_messages() {
        let model = ScriptedModel::new(vec![
            Ok(tool("lookup_topic", json!({"topic": "scheduling"}))),
            Ok(text("You can book through our website, and I can text you the link.")),
            Ok(tool("lookup_topic", json!({"topic": "walk-in"}))),
            Ok(text("Yes, walk-ins are always welcome and no appointment is needed.")),
        ]);
        let agent = agent(model.clone());

        let (_, history) = agent
            .respond("Hi, I'd like to schedule an appointment.", &[])
            .await;
        assert_eq!(history.len(), 2);

        let (answer, history) = agent.respond("Can I walk in instead?", &history).await;
        assert_eq!(history.len(), 4);
        assert!(answer.to_lowercase().contains("walk-in"));
        assert!(answer.contains("no appointment"));

        // the walk-in tool result reached the model
        let seen = model.seen.lock().unwrap();
        let last = seen.last().unwrap();
        assert!(last
            .iter()
            .any(|m| m.role() == "tool" && m.content().contains("Walk-in patients are always welcome")));
    }

    #[tokio::test]
    async fn model_failure_returns_fallback_and_records_user() {
        let model = ScriptedModel::new(vec![Err(anyhow::anyhow!("503 from host"))]);
        let (answer, history) = agent(model).respond("Where are you located?", &[]).await;
        assert_eq!(answer, ERROR_FALLBACK);
        assert_eq!(
            history,
            vec![Message::user("Where are you located?"), Message::assistant(ERROR_FALLBACK)]
        );
    }

    #[tokio::test]
    async fn endless_tool_calls_hit_the_round_cap() {
        let (answer, history) = agent(Arc::new(LoopingModel)).respond("walk-in?", &[]).await;
        assert_eq!(answer, ERROR_FALLBACK);
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn failed_tool_leaves_no_dangling_tool_call_in_history() {
        let embedder = HashingEmbedder::new(16).unwrap();
        let mut index = VectorIndex::new(16);
        let chunk = Chunk::new(1, "Walk-ins welcome.".into(), ChunkPosition::Middle, "sop.txt", Utc::now());
        index.insert(chunk, embedder.embed_one("Walk-ins welcome.")).unwrap();
        let broken = Retriever::new(index, Arc::new(crate::embedding::DisabledProvider), 3);

        let config = AgentConfig {
            persist_tool_messages: true,
            ..AgentConfig::default()
        };
        let agent = SopAgent::new(Arc::new(LoopingModel), broken, &config);
        let (answer, history) = agent.respond("walk-in?", &[]).await;

        assert_eq!(answer, ERROR_FALLBACK);
        assert_eq!(
            history,
            vec![Message::user("walk-in?"), Message::assistant(ERROR_FALLBACK)]
        );
    }

    #[tokio::test]
    async fn persisted_tool_messages_are_answered() {
        let model = ScriptedModel::new(vec![
            Ok(tool("lookup_topic", json!({"topic": "walk-in"}))),
            Ok(text("Walk-ins are welcome.")),
        ]);
        let config = AgentConfig {
            persist_tool_messages: true,
            ..AgentConfig::default()
        };
        let agent = SopAgent::new(model, retriever(), &config);
        let (_, history) = agent.respond("Can I walk in?", &[]).await;

        let roles: Vec<&str> = history.iter().map(|m| m.role()).collect();
        assert_eq!(roles, vec!["user", "assistant", "tool", "assistant"]);
    }

    #[tokio::test]
    async fn slow_model_times_out() {
        let agent = agent(Arc::new(SlowModel)).with_turn_timeout(Duration::from_millis(50));
        let (answer, history) = agent.respond("Are you open?", &[]).await;
        assert_eq!(answer, ERROR_FALLBACK);
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn empty_reply_falls_back() {
        let model = ScriptedModel::new(vec![Ok(AssistantReply::default())]);
        let (answer, _) = agent(model).respond("hello?", &[]).await;
        assert_eq!(answer, ERROR_FALLBACK);
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_back_to_the_model() {
        let model = ScriptedModel::new(vec![
            Ok(tool("transfer_call", json!({}))),
            Ok(text("Let me help you with that directly.")),
        ]);
        let (answer, _) = agent(model.clone()).respond("Transfer me", &[]).await;
        assert_eq!(answer, "Let me help you with that directly.");

        let seen = model.seen.lock().unwrap();
        let tool_msg = seen[1].iter().find(|m| m.role() == "tool").unwrap();
        assert!(tool_msg.content().starts_with("Error: unknown tool"));
    }

    #[tokio::test]
    async fn empty_search_result_carries_a_hint() {
        let empty = Retriever::new(VectorIndex::new(16), Arc::new(HashingEmbedder::new(16).unwrap()), 3);
        let model = ScriptedModel::new(vec![
            Ok(tool("search", json!({"query": "parking"}))),
            Ok(text("I don't have that information, let me check with staff.")),
        ]);
        let agent = SopAgent::new(model.clone(), empty, &AgentConfig::default());
        agent.respond("Is there parking?", &[]).await;

        let seen = model.seen.lock().unwrap();
        let tool_msg = seen[1].iter().find(|m| m.role() == "tool").unwrap();
        assert!(tool_msg.content().starts_with(NO_RESULTS));
        assert!(tool_msg.content().contains("check with our staff"));
    }

    #[tokio::test]
    async fn repeated_greeting_is_removed() {
        let model = ScriptedModel::new(vec![
            Ok(text("Sure, go ahead.")),
            Ok(text(&format!("{} Walk-ins are welcome.", GREETING))),
            Ok(text(GREETING)),
        ]);
        let agent = agent(model);
        let (_, history) = agent.respond("Hi", &[]).await;
        let (answer, history) = agent.respond("Walk in?", &history).await;
        assert_eq!(answer, "Walk-ins are welcome.");
        let (answer, history) = agent.respond("Thanks", &history).await;
        assert_eq!(answer, CLOSING);

        assert!(history
            .iter()
            .filter(|m| m.role() == "assistant")
            .all(|m| !m.content().contains(GREETING)));
    }

    #[tokio::test]
    async fn history_grows_and_prior_turns_are_untouched() {
        let model = ScriptedModel::new(vec![
            Ok(text("one")),
            Err(anyhow::anyhow!("boom")),
            Ok(text("three")),
        ]);
        let agent = agent(model);
        let mut history = Vec::new();
        let mut previous_len = 0;
        for q in ["first", "second", "third"] {
            let before = history.clone();
            let (answer, updated) = agent.respond(q, &history).await;
            assert!(!answer.is_empty());
            assert!(updated.len() >= previous_len);
            assert_eq!(&updated[..before.len()], &before[..]);
            previous_len = updated.len();
            history = updated;
        }
        assert_eq!(history.len(), 6);
    }

    #[tokio::test]
    async fn blank_query_asks_for_clarification() {
        let model = ScriptedModel::new(vec![]);
        let (answer, history) = agent(model.clone()).respond("   ", &[]).await;
        assert_eq!(answer, CLARIFICATION);
        assert_eq!(history.len(), 2);
        assert!(model.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn greet_is_the_fixed_opening() {
        let agent = agent(ScriptedModel::new(vec![]));
        assert_eq!(agent.greet(), GREETING);
    }
}
