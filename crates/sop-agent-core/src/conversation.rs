//! Per-turn conversation state machine.
//!
//! A [`ConversationState`] is created for every caller turn from the system
//! instructions, the session's prior history, and the new user message. The
//! orchestrator then drives it through these phases:
//!
//! ```text
//! AwaitingModel ──tool calls──▶ ExecutingTool ──results──▶ AwaitingModel
//!       │
//!       └──plain content──▶ Responding ──finish──▶ Done
//!
//! any phase ──fail──▶ Done (fallback response)
//! ```
//!
//! Transitions out of order are rejected with an error rather than
//! silently corrupting the message log. Prior history is never mutated:
//! the updated history returned at the end of a turn always starts with the
//! input history verbatim.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// One role-tagged entry in the conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        tool_call_id: String,
        name: String,
        content: String,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Message::System { .. } => "system",
            Message::User { .. } => "user",
            Message::Assistant { .. } => "assistant",
            Message::Tool { .. } => "tool",
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Message::System { content }
            | Message::User { content }
            | Message::Assistant { content, .. }
            | Message::Tool { content, .. } => content,
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Message::System { .. })
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Model-assigned id echoed back in the matching tool result.
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments, e.g. `{"query": "walk-in hours"}`.
    pub arguments: serde_json::Value,
}

/// Coarse position of the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStage {
    Greeting,
    Main,
    Closing,
}

const CLOSING_PHRASES: &[&str] = &[
    "goodbye",
    "bye",
    "that's all",
    "that is all",
    "nothing else",
    "have a good day",
];

impl CallStage {
    /// Derive the stage for a turn from prior history and the new utterance.
    pub fn classify(history: &[Message], query: &str) -> Self {
        let lowered = query.to_lowercase();
        if CLOSING_PHRASES.iter().any(|p| lowered.contains(p)) {
            return CallStage::Closing;
        }
        if history.iter().any(|m| matches!(m, Message::User { .. })) {
            CallStage::Main
        } else {
            CallStage::Greeting
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    AwaitingModel,
    ExecutingTool,
    Responding,
    Done,
}

/// Why a turn ended abnormally, and what the caller hears instead.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnError {
    pub message: String,
    pub fallback: String,
}

/// Mutable record for one caller turn.
#[derive(Debug, Clone)]
pub struct ConversationState {
    messages: Vec<Message>,
    /// Prior non-system history, kept verbatim for the returned history.
    history: Vec<Message>,
    /// Index in `messages` of the current user message.
    user_index: usize,
    pub retrieved_context: Option<String>,
    pub current_query: Option<String>,
    pending_tool_calls: Vec<ToolCall>,
    candidate_response: Option<String>,
    final_response: Option<String>,
    error: Option<TurnError>,
    stage: CallStage,
    phase: TurnPhase,
    tool_rounds: usize,
}

impl ConversationState {
    /// Start a turn: system instructions, prior non-system history, then the
    /// new user message.
    pub fn begin_turn(system_prompt: &str, history: &[Message], query: &str) -> Self {
        let history: Vec<Message> = history.iter().filter(|m| !m.is_system()).cloned().collect();
        let stage = CallStage::classify(&history, query);

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(system_prompt));
        messages.extend(history.iter().cloned());
        let user_index = messages.len();
        messages.push(Message::user(query));

        Self {
            messages,
            history,
            user_index,
            retrieved_context: None,
            current_query: Some(query.to_string()),
            pending_tool_calls: Vec::new(),
            candidate_response: None,
            final_response: None,
            error: None,
            stage,
            phase: TurnPhase::AwaitingModel,
            tool_rounds: 0,
        }
    }

    /// Full message log to send to the model.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn stage(&self) -> CallStage {
        self.stage
    }

    /// Number of completed model replies that requested tools.
    pub fn tool_rounds(&self) -> usize {
        self.tool_rounds
    }

    pub fn pending_tool_calls(&self) -> &[ToolCall] {
        &self.pending_tool_calls
    }

    pub fn final_response(&self) -> Option<&str> {
        self.final_response.as_deref()
    }

    pub fn error(&self) -> Option<&TurnError> {
        self.error.as_ref()
    }

    /// Record a model reply. Tool calls move the turn to `ExecutingTool`;
    /// plain content moves it to `Responding`.
    pub fn record_model_reply(
        &mut self,
        content: Option<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Result<TurnPhase> {
        self.expect_phase(TurnPhase::AwaitingModel)?;

        if !tool_calls.is_empty() {
            self.messages.push(Message::Assistant {
                content: content.unwrap_or_default(),
                tool_calls: tool_calls.clone(),
            });
            self.pending_tool_calls = tool_calls;
            self.tool_rounds += 1;
            self.phase = TurnPhase::ExecutingTool;
            return Ok(self.phase);
        }

        let text = content.map(|c| c.trim().to_string()).unwrap_or_default();
        if text.is_empty() {
            bail!("model returned neither content nor tool calls");
        }
        self.candidate_response = Some(text);
        self.phase = TurnPhase::Responding;
        Ok(self.phase)
    }

    /// Append the result of one pending tool call.
    ///
    /// Once every pending call has a result the turn returns to
    /// `AwaitingModel`.
    pub fn record_tool_result(&mut self, call_id: &str, output: String) -> Result<()> {
        self.expect_phase(TurnPhase::ExecutingTool)?;

        let pos = self
            .pending_tool_calls
            .iter()
            .position(|c| c.id == call_id)
            .ok_or_else(|| anyhow::anyhow!("no pending tool call with id {}", call_id))?;
        let call = self.pending_tool_calls.remove(pos);

        self.messages.push(Message::Tool {
            tool_call_id: call.id,
            name: call.name,
            content: output.clone(),
        });
        self.retrieved_context = Some(output);

        if self.pending_tool_calls.is_empty() {
            self.phase = TurnPhase::AwaitingModel;
        }
        Ok(())
    }

    /// The plain-content reply awaiting [`finish`](Self::finish).
    pub fn candidate_response(&self) -> Option<&str> {
        self.candidate_response.as_deref()
    }

    /// Commit `response` as the turn's answer.
    pub fn finish(&mut self, response: String) -> Result<()> {
        self.expect_phase(TurnPhase::Responding)?;
        if response.trim().is_empty() {
            bail!("final response is empty");
        }
        self.messages.push(Message::assistant(response.clone()));
        self.candidate_response = None;
        self.final_response = Some(response);
        self.phase = TurnPhase::Done;
        Ok(())
    }

    /// End the turn abnormally. Valid from any phase; the fallback becomes
    /// the assistant reply and no final response is recorded.
    pub fn fail(&mut self, error: impl Into<String>, fallback: impl Into<String>) {
        let fallback = fallback.into();
        self.pending_tool_calls.clear();
        self.candidate_response = None;
        self.final_response = None;
        self.messages.push(Message::assistant(fallback.clone()));
        self.error = Some(TurnError {
            message: error.into(),
            fallback,
        });
        self.phase = TurnPhase::Done;
    }

    /// Consume a finished turn, returning the spoken response and the
    /// updated session history.
    ///
    /// The history is the prior history verbatim, the user message, and the
    /// final assistant message. With `persist_tool_messages` the tool-call
    /// and tool-result messages of a successful turn are kept in between. A
    /// failed turn never keeps them, since its last tool calls may have no
    /// results.
    pub fn into_outcome(self, persist_tool_messages: bool) -> Result<(String, Vec<Message>)> {
        self.expect_phase(TurnPhase::Done)?;

        let keep_tool_messages = persist_tool_messages && self.error.is_none();
        let response = match (self.final_response, self.error) {
            (Some(r), _) => r,
            (None, Some(e)) => e.fallback,
            (None, None) => bail!("finished turn has no response"),
        };

        let mut history = self.history;
        let mut turn = self.messages.into_iter().skip(self.user_index);
        if let Some(user) = turn.next() {
            history.push(user);
        }
        if keep_tool_messages {
            history.extend(turn);
        } else {
            history.push(Message::assistant(response.clone()));
        }
        Ok((response, history))
    }

    fn expect_phase(&self, phase: TurnPhase) -> Result<()> {
        if self.phase != phase {
            bail!("invalid transition: turn is {:?}, expected {:?}", self.phase, phase);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: json!({"query": "walk-in"}),
        }
    }

    #[test]
    fn initial_state_is_system_history_user() {
        let history = vec![Message::user("hi"), Message::assistant("hello")];
        let state = ConversationState::begin_turn("sys", &history, "walk in?");
        let roles: Vec<&str> = state.messages().iter().map(|m| m.role()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(state.phase(), TurnPhase::AwaitingModel);
        assert_eq!(state.stage(), CallStage::Main);
    }

    #[test]
    fn system_messages_in_history_are_dropped() {
        let history = vec![Message::system("old"), Message::user("hi")];
        let state = ConversationState::begin_turn("new", &history, "again");
        let systems = state.messages().iter().filter(|m| m.is_system()).count();
        assert_eq!(systems, 1);
        assert_eq!(state.messages()[0].content(), "new");
    }

    #[test]
    fn first_turn_is_greeting_stage() {
        let state = ConversationState::begin_turn("sys", &[], "Hi there");
        assert_eq!(state.stage(), CallStage::Greeting);
    }

    #[test]
    fn farewell_is_closing_stage() {
        let state = ConversationState::begin_turn("sys", &[], "Okay, that's all, goodbye");
        assert_eq!(state.stage(), CallStage::Closing);
    }

    #[test]
    fn tool_round_trip_then_response() {
        let mut state = ConversationState::begin_turn("sys", &[], "walk in?");
        let phase = state
            .record_model_reply(None, vec![call("c1", "search")])
            .unwrap();
        assert_eq!(phase, TurnPhase::ExecutingTool);
        assert_eq!(state.tool_rounds(), 1);

        state.record_tool_result("c1", "[chunk_001]\nWalk-ins welcome".into()).unwrap();
        assert_eq!(state.phase(), TurnPhase::AwaitingModel);
        assert!(state.retrieved_context.as_deref().unwrap().contains("Walk-ins"));

        let phase = state
            .record_model_reply(Some("Yes, walk-ins are welcome.".into()), vec![])
            .unwrap();
        assert_eq!(phase, TurnPhase::Responding);
        state.finish("Yes, walk-ins are welcome.".into()).unwrap();
        assert_eq!(state.final_response(), Some("Yes, walk-ins are welcome."));
        assert!(state.error().is_none());
    }

    #[test]
    fn waits_for_every_pending_tool() {
        let mut state = ConversationState::begin_turn("sys", &[], "q");
        state
            .record_model_reply(None, vec![call("a", "search"), call("b", "lookup_topic")])
            .unwrap();
        state.record_tool_result("a", "one".into()).unwrap();
        assert_eq!(state.phase(), TurnPhase::ExecutingTool);
        assert!(state.record_tool_result("zzz", "x".into()).is_err());
        state.record_tool_result("b", "two".into()).unwrap();
        assert_eq!(state.phase(), TurnPhase::AwaitingModel);
        assert_eq!(state.retrieved_context.as_deref(), Some("two"));
    }

    #[test]
    fn empty_reply_is_rejected() {
        let mut state = ConversationState::begin_turn("sys", &[], "q");
        assert!(state.record_model_reply(Some("   ".into()), vec![]).is_err());
        assert!(state.record_model_reply(None, vec![]).is_err());
    }

    #[test]
    fn out_of_order_transitions_are_rejected() {
        let mut state = ConversationState::begin_turn("sys", &[], "q");
        assert!(state.record_tool_result("c1", "x".into()).is_err());
        assert!(state.finish("x".into()).is_err());
    }

    #[test]
    fn failure_sets_error_not_final_response() {
        let mut state = ConversationState::begin_turn("sys", &[], "q");
        state.record_model_reply(None, vec![call("c1", "search")]).unwrap();
        state.fail("boom", "Sorry about that.");
        assert_eq!(state.phase(), TurnPhase::Done);
        assert!(state.final_response().is_none());
        assert_eq!(state.error().unwrap().message, "boom");

        let (response, history) = state.into_outcome(false).unwrap();
        assert_eq!(response, "Sorry about that.");
        assert_eq!(history, vec![Message::user("q"), Message::assistant("Sorry about that.")]);
    }

    #[test]
    fn outcome_preserves_prior_history_verbatim() {
        let prior = vec![Message::user("first"), Message::assistant("answer one")];
        let mut state = ConversationState::begin_turn("sys", &prior, "second");
        state.record_model_reply(Some("answer two".into()), vec![]).unwrap();
        state.finish("answer two".into()).unwrap();
        let (_, history) = state.into_outcome(false).unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(&history[..2], &prior[..]);
        assert_eq!(history[3], Message::assistant("answer two"));
    }

    #[test]
    fn outcome_can_keep_tool_messages() {
        let mut state = ConversationState::begin_turn("sys", &[], "q");
        state.record_model_reply(None, vec![call("c1", "search")]).unwrap();
        state.record_tool_result("c1", "ctx".into()).unwrap();
        state.record_model_reply(Some("done".into()), vec![]).unwrap();
        state.finish("done".into()).unwrap();
        let (_, history) = state.into_outcome(true).unwrap();
        let roles: Vec<&str> = history.iter().map(|m| m.role()).collect();
        assert_eq!(roles, vec!["user", "assistant", "tool", "assistant"]);
    }

    #[test]
    fn failed_turn_drops_unanswered_tool_calls() {
        let mut state = ConversationState::begin_turn("sys", &[], "q");
        state.record_model_reply(None, vec![call("c1", "search")]).unwrap();
        state.fail("tool exploded", "Sorry about that.");

        let (_, history) = state.into_outcome(true).unwrap();
        assert_eq!(history, vec![Message::user("q"), Message::assistant("Sorry about that.")]);
    }

    #[test]
    fn unfinished_turn_has_no_outcome() {
        let state = ConversationState::begin_turn("sys", &[], "q");
        assert!(state.into_outcome(false).is_err());
    }

    #[test]
    fn messages_serialize_with_role_tag() {
        let value = serde_json::to_value(Message::user("hi")).unwrap();
        assert_eq!(value, json!({"role": "user", "content": "hi"}));
        let back: Message = serde_json::from_value(json!({"role": "assistant", "content": "yo"})).unwrap();
        assert_eq!(back, Message::assistant("yo"));
    }
}
