//! Fixed wording spoken by, or given to, the assistant.

use sop_agent_core::conversation::CallStage;

/// Opening line of every new call. Spoken once, never by the model.
pub const GREETING: &str =
    "Thank you for calling WellStreet Urgent Care. This is Sarah. How may I help you today?";

/// Spoken when a turn fails for any reason.
pub const ERROR_FALLBACK: &str = "I apologize, but I'm having trouble accessing that information right now. Let me connect you with one of our staff members who can help you directly. Would you like me to transfer you, or is there something else I can help you with?";

/// Suggested reply when the procedures have nothing on the question.
pub const NO_RESULTS_REPLY: &str = "I don't have specific information about that in our system. Let me check with our staff to get you the correct answer. Can you hold for just a moment, or would you prefer I have someone call you back?";

/// Spoken when the caller's turn had no words in it.
pub const CLARIFICATION: &str = "I'm sorry, I didn't quite catch that. Could you please repeat your question?";

pub const CLOSING: &str = "Is there anything else I can help you with today?";

pub const GOODBYE: &str = "Thank you for calling WellStreet Urgent Care. Have a great day!";

pub const TRANSFER: &str = "I'll connect you with one of our team members who can help you with that. Please hold while I transfer you.";

pub const SYSTEM_PROMPT: &str = r#"You are Sarah, a friendly and professional voice assistant for WellStreet Urgent Care clinic.

You help patients who call the clinic with:
- Scheduling, rescheduling, or cancelling appointments
- Questions about walk-in availability
- Directions to the clinic
- Wait times
- Late arrivals
- Online booking

GUIDELINES:
1. Be warm, polite, and professional.
2. This is a VOICE call: keep replies short (1-3 sentences), no lists, no markdown.
3. Look information up with the `search` or `lookup_topic` tools before answering. Never make things up.
4. Use `lookup_topic` when the request matches a known topic (greeting, scheduling, cancellation, reschedule, walk-in, directions, wait times, late arrival, online booking, closing, hold, communication); use `search` otherwise.
5. Don't say "according to the SOP" or mention documents. Just give the information naturally.
6. If the tools find nothing relevant, say so honestly and offer to check with staff or transfer the caller.

THE GREETING HAS ALREADY BEEN SPOKEN:
The caller has already heard "Thank you for calling WellStreet Urgent Care. This is Sarah. How may I help you today?". Never say it again and never start a reply with "Thank you for calling". Respond directly to what the caller asked.

SCHEDULING:
- All appointments are scheduled through the website; offer to send the scheduling link.
- Walk-ins are always available as an alternative, no appointment needed.
- Do not ask for specific dates or times; availability cannot be checked by phone.

EMPATHY:
- Acknowledge the caller naturally and keep a calm, helpful tone."#;

/// System instructions for a turn, with a note for the current call stage.
pub fn system_prompt_for(base: &str, stage: CallStage) -> String {
    match stage {
        CallStage::Greeting => format!(
            "{}\n\nThis is the caller's first request. Answer it directly.",
            base
        ),
        CallStage::Main => base.to_string(),
        CallStage::Closing => format!(
            "{}\n\nThe caller is wrapping up. If nothing is left to answer, end with: \"{}\"",
            base, GOODBYE
        ),
    }
}

/// Hint appended to tool output that found nothing.
pub fn no_results_hint() -> String {
    format!(
        "Nothing relevant was found. You may tell the caller: \"{}\" If they ask for a person, say: \"{}\"",
        NO_RESULTS_REPLY, TRANSFER
    )
}

/// Remove every occurrence of the opening greeting from `reply`.
///
/// Returns `None` when nothing but the greeting was said.
pub fn strip_greeting(reply: &str) -> Option<String> {
    let lowered = reply.to_ascii_lowercase();
    let greeting = GREETING.to_ascii_lowercase();
    if !lowered.contains(&greeting) {
        return Some(reply.to_string());
    }

    let mut out = String::with_capacity(reply.len());
    let mut rest = reply;
    let mut rest_lower = lowered.as_str();
    while let Some(pos) = rest_lower.find(&greeting) {
        out.push_str(&rest[..pos]);
        rest = &rest[pos + greeting.len()..];
        rest_lower = &rest_lower[pos + greeting.len()..];
    }
    out.push_str(rest);

    let cleaned = out.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_greeting_removes_repeat() {
        let reply = format!("{} Yes, walk-ins are welcome anytime.", GREETING);
        assert_eq!(
            strip_greeting(&reply).as_deref(),
            Some("Yes, walk-ins are welcome anytime.")
        );
    }

    #[test]
    fn strip_greeting_leaves_other_text() {
        assert_eq!(strip_greeting("Sure!").as_deref(), Some("Sure!"));
    }

    #[test]
    fn greeting_only_reply_is_empty() {
        assert_eq!(strip_greeting(GREETING), None);
    }

    #[test]
    fn closing_stage_mentions_goodbye() {
        let prompt = system_prompt_for(SYSTEM_PROMPT, CallStage::Closing);
        assert!(prompt.contains(GOODBYE));
        assert_eq!(system_prompt_for("x", CallStage::Main), "x");
    }
}
