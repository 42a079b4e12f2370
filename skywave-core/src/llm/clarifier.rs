//! Clarifier pre-pass.
//!
//! Before the main model sees a transcript, a cheap resolution call may
//! rewrite references ("that one" → the thing just discussed) and likely
//! radio mis-hearings ("that fan" → "that frequency"). When the clarifier
//! answers with the configured unknown sentinel, the main LLM is skipped
//! and a repair phrase is spoken instead.

use tracing::{debug, warn};

use super::{ChatModel, GenerateRequest};
use crate::config::ClarifierConfig;
use crate::memory::ConversationMemory;
use crate::stt::Transcript;

/// Clarifier token budget — one rewritten sentence.
const CLARIFIER_MAX_TOKENS: u32 = 80;

/// Outcome of the pre-pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clarification {
    /// Use this text instead of the raw transcript.
    Rewritten(String),
    /// The clarifier could not make sense of the input; skip the main LLM.
    Unknown,
    /// Pre-pass not applicable; use the transcript as-is.
    Skipped,
}

/// Whether this transcript qualifies for clarification: enough context,
/// enough signal, and not a blank.
pub fn should_clarify(
    config: &ClarifierConfig,
    memory: &ConversationMemory,
    transcript: &Transcript,
    blank_sentinel: &str,
) -> bool {
    if !config.enabled {
        return false;
    }
    // With no prior exchange there is nothing to resolve against.
    if memory.len() < 2 {
        return false;
    }
    let trimmed = transcript.text.trim();
    trimmed.chars().count() >= config.min_chars
        && transcript.confidence >= config.min_confidence
        && trimmed != blank_sentinel
}

/// Run the pre-pass. Transport failures degrade to `Skipped` — a broken
/// clarifier must never cost the turn.
pub fn clarify(
    client: &dyn ChatModel,
    config: &ClarifierConfig,
    memory: &ConversationMemory,
    transcript: &Transcript,
) -> Clarification {
    let recent = memory.recent_turns(3);
    let mut context = String::new();
    for message in &recent {
        context.push_str(&format!("{:?}: {}\n", message.role, message.content));
    }

    let system = format!(
        "You resolve references in radio transmissions. Given the recent \
         conversation and the operator's latest message, rewrite the message \
         with references resolved and obvious mis-hearings corrected. Output \
         only the rewritten message. If it cannot be understood, output \
         exactly {}.",
        config.unknown_sentinel
    );
    let prompt = format!("Conversation:\n{context}\nLatest message: {}", transcript.text);

    let request = GenerateRequest {
        user_prompt: &prompt,
        system_prompt_override: Some(&system),
        max_tokens: Some(CLARIFIER_MAX_TOKENS),
        ..Default::default()
    };

    match client.generate(&request) {
        Ok(outcome) => {
            let rewritten = outcome.content.trim().to_string();
            if rewritten == config.unknown_sentinel {
                debug!("clarifier returned unknown sentinel");
                Clarification::Unknown
            } else if rewritten.is_empty() {
                Clarification::Skipped
            } else {
                debug!(rewritten = rewritten.as_str(), "clarifier rewrote transcript");
                Clarification::Rewritten(rewritten)
            }
        }
        Err(e) => {
            warn!(error = %e, "clarifier call failed; using raw transcript");
            Clarification::Skipped
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ConversationMessage;

    fn config() -> ClarifierConfig {
        ClarifierConfig {
            enabled: true,
            min_chars: 8,
            min_confidence: 0.45,
            unknown_sentinel: "UNKNOWN".into(),
        }
    }

    fn memory_with_history() -> ConversationMemory {
        let mut m = ConversationMemory::new("sys", 24, 10_000);
        m.push(ConversationMessage::user("tune to the repeater"));
        m.push(ConversationMessage::assistant("Tuned, over"));
        m
    }

    #[test]
    fn requires_prior_context() {
        let empty = ConversationMemory::new("sys", 24, 10_000);
        let t = Transcript::new("switch back to that fan", 5, 0.9);
        assert!(!should_clarify(&config(), &empty, &t, "[BLANK_AUDIO]"));
        assert!(should_clarify(&config(), &memory_with_history(), &t, "[BLANK_AUDIO]"));
    }

    #[test]
    fn gates_on_length_confidence_and_blank() {
        let memory = memory_with_history();
        let short = Transcript::new("uh", 1, 0.9);
        assert!(!should_clarify(&config(), &memory, &short, "[BLANK_AUDIO]"));

        let mumble = Transcript::new("switch back to that fan", 5, 0.2);
        assert!(!should_clarify(&config(), &memory, &mumble, "[BLANK_AUDIO]"));

        let blank = Transcript::new("[BLANK_AUDIO]", 3, 0.99);
        assert!(!should_clarify(&config(), &memory, &blank, "[BLANK_AUDIO]"));
    }

    #[test]
    fn disabled_config_never_clarifies() {
        let mut c = config();
        c.enabled = false;
        let t = Transcript::new("switch back to that fan", 5, 0.9);
        assert!(!should_clarify(&c, &memory_with_history(), &t, "[BLANK_AUDIO]"));
    }
}
