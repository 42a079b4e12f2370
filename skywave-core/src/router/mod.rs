//! Router / planner: transcript → [`Plan`] without always paying for the
//! LLM.
//!
//! Decision order: the auxiliary command dispatcher first (declarative
//! station commands with side effects), then the low-confidence repair
//! rule, then the exact operator-command table, then the general LLM path.

pub mod dispatch;

use tracing::debug;

use crate::config::RouterConfig;
use crate::memory::ConversationMemory;
use crate::stt::Transcript;
use dispatch::CommandDispatcher;

/// What to do with one transcript.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    /// Do nothing.
    NoOp,
    /// Synthesize and transmit directly (fast path).
    Speak { answer_text: String },
    /// Optionally acknowledge, then ask the LLM.
    SpeakAckThenAnswer {
        ack_text: Option<String>,
        prompt: String,
    },
    /// Canned phrase for unusable input.
    Fallback { fallback_text: String },
}

impl Plan {
    /// For logging: does this plan reach the language model?
    pub fn needs_llm(&self) -> bool {
        matches!(self, Plan::SpeakAckThenAnswer { .. })
    }
}

/// Built-in operator commands, matched exactly after normalization.
const OPERATOR_COMMANDS: &[(&str, &str)] = &[
    ("status", "All nominal"),
    ("radio check", "Read you loud and clear"),
];

pub struct Router {
    config: RouterConfig,
    commands: Vec<(String, String)>,
    dispatcher: Option<Box<dyn CommandDispatcher>>,
}

impl Router {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            config,
            commands: OPERATOR_COMMANDS
                .iter()
                .map(|&(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            dispatcher: None,
        }
    }

    /// Attach a command dispatcher consulted before any fixed rule.
    pub fn with_dispatcher(mut self, dispatcher: Box<dyn CommandDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Add or replace one operator command.
    pub fn add_command(&mut self, phrase: &str, answer: &str) {
        let key = normalize_command(phrase);
        if let Some(entry) = self.commands.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = answer.to_string();
        } else {
            self.commands.push((key, answer.to_string()));
        }
    }

    /// Short follow-ups in a flowing exchange skip the acknowledgement.
    const FOLLOW_UP_MAX_WORDS: usize = 4;

    pub fn decide(&self, transcript: &Transcript, prior_context: &ConversationMemory) -> Plan {
        if let Some(dispatcher) = &self.dispatcher {
            if let Some(confirmation) = dispatcher.dispatch(&transcript.text) {
                debug!(confirmation = confirmation.as_str(), "dispatcher handled turn");
                return Plan::Speak {
                    answer_text: confirmation,
                };
            }
        }

        if transcript.confidence < self.config.repair_confidence_threshold {
            debug!(
                confidence = transcript.confidence,
                threshold = self.config.repair_confidence_threshold,
                "repair plan for low-confidence transcript"
            );
            return Plan::Fallback {
                fallback_text: self.config.repair_phrase.clone(),
            };
        }

        let normalized = normalize_command(&transcript.text);
        if normalized.is_empty() {
            return Plan::Fallback {
                fallback_text: self.config.repair_phrase.clone(),
            };
        }

        if let Some((_, answer)) = self.commands.iter().find(|(k, _)| *k == normalized) {
            return Plan::Speak {
                answer_text: answer.clone(),
            };
        }

        // Mid-conversation one-liners get answered without the "Stand by"
        // preamble; the operator is already waiting on us.
        let flowing = prior_context.len() > 2
            && normalized.split_whitespace().count() <= Self::FOLLOW_UP_MAX_WORDS;
        Plan::SpeakAckThenAnswer {
            ack_text: if flowing {
                None
            } else {
                self.config.ack_phrase.clone()
            },
            prompt: transcript.text.trim().to_string(),
        }
    }
}

/// Lowercase, strip punctuation, collapse whitespace, and drop a trailing
/// "over" — operators end transmissions with it, commands do not carry it.
pub fn normalize_command(text: &str) -> String {
    let lowered: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let mut words: Vec<&str> = lowered.split_whitespace().collect();
    if words.last() == Some(&"over") {
        words.pop();
    }
    words.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> Router {
        Router::new(RouterConfig {
            repair_confidence_threshold: 0.25,
            repair_phrase: "Say again".into(),
            ack_phrase: Some("Stand by".into()),
        })
    }

    fn heard(text: &str, confidence: f32) -> Transcript {
        Transcript::new(text, text.split_whitespace().count(), confidence)
    }

    fn no_context() -> ConversationMemory {
        ConversationMemory::new("sys", 24, 10_000)
    }

    fn flowing_context() -> ConversationMemory {
        let mut m = no_context();
        m.push(crate::memory::ConversationMessage::user("what's the forecast"));
        m.push(crate::memory::ConversationMessage::assistant("Clear skies, over"));
        m
    }

    #[test]
    fn exact_command_takes_fast_path() {
        let plan = router().decide(&heard("status", 0.9), &no_context());
        assert_eq!(
            plan,
            Plan::Speak {
                answer_text: "All nominal".into()
            }
        );
        assert!(!plan.needs_llm());
    }

    #[test]
    fn command_matching_survives_case_punctuation_and_over() {
        let plan = router().decide(&heard("  Radio Check, over.  ", 0.8), &no_context());
        assert_eq!(
            plan,
            Plan::Speak {
                answer_text: "Read you loud and clear".into()
            }
        );
    }

    #[test]
    fn low_confidence_yields_repair_fallback() {
        let plan = router().decide(&heard("status", 0.1), &no_context());
        assert_eq!(
            plan,
            Plan::Fallback {
                fallback_text: "Say again".into()
            }
        );
    }

    #[test]
    fn general_utterance_goes_to_llm_with_ack() {
        let plan = router().decide(&heard("describe the situation", 0.9), &no_context());
        assert_eq!(
            plan,
            Plan::SpeakAckThenAnswer {
                ack_text: Some("Stand by".into()),
                prompt: "describe the situation".into()
            }
        );
        assert!(plan.needs_llm());
    }

    #[test]
    fn short_follow_up_in_conversation_skips_the_ack() {
        let plan = router().decide(&heard("and tomorrow", 0.9), &flowing_context());
        assert_eq!(
            plan,
            Plan::SpeakAckThenAnswer {
                ack_text: None,
                prompt: "and tomorrow".into()
            }
        );

        // Long requests keep the acknowledgement even mid-conversation.
        let plan = router().decide(
            &heard("give me the full weather rundown for the ridge", 0.9),
            &flowing_context(),
        );
        assert!(matches!(
            plan,
            Plan::SpeakAckThenAnswer {
                ack_text: Some(_),
                ..
            }
        ));
    }

    #[test]
    fn dispatcher_is_consulted_first() {
        struct Always;
        impl CommandDispatcher for Always {
            fn dispatch(&self, _transcript: &str) -> Option<String> {
                Some("Frequency set".into())
            }
        }
        let plan = router()
            .with_dispatcher(Box::new(Always))
            .decide(&heard("status", 0.9), &no_context());
        assert_eq!(
            plan,
            Plan::Speak {
                answer_text: "Frequency set".into()
            }
        );
    }

    #[test]
    fn added_commands_override_and_extend() {
        let mut r = router();
        r.add_command("status", "Green across the board");
        r.add_command("Time check", "Standby for time");

        assert_eq!(
            r.decide(&heard("status", 0.9), &no_context()),
            Plan::Speak {
                answer_text: "Green across the board".into()
            }
        );
        assert_eq!(
            r.decide(&heard("time check over", 0.9), &no_context()),
            Plan::Speak {
                answer_text: "Standby for time".into()
            }
        );
    }

    #[test]
    fn normalization_rules() {
        assert_eq!(normalize_command("Radio Check, over."), "radio check");
        assert_eq!(normalize_command("OVER"), "");
        assert_eq!(normalize_command("  what's   up  "), "what s up");
    }
}
