//! Canned radio phrases for recovery paths, keyed by error kind and
//! response language.
//!
//! Every failure inside a turn maps to one of these so the channel is never
//! left keyed open and the operator always hears something short.

use crate::error::SkywaveError;

/// Recovery phrase selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhraseKey {
    /// Generic "wait" — timeouts and transient trouble.
    StandBy,
    /// The LLM endpoint is unreachable.
    ServerOffline,
    /// Anything else went wrong mid-turn.
    ErrorStandBy,
    /// The transcript was unusable; ask for a repeat.
    SayAgain,
}

/// Look up a phrase for the given language code (`en`/`es`/`fr`/`de`);
/// unknown codes fall back to English.
pub fn phrase(key: PhraseKey, language: &str) -> &'static str {
    use PhraseKey::*;
    match (key, language) {
        (StandBy, "es") => "Espere.",
        (StandBy, "fr") => "Attendez.",
        (StandBy, "de") => "Bitte warten.",
        (StandBy, _) => "Stand by.",

        (ServerOffline, "es") => "Servidor fuera de línea. Espere.",
        (ServerOffline, "fr") => "Serveur hors ligne. Attendez.",
        (ServerOffline, "de") => "Server offline. Bitte warten.",
        (ServerOffline, _) => "Server offline. Stand by.",

        (ErrorStandBy, "es") => "Error. Espere.",
        (ErrorStandBy, "fr") => "Erreur. Attendez.",
        (ErrorStandBy, "de") => "Fehler. Bitte warten.",
        (ErrorStandBy, _) => "Error. Stand by.",

        (SayAgain, "es") => "Repita.",
        (SayAgain, "fr") => "Répétez.",
        (SayAgain, "de") => "Bitte wiederholen.",
        (SayAgain, _) => "Say again.",
    }
}

/// Map an in-turn failure to its recovery phrase.
pub fn for_error(error: &SkywaveError, language: &str) -> &'static str {
    let key = match error {
        SkywaveError::LlmTransport(_) => PhraseKey::ServerOffline,
        SkywaveError::LlmTimeout(_) => PhraseKey::StandBy,
        _ => PhraseKey::ErrorStandBy,
    };
    phrase(key, language)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn english_defaults() {
        assert_eq!(phrase(PhraseKey::StandBy, "en"), "Stand by.");
        assert_eq!(phrase(PhraseKey::ServerOffline, "en"), "Server offline. Stand by.");
        assert_eq!(phrase(PhraseKey::ErrorStandBy, "en"), "Error. Stand by.");
    }

    #[test]
    fn unknown_language_falls_back_to_english() {
        assert_eq!(phrase(PhraseKey::SayAgain, "pt"), "Say again.");
    }

    #[test]
    fn error_mapping() {
        assert_eq!(
            for_error(&SkywaveError::LlmTransport("refused".into()), "en"),
            "Server offline. Stand by."
        );
        assert_eq!(for_error(&SkywaveError::LlmTimeout(5000), "en"), "Stand by.");
        assert_eq!(
            for_error(&SkywaveError::LlmProtocol("bad json".into()), "en"),
            "Error. Stand by."
        );
    }
}
