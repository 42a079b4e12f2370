//! Speech-to-text contract and the transcript quality gate.
//!
//! The acoustic model itself lives outside this crate; implementations of
//! [`SpeechToText`] wrap whatever recognizer the station runs
//! ([`whisper::WhisperCli`] in production, [`stub::StubTranscriber`] in
//! tests and model-less setups).

pub mod stub;
pub mod whisper;

use crate::audio::frame::AudioBuffer;
use crate::config::GateConfig;
use crate::error::Result;

/// One recognized utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub text: String,
    pub token_count: usize,
    /// Mean recognizer confidence in [0.0, 1.0].
    pub confidence: f32,
}

impl Transcript {
    pub fn new(text: impl Into<String>, token_count: usize, confidence: f32) -> Self {
        Self {
            text: text.into(),
            token_count,
            confidence,
        }
    }
}

/// Callable that turns an utterance buffer into a transcript.
pub trait SpeechToText: Send + 'static {
    fn transcribe(&mut self, utterance: &AudioBuffer) -> Result<Transcript>;
}

/// Why the gate rejected a transcript, for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateRejection {
    TooShort,
    TooFewTokens,
    LowConfidence,
    BlankSentinel,
}

/// Low-signal filter between STT and the router. `Ok` passes; `Err` names
/// the first failing criterion.
pub fn gate_transcript(
    transcript: &Transcript,
    gate: &GateConfig,
    blank_sentinel: &str,
) -> std::result::Result<(), GateRejection> {
    let trimmed = transcript.text.trim();
    if trimmed == blank_sentinel {
        return Err(GateRejection::BlankSentinel);
    }
    if trimmed.chars().count() < gate.min_chars {
        return Err(GateRejection::TooShort);
    }
    if transcript.token_count < gate.min_tokens {
        return Err(GateRejection::TooFewTokens);
    }
    if transcript.confidence < gate.min_confidence {
        return Err(GateRejection::LowConfidence);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> GateConfig {
        GateConfig {
            min_chars: 3,
            min_tokens: 2,
            min_confidence: 0.5,
        }
    }

    #[test]
    fn good_transcript_passes() {
        let t = Transcript::new("what time is it", 4, 0.9);
        assert!(gate_transcript(&t, &gate(), "[BLANK_AUDIO]").is_ok());
    }

    #[test]
    fn short_text_is_rejected() {
        let t = Transcript::new("uh", 1, 0.9);
        assert_eq!(
            gate_transcript(&t, &gate(), "[BLANK_AUDIO]"),
            Err(GateRejection::TooShort)
        );
    }

    #[test]
    fn low_confidence_is_rejected() {
        let t = Transcript::new("what time is it", 4, 0.2);
        assert_eq!(
            gate_transcript(&t, &gate(), "[BLANK_AUDIO]"),
            Err(GateRejection::LowConfidence)
        );
    }

    #[test]
    fn blank_sentinel_is_rejected_before_length() {
        let t = Transcript::new("[BLANK_AUDIO]", 5, 0.99);
        assert_eq!(
            gate_transcript(&t, &gate(), "[BLANK_AUDIO]"),
            Err(GateRejection::BlankSentinel)
        );
    }

    #[test]
    fn whitespace_is_trimmed_before_checks() {
        let t = Transcript::new("  ok  ", 2, 0.9);
        assert_eq!(
            gate_transcript(&t, &gate(), "[BLANK_AUDIO]"),
            Err(GateRejection::TooShort)
        );
    }
}
