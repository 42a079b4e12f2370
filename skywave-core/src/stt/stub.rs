//! `StubTranscriber` — placeholder recognizer that echoes metadata.
//!
//! Selected when no model is configured, so the full turn pipeline can be
//! exercised end-to-end on a bare machine.

use tracing::debug;

use super::{SpeechToText, Transcript};
use crate::audio::frame::AudioBuffer;
use crate::error::Result;

pub struct StubTranscriber {
    utterance_count: u32,
}

impl StubTranscriber {
    pub fn new() -> Self {
        Self { utterance_count: 0 }
    }
}

impl Default for StubTranscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechToText for StubTranscriber {
    fn transcribe(&mut self, utterance: &AudioBuffer) -> Result<Transcript> {
        self.utterance_count += 1;
        debug!(
            utterance = self.utterance_count,
            samples = utterance.len(),
            "stub transcription"
        );
        Ok(Transcript::new(
            format!(
                "radio check {} of {} milliseconds",
                self.utterance_count,
                utterance.duration_ms()
            ),
            5,
            1.0,
        ))
    }
}
