//! Recognition via an external `whisper-cli` process.
//!
//! The invocation contract, not the model, is what this module owns: the
//! utterance is handed over as a mono 16-bit WAV, the recognizer is asked
//! for JSON output, and the token probabilities are folded into a mean
//! confidence. Any process or parse failure surfaces as
//! `SkywaveError::Stt` and is recovered by the orchestrator.

use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;
use tracing::{debug, warn};

use super::{SpeechToText, Transcript};
use crate::audio::frame::AudioBuffer;
use crate::config::SttConfig;
use crate::error::{Result, SkywaveError};

static INVOCATION_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug)]
pub struct WhisperCli {
    config: SttConfig,
    model_path: PathBuf,
}

impl WhisperCli {
    /// # Errors
    /// `SkywaveError::ConfigInvalid` when no model path is configured.
    pub fn new(config: SttConfig) -> Result<Self> {
        let model_path = config.model_path.clone().ok_or_else(|| {
            SkywaveError::ConfigInvalid("stt.model_path required for whisper-cli".into())
        })?;
        Ok(Self { config, model_path })
    }

    fn scratch_paths(&self) -> (PathBuf, PathBuf) {
        let seq = INVOCATION_SEQ.fetch_add(1, Ordering::Relaxed);
        let stem = std::env::temp_dir().join(format!(
            "skywave_stt_{}_{seq}",
            std::process::id()
        ));
        (stem.with_extension("wav"), stem)
    }

    fn write_wav(&self, path: &std::path::Path, utterance: &AudioBuffer) -> Result<()> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: utterance.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec)
            .map_err(|e| SkywaveError::Stt(format!("wav create: {e}")))?;
        for &sample in &utterance.samples {
            writer
                .write_sample(sample)
                .map_err(|e| SkywaveError::Stt(format!("wav write: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| SkywaveError::Stt(format!("wav finalize: {e}")))?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct WhisperOutput {
    #[serde(default)]
    transcription: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    #[serde(default)]
    text: String,
    #[serde(default)]
    tokens: Vec<WhisperToken>,
}

#[derive(Debug, Deserialize)]
struct WhisperToken {
    #[serde(default)]
    p: f32,
}

impl SpeechToText for WhisperCli {
    fn transcribe(&mut self, utterance: &AudioBuffer) -> Result<Transcript> {
        let (wav_path, out_stem) = self.scratch_paths();
        self.write_wav(&wav_path, utterance)?;

        let mut command = Command::new(&self.config.whisper_cli_path);
        command
            .arg("-m")
            .arg(&self.model_path)
            .arg("-l")
            .arg(&self.config.language)
            .arg("-oj")
            .arg("-of")
            .arg(&out_stem)
            .arg("-np")
            .arg(&wav_path);
        if !self.config.use_gpu {
            command.arg("-ng");
        }

        debug!(wav = %wav_path.display(), "invoking recognizer");
        let status = command
            .status()
            .map_err(|e| SkywaveError::Stt(format!("spawn recognizer: {e}")))?;

        let json_path = out_stem.with_extension("json");
        let parsed = if status.success() {
            let raw = std::fs::read_to_string(&json_path)
                .map_err(|e| SkywaveError::Stt(format!("read recognizer output: {e}")))?;
            serde_json::from_str::<WhisperOutput>(&raw)
                .map_err(|e| SkywaveError::Stt(format!("parse recognizer output: {e}")))
        } else {
            Err(SkywaveError::Stt(format!(
                "recognizer exited with {status}"
            )))
        };

        if std::fs::remove_file(&wav_path).is_err() {
            warn!(path = %wav_path.display(), "failed to remove recognizer scratch file");
        }
        let _ = std::fs::remove_file(&json_path);

        let output = parsed?;
        let mut text = String::new();
        let mut token_count = 0usize;
        let mut p_sum = 0f64;
        for segment in &output.transcription {
            text.push_str(segment.text.trim());
            text.push(' ');
            token_count += segment.tokens.len();
            p_sum += segment.tokens.iter().map(|t| t.p as f64).sum::<f64>();
        }

        let confidence = if token_count > 0 {
            (p_sum / token_count as f64) as f32
        } else {
            0.0
        };

        Ok(Transcript::new(text.trim().to_string(), token_count, confidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_parsing_folds_token_probabilities() {
        let raw = r#"{
            "transcription": [
                {"text": " radio check ", "tokens": [{"p": 0.9}, {"p": 0.7}]},
                {"text": "over", "tokens": [{"p": 0.8}, {"p": 0.6}]}
            ]
        }"#;
        let output: WhisperOutput = serde_json::from_str(raw).unwrap();
        assert_eq!(output.transcription.len(), 2);

        let token_count: usize = output.transcription.iter().map(|s| s.tokens.len()).sum();
        let p_sum: f64 = output
            .transcription
            .iter()
            .flat_map(|s| &s.tokens)
            .map(|t| t.p as f64)
            .sum();
        assert_eq!(token_count, 4);
        assert!((p_sum / token_count as f64 - 0.75).abs() < 1e-6);
    }

    #[test]
    fn missing_fields_default_cleanly() {
        let output: WhisperOutput = serde_json::from_str("{}").unwrap();
        assert!(output.transcription.is_empty());

        let output: WhisperOutput =
            serde_json::from_str(r#"{"transcription": [{"text": "hi"}]}"#).unwrap();
        assert_eq!(output.transcription[0].text, "hi");
        assert!(output.transcription[0].tokens.is_empty());
    }

    #[test]
    fn constructor_requires_model_path() {
        let config = SttConfig::default();
        assert!(matches!(
            WhisperCli::new(config).unwrap_err(),
            SkywaveError::ConfigInvalid(_)
        ));
    }
}
