//! Agent configuration.
//!
//! ## Directory convention
//!
//! A config *directory* is layered, lowest precedence first:
//!
//! ```text
//! defaults.json            baseline for every station
//! <identity>.json          selected by active.json: {"active": "fieldday.json"}
//! local.json               machine-specific overlay (devices, paths)
//! ```
//!
//! plus two sidecar libraries:
//!
//! ```text
//! personas.json            persona name → { system_prompt, ack_phrase }
//! language_voices.json     "es" | "fr" | "de" → voice model path
//! ```
//!
//! A config *file* path loads that single file over built-in defaults.
//! All sections use `#[serde(default)]` so sparse overlays stay small.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, SkywaveError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub audio: AudioConfig,
    pub vad: VadConfig,
    pub stt: SttConfig,
    pub transcript_gate: GateConfig,
    pub transcript_blank_behavior: BlankBehaviorConfig,
    pub clarifier: ClarifierConfig,
    pub router: RouterConfig,
    pub llm: LlmConfig,
    pub tts: TtsConfig,
    pub tx: TxConfig,
    pub wake_word: WakeWordConfig,
    pub memory: MemoryConfig,
    pub tools: ToolsConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Input device name (None = system default).
    pub input_device: Option<String>,
    /// Output device name (None = system default).
    pub output_device: Option<String>,
    /// System rate everything downstream of capture runs at (Hz).
    pub sample_rate: u32,
    /// Capture rate requested from the device; None = device default,
    /// resampled to `sample_rate` on the capture path.
    pub input_sample_rate: Option<u32>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            sample_rate: 16_000,
            input_sample_rate: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// RMS start threshold, normalized to [0.0, 1.0].
    pub threshold: f32,
    /// Consecutive above-threshold frames required to emit SpeechStart.
    pub start_frames_required: u32,
    /// Cumulative in-speech silence that ends the utterance (ms).
    pub end_of_utterance_silence_ms: u64,
    /// Segments shorter than this are discarded by the orchestrator (ms).
    pub min_speech_ms: u64,
    /// How long Hangover can re-enter Speech after SpeechEnd (ms).
    pub hangover_ms: u64,
    /// Silence inside an utterance still appended to the segment (ms).
    pub pause_tolerance_ms: u64,
    /// Pre-speech ring prepended on SpeechStart (ms).
    pub preroll_ms: u64,
    /// Track the noise floor and raise the effective start threshold.
    pub adaptive_threshold: bool,
    /// Effective start threshold = max(threshold, floor × multiplier).
    pub floor_multiplier: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.012,
            start_frames_required: 2,
            end_of_utterance_silence_ms: 900,
            min_speech_ms: 300,
            hangover_ms: 250,
            pause_tolerance_ms: 400,
            preroll_ms: 200,
            adaptive_threshold: true,
            floor_multiplier: 2.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// Path to the acoustic model. None selects the stub transcriber.
    pub model_path: Option<PathBuf>,
    /// External recognizer binary invoked per utterance.
    pub whisper_cli_path: PathBuf,
    pub language: String,
    /// Transcript value meaning "no meaningful speech".
    pub blank_sentinel: String,
    pub use_gpu: bool,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            whisper_cli_path: PathBuf::from("whisper-cli"),
            language: "en".into(),
            blank_sentinel: "[BLANK_AUDIO]".into(),
            use_gpu: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub min_chars: usize,
    pub min_tokens: usize,
    pub min_confidence: f32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_chars: 2,
            min_tokens: 1,
            min_confidence: 0.35,
        }
    }
}

/// What to do when the transcript gate rejects a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlankBehavior {
    /// Re-listen silently.
    None,
    /// Speak `say_again_phrase`.
    SayAgain,
    /// Transmit the pre-roll tone only.
    Beep,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlankBehaviorConfig {
    pub behavior: BlankBehavior,
    pub say_again_phrase: String,
}

impl Default for BlankBehaviorConfig {
    fn default() -> Self {
        Self {
            behavior: BlankBehavior::None,
            say_again_phrase: "Say again".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClarifierConfig {
    pub enabled: bool,
    /// Transcripts shorter than this skip the clarifier.
    pub min_chars: usize,
    /// Transcripts below this confidence skip the clarifier.
    pub min_confidence: f32,
    /// Clarifier output equal to this skips the main LLM entirely.
    pub unknown_sentinel: String,
}

impl Default for ClarifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_chars: 8,
            min_confidence: 0.45,
            unknown_sentinel: "UNKNOWN".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Below this confidence the router answers with `repair_phrase`.
    pub repair_confidence_threshold: f32,
    pub repair_phrase: String,
    /// Acknowledgement spoken before LLM turns; None disables the ack.
    pub ack_phrase: Option<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            repair_confidence_threshold: 0.25,
            repair_phrase: "Say again".into(),
            ack_phrase: Some("Stand by".into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Chat endpoint (Ollama-style `/api/chat`).
    pub endpoint: String,
    /// Legacy completion endpoint, tried when chat fails at protocol level.
    pub legacy_endpoint: Option<String>,
    pub timeout_ms: u64,
    pub max_tokens: u32,
    /// Only the last N user/assistant turns are sent.
    pub context_max_turns_to_send: usize,
    pub model_name: String,
    /// Model used when the translator persona is active.
    pub translation_model: Option<String>,
    /// Issue a throwaway translation request at startup to page the model in.
    pub warmup_translation_model: bool,
    pub temperature: f32,
    pub system_prompt: String,
    /// Persona name resolved against personas.json.
    pub agent_persona: Option<String>,
    /// "en" answers directly; "es"/"fr"/"de" activate the translator persona.
    pub response_language: String,
    pub stop_sequences: Vec<String>,
    pub truncation: TruncationConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:11434/api/chat".into(),
            legacy_endpoint: None,
            timeout_ms: 30_000,
            max_tokens: 220,
            context_max_turns_to_send: 6,
            model_name: "llama3.1".into(),
            translation_model: None,
            warmup_translation_model: false,
            temperature: 0.7,
            system_prompt: "You are a concise radio operator assistant. \
                            Answer in at most two short sentences. \
                            End every transmission with \"over\"."
                .into(),
            agent_persona: None,
            response_language: "en".into(),
            stop_sequences: Vec::new(),
            truncation: TruncationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TruncationConfig {
    /// Spoken instead of a length-truncated answer.
    pub fallback_phrase: String,
}

impl Default for TruncationConfig {
    fn default() -> Self {
        Self {
            fallback_phrase: "Long message lost. Say again".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub voice_path: PathBuf,
    pub voice_models_dir: Option<PathBuf>,
    pub piper_path: PathBuf,
    pub espeak_data_path: Option<PathBuf>,
    /// Native rate of the voice model (Hz); synthesis output is resampled
    /// from this to the system rate.
    pub voice_sample_rate: u32,
    pub vox_preroll_ms: u64,
    pub vox_preroll_amplitude: f32,
    pub vox_end_tone_ms: u64,
    pub vox_end_tone_amplitude: f32,
    pub vox_end_tone_freq_hz: f32,
    pub output_gain: f32,
    /// Phrase cache entries (keys capped at 50 chars).
    pub cache_capacity: usize,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            voice_path: PathBuf::from("voices/en_US-lessac-medium.onnx"),
            voice_models_dir: None,
            piper_path: PathBuf::from("piper"),
            espeak_data_path: None,
            voice_sample_rate: 22_050,
            vox_preroll_ms: 150,
            vox_preroll_amplitude: 0.30,
            vox_end_tone_ms: 120,
            vox_end_tone_amplitude: 0.22,
            vox_end_tone_freq_hz: 880.0,
            output_gain: 1.0,
            cache_capacity: 48,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TxConfig {
    /// Hard cap on one transmission (ms); 0 disables truncation.
    pub max_transmit_ms: u64,
    /// Settle delay after playback drains, before re-listening (ms).
    pub standby_delay_ms: u64,
    /// Channel silence required before releasing a pending response (ms).
    pub channel_clear_silence_ms: u64,
    pub enable_start_chirp: bool,
    pub enable_end_chirp: bool,
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            max_transmit_ms: 30_000,
            standby_delay_ms: 250,
            channel_clear_silence_ms: 700,
            enable_start_chirp: true,
            enable_end_chirp: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WakeWordConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub enabled: bool,
    pub max_messages: usize,
    pub max_tokens: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_messages: 24,
            max_tokens: 2_048,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Names of registered tools advertised to the LLM.
    pub enabled: Vec<String>,
    pub timeout_ms: u64,
    pub max_concurrent: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: Vec::new(),
            timeout_ms: 8_000,
            max_concurrent: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub enabled: bool,
    pub log_dir: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_dir: PathBuf::from("sessions"),
        }
    }
}

/// One entry of personas.json.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Persona {
    pub system_prompt: String,
    pub ack_phrase: Option<String>,
}

impl AgentConfig {
    /// Load from a config file or layered directory.
    ///
    /// # Errors
    /// `SkywaveError::ConfigInvalid` on unreadable files, malformed JSON or
    /// out-of-range values. Invalid config is fatal at boot.
    pub fn load(path: &Path) -> Result<Self> {
        let merged = if path.is_dir() {
            load_directory(path)?
        } else {
            read_json(path)?
        };

        let mut config: AgentConfig = serde_json::from_value(merged)
            .map_err(|e| SkywaveError::ConfigInvalid(format!("{}: {e}", path.display())))?;

        if path.is_dir() {
            config.apply_sidecars(path)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Resolve the persona library and language voice map against this
    /// config. Missing sidecar files are fine; a *named* persona that does
    /// not exist is a config error.
    fn apply_sidecars(&mut self, dir: &Path) -> Result<()> {
        if let Some(name) = self.llm.agent_persona.clone() {
            let personas_path = dir.join("personas.json");
            let personas: HashMap<String, Persona> = match read_json_opt(&personas_path)? {
                Some(v) => serde_json::from_value(v).map_err(|e| {
                    SkywaveError::ConfigInvalid(format!("personas.json: {e}"))
                })?,
                None => {
                    return Err(SkywaveError::ConfigInvalid(format!(
                        "persona '{name}' requested but {} is missing",
                        personas_path.display()
                    )))
                }
            };
            let persona = personas.get(&name).ok_or_else(|| {
                SkywaveError::ConfigInvalid(format!("unknown persona '{name}'"))
            })?;
            info!(persona = name.as_str(), "applying persona");
            self.llm.system_prompt = persona.system_prompt.clone();
            if persona.ack_phrase.is_some() {
                self.router.ack_phrase = persona.ack_phrase.clone();
            }
        }

        if self.llm.response_language != "en" {
            let voices_path = dir.join("language_voices.json");
            match read_json_opt(&voices_path)? {
                Some(v) => {
                    let voices: HashMap<String, PathBuf> = serde_json::from_value(v)
                        .map_err(|e| {
                            SkywaveError::ConfigInvalid(format!("language_voices.json: {e}"))
                        })?;
                    match voices.get(&self.llm.response_language) {
                        Some(voice) => {
                            info!(
                                language = self.llm.response_language.as_str(),
                                voice = %voice.display(),
                                "selected language voice"
                            );
                            self.tts.voice_path = voice.clone();
                        }
                        None => warn!(
                            language = self.llm.response_language.as_str(),
                            "no voice mapped for response language; keeping configured voice"
                        ),
                    }
                }
                None => warn!(
                    language = self.llm.response_language.as_str(),
                    "language_voices.json missing; keeping configured voice"
                ),
            }
        }

        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            return Err(SkywaveError::ConfigInvalid("audio.sample_rate must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.vad.threshold) {
            return Err(SkywaveError::ConfigInvalid(
                "vad.threshold must be in [0.0, 1.0]".into(),
            ));
        }
        if self.vad.start_frames_required == 0 {
            return Err(SkywaveError::ConfigInvalid(
                "vad.start_frames_required must be >= 1".into(),
            ));
        }
        if self.llm.endpoint.trim().is_empty() {
            return Err(SkywaveError::ConfigInvalid("llm.endpoint must not be empty".into()));
        }
        if self.tools.max_concurrent == 0 {
            return Err(SkywaveError::ConfigInvalid(
                "tools.max_concurrent must be >= 1".into(),
            ));
        }
        match self.llm.response_language.as_str() {
            "en" | "es" | "fr" | "de" => {}
            other => {
                return Err(SkywaveError::ConfigInvalid(format!(
                    "llm.response_language '{other}' not supported (en/es/fr/de)"
                )))
            }
        }
        Ok(())
    }
}

/// Layer defaults.json ← active identity ← local.json.
fn load_directory(dir: &Path) -> Result<serde_json::Value> {
    let mut merged = read_json_opt(&dir.join("defaults.json"))?
        .unwrap_or_else(|| serde_json::Value::Object(Default::default()));

    #[derive(Deserialize)]
    struct Active {
        active: String,
    }

    if let Some(active_raw) = read_json_opt(&dir.join("active.json"))? {
        let active: Active = serde_json::from_value(active_raw)
            .map_err(|e| SkywaveError::ConfigInvalid(format!("active.json: {e}")))?;
        let identity_path = dir.join(&active.active);
        let identity = read_json(&identity_path)?;
        info!(identity = active.active.as_str(), "applying identity overlay");
        merge_json(&mut merged, identity);
    }

    if let Some(local) = read_json_opt(&dir.join("local.json"))? {
        merge_json(&mut merged, local);
    }

    Ok(merged)
}

fn read_json(path: &Path) -> Result<serde_json::Value> {
    let raw = fs::read_to_string(path)
        .map_err(|e| SkywaveError::ConfigInvalid(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&raw)
        .map_err(|e| SkywaveError::ConfigInvalid(format!("{}: {e}", path.display())))
}

fn read_json_opt(path: &Path) -> Result<Option<serde_json::Value>> {
    if !path.exists() {
        return Ok(None);
    }
    read_json(path).map(Some)
}

/// Recursive object merge; non-objects replace.
fn merge_json(base: &mut serde_json::Value, overlay: serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base_slot, overlay_value) => *base_slot = overlay_value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn defaults_are_valid() {
        AgentConfig::default().validate().expect("defaults must validate");
    }

    #[test]
    fn single_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"vad": {"threshold": 0.05}, "wake_word": {"enabled": true}}"#)
            .unwrap();

        let config = AgentConfig::load(&path).unwrap();
        assert_eq!(config.vad.threshold, 0.05);
        assert!(config.wake_word.enabled);
        // Untouched sections keep their defaults.
        assert_eq!(config.audio.sample_rate, 16_000);
    }

    #[test]
    fn directory_layers_identity_over_defaults_and_local_over_identity() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "defaults.json", r#"{"llm": {"model_name": "base", "timeout_ms": 1000}}"#);
        write(dir.path(), "active.json", r#"{"active": "fieldday.json"}"#);
        write(dir.path(), "fieldday.json", r#"{"llm": {"model_name": "fieldday"}}"#);
        write(dir.path(), "local.json", r#"{"llm": {"timeout_ms": 5000}}"#);

        let config = AgentConfig::load(dir.path()).unwrap();
        assert_eq!(config.llm.model_name, "fieldday");
        assert_eq!(config.llm.timeout_ms, 5000);
    }

    #[test]
    fn persona_overrides_system_prompt_and_ack() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "defaults.json", r#"{"llm": {"agent_persona": "ranger"}}"#);
        write(
            dir.path(),
            "personas.json",
            r#"{"ranger": {"system_prompt": "You are Ranger Base.", "ack_phrase": "Copy"}}"#,
        );

        let config = AgentConfig::load(dir.path()).unwrap();
        assert_eq!(config.llm.system_prompt, "You are Ranger Base.");
        assert_eq!(config.router.ack_phrase.as_deref(), Some("Copy"));
    }

    #[test]
    fn unknown_persona_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "defaults.json", r#"{"llm": {"agent_persona": "ghost"}}"#);
        write(dir.path(), "personas.json", r#"{"ranger": {"system_prompt": "x"}}"#);

        let err = AgentConfig::load(dir.path()).unwrap_err();
        assert!(matches!(err, SkywaveError::ConfigInvalid(_)));
    }

    #[test]
    fn language_voice_is_selected_for_non_english() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "defaults.json", r#"{"llm": {"response_language": "es"}}"#);
        write(
            dir.path(),
            "language_voices.json",
            r#"{"es": "voices/es_ES-davefx-medium.onnx"}"#,
        );

        let config = AgentConfig::load(dir.path()).unwrap();
        assert_eq!(
            config.tts.voice_path,
            PathBuf::from("voices/es_ES-davefx-medium.onnx")
        );
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"vad": {"threshold": 3.0}}"#).unwrap();
        assert!(matches!(
            AgentConfig::load(&path).unwrap_err(),
            SkywaveError::ConfigInvalid(_)
        ));

        fs::write(&path, r#"{"llm": {"response_language": "jp"}}"#).unwrap();
        assert!(matches!(
            AgentConfig::load(&path).unwrap_err(),
            SkywaveError::ConfigInvalid(_)
        ));
    }

    #[test]
    fn merge_json_replaces_scalars_and_merges_objects() {
        let mut base = serde_json::json!({"a": {"b": 1, "c": 2}, "d": [1, 2]});
        merge_json(
            &mut base,
            serde_json::json!({"a": {"b": 9}, "d": [3]}),
        );
        assert_eq!(base, serde_json::json!({"a": {"b": 9, "c": 2}, "d": [3]}));
    }
}
