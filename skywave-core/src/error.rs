use thiserror::Error;

/// All errors produced by skywave-core.
///
/// Inside a turn every variant is recovered locally and mapped to a radio
/// phrase (see [`crate::phrases`]); only `ConfigInvalid` and the audio
/// variants are fatal, and only at boot.
#[derive(Debug, Error)]
pub enum SkywaveError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("transcription error: {0}")]
    Stt(String),

    #[error("LLM transport error: {0}")]
    LlmTransport(String),

    #[error("LLM request timed out after {0} ms")]
    LlmTimeout(u64),

    #[error("LLM protocol error: {0}")]
    LlmProtocol(String),

    #[error("LLM response truncated (stop reason: {0})")]
    LlmTruncated(String),

    #[error("tool '{name}' failed: {message}")]
    Tool { name: String, message: String },

    #[error("synthesis error: {0}")]
    Tts(String),

    #[error("playback error: {0}")]
    Playback(String),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SkywaveError>;
