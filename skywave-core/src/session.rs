//! Write-only session recorder.
//!
//! Each session gets `<log_dir>/<YYYYmmdd_HHMMSS>/` holding the continuous
//! channel audio (`raw_input.wav`, including guard-period frames), one WAV
//! per finalized utterance and transmitted response, and a
//! `session_log.json` event stream. Recording failures are logged and
//! disable the affected sink — they never cost a turn.

use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use crate::audio::frame::{AudioBuffer, AudioFrame};
use crate::error::{Result, SkywaveError};

type WavSink = hound::WavWriter<BufWriter<fs::File>>;

#[derive(Debug, Serialize)]
pub struct SessionEvent {
    pub timestamp_ms: u64,
    pub event_type: String,
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<String>,
}

#[derive(Serialize)]
struct SessionLog<'a> {
    started_at: &'a str,
    sample_rate: u32,
    events: &'a [SessionEvent],
}

pub struct SessionRecorder {
    dir: PathBuf,
    started_at: String,
    started: Instant,
    sample_rate: u32,
    raw_writer: Option<WavSink>,
    events: Vec<SessionEvent>,
    utterance_seq: u64,
    tts_seq: u64,
}

impl SessionRecorder {
    /// Create the session directory and open the raw channel sink.
    ///
    /// # Errors
    /// Only at creation: an unwritable log directory is a setup problem
    /// worth failing loudly on.
    pub fn create(log_dir: &Path, sample_rate: u32) -> Result<Self> {
        let started_at = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        let dir = log_dir.join(&started_at);
        fs::create_dir_all(&dir)
            .map_err(|e| SkywaveError::Io(std::io::Error::other(format!(
                "create session dir {}: {e}",
                dir.display()
            ))))?;

        let raw_writer = hound::WavWriter::create(dir.join("raw_input.wav"), wav_spec(sample_rate))
            .map_err(|e| SkywaveError::Io(std::io::Error::other(format!("raw_input.wav: {e}"))))?;

        info!(dir = %dir.display(), "session recording started");
        Ok(Self {
            dir,
            started_at,
            started: Instant::now(),
            sample_rate,
            raw_writer: Some(raw_writer),
            events: Vec::new(),
            utterance_seq: 0,
            tts_seq: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Append one captured frame to the continuous channel recording.
    pub fn append_frame(&mut self, frame: &AudioFrame) {
        let Some(writer) = self.raw_writer.as_mut() else {
            return;
        };
        for &sample in &frame.samples {
            if let Err(e) = writer.write_sample(sample) {
                warn!("raw recording failed, disabling: {e}");
                self.raw_writer = None;
                return;
            }
        }
    }

    /// Write one utterance WAV; returns its relative path.
    pub fn record_utterance(&mut self, audio: &AudioBuffer) -> Option<String> {
        self.utterance_seq += 1;
        let name = format!("utterance_{}.wav", self.utterance_seq);
        self.write_wav(&name, audio)
    }

    /// Write one transmitted-response WAV; returns its relative path.
    pub fn record_tts(&mut self, audio: &AudioBuffer) -> Option<String> {
        self.tts_seq += 1;
        let name = format!("tts_{}.wav", self.tts_seq);
        self.write_wav(&name, audio)
    }

    fn write_wav(&mut self, name: &str, audio: &AudioBuffer) -> Option<String> {
        let write = || -> std::result::Result<(), hound::Error> {
            let mut writer =
                hound::WavWriter::create(self.dir.join(name), wav_spec(audio.sample_rate))?;
            for &sample in &audio.samples {
                writer.write_sample(sample)?;
            }
            writer.finalize()
        };
        match write() {
            Ok(()) => Some(name.to_string()),
            Err(e) => {
                warn!(file = name, "audio snapshot failed: {e}");
                None
            }
        }
    }

    /// Record one timeline event, optionally pointing at an audio file.
    pub fn log_event(
        &mut self,
        event_type: &str,
        data: serde_json::Value,
        audio_path: Option<String>,
    ) {
        self.events.push(SessionEvent {
            timestamp_ms: self.elapsed_ms(),
            event_type: event_type.to_string(),
            data,
            audio_path,
        });
    }

    /// Flush the raw sink and write `session_log.json`.
    pub fn finalize(&mut self) {
        if let Some(writer) = self.raw_writer.take() {
            if let Err(e) = writer.finalize() {
                warn!("failed to finalize raw recording: {e}");
            }
        }

        let log = SessionLog {
            started_at: &self.started_at,
            sample_rate: self.sample_rate,
            events: &self.events,
        };
        match serde_json::to_string_pretty(&log) {
            Ok(json) => {
                if let Err(e) = fs::write(self.dir.join("session_log.json"), json) {
                    warn!("failed to write session log: {e}");
                }
            }
            Err(e) => warn!("failed to encode session log: {e}"),
        }
        info!(events = self.events.len(), dir = %self.dir.display(), "session finalized");
    }
}

fn wav_spec(sample_rate: u32) -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(dir: &Path) -> SessionRecorder {
        SessionRecorder::create(dir, 16_000).unwrap()
    }

    #[test]
    fn session_directory_and_raw_wav_are_created() {
        let root = tempfile::tempdir().unwrap();
        let mut rec = recorder(root.path());

        rec.append_frame(&AudioFrame::new(vec![100; 320]));
        rec.append_frame(&AudioFrame::new(vec![-100; 320]));
        rec.finalize();

        let raw = rec.dir().join("raw_input.wav");
        let reader = hound::WavReader::open(&raw).unwrap();
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.spec().bits_per_sample, 16);
        assert_eq!(reader.len(), 640);
    }

    #[test]
    fn utterance_and_tts_files_are_numbered() {
        let root = tempfile::tempdir().unwrap();
        let mut rec = recorder(root.path());
        let audio = AudioBuffer::from_samples(vec![5; 160], 16_000);

        assert_eq!(rec.record_utterance(&audio).as_deref(), Some("utterance_1.wav"));
        assert_eq!(rec.record_utterance(&audio).as_deref(), Some("utterance_2.wav"));
        assert_eq!(rec.record_tts(&audio).as_deref(), Some("tts_1.wav"));
        assert!(rec.dir().join("utterance_2.wav").exists());
        assert!(rec.dir().join("tts_1.wav").exists());
    }

    #[test]
    fn event_log_is_ordered_and_parseable() {
        let root = tempfile::tempdir().unwrap();
        let mut rec = recorder(root.path());

        rec.log_event("speech_start", serde_json::json!({}), None);
        rec.log_event(
            "transcript",
            serde_json::json!({"text": "radio check", "confidence": 0.92}),
            Some("utterance_1.wav".into()),
        );
        rec.log_event("playback_complete", serde_json::json!({}), None);
        rec.finalize();

        let raw = fs::read_to_string(rec.dir().join("session_log.json")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let events = parsed["events"].as_array().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0]["event_type"], "speech_start");
        assert_eq!(events[1]["audio_path"], "utterance_1.wav");
        assert!(events[0].get("audio_path").is_none());

        // Timestamps are monotone relative to session start.
        let stamps: Vec<u64> = events
            .iter()
            .map(|e| e["timestamp_ms"].as_u64().unwrap())
            .collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
    }
}
