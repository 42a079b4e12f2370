//! Transmitter-side playback via cpal.
//!
//! The output callback pops mono samples from a mutex-guarded queue and
//! fans them out across the device's channels. The queue and the
//! `playback_complete` flag share one lock; the TX controller mutates the
//! queue, the callback drains it. Stream errors are folded into
//! "playback complete" so the turn machine can never deadlock on a dead
//! device.

use std::collections::VecDeque;
use std::sync::Arc;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig,
};
use parking_lot::Mutex;
use tracing::{error, info};

use crate::config::AudioConfig;
use crate::error::Result;
#[cfg(feature = "audio-cpal")]
use crate::error::SkywaveError;

/// Playback queue shared between the TX controller and the output callback.
#[derive(Debug, Default)]
pub struct PlaybackState {
    /// Mono samples at the output device rate, next-to-play at the front.
    pub queue: VecDeque<i16>,
    /// A transmission is in flight (samples queued or still draining).
    pub active: bool,
    /// Set once when an active transmission drains or errors; consumed by
    /// the orchestrator.
    pub complete: bool,
    /// Last playback error, if any; informational only.
    pub error: Option<String>,
}

pub type SharedPlayback = Arc<Mutex<PlaybackState>>;

pub fn shared_playback() -> SharedPlayback {
    Arc::new(Mutex::new(PlaybackState::default()))
}

/// Handle to an active output stream.
///
/// **Not `Send`** — create and drop on the pipeline thread, like capture.
pub struct AudioOutput {
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    /// Rate the device is actually running at (Hz).
    pub device_rate: u32,
}

impl AudioOutput {
    /// Open the configured (or default) output device attached to `shared`.
    #[cfg(feature = "audio-cpal")]
    pub fn open(audio: &AudioConfig, shared: SharedPlayback) -> Result<Self> {
        let device = super::device::select_output(audio.output_device.as_deref())?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".into());

        let supported = device
            .default_output_config()
            .map_err(|e| SkywaveError::AudioDevice(e.to_string()))?;
        let device_rate = supported.sample_rate().0;
        let channels = supported.channels();

        info!(
            device = device_name.as_str(),
            device_rate, channels, "opening output device"
        );

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(device_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let ch = channels as usize;
        let cb_shared = Arc::clone(&shared);
        let err_shared = Arc::clone(&shared);

        let stream = match supported.sample_format() {
            SampleFormat::F32 => device.build_output_stream(
                &config,
                move |data: &mut [f32], _info| {
                    let mut state = cb_shared.lock();
                    fill_f32(&mut state, data, ch);
                },
                move |err| {
                    error!("playback stream error: {err}");
                    let mut state = err_shared.lock();
                    fail_playback(&mut state, &err.to_string());
                },
                None,
            ),
            SampleFormat::I16 => device.build_output_stream(
                &config,
                move |data: &mut [i16], _info| {
                    let mut state = cb_shared.lock();
                    fill_i16(&mut state, data, ch);
                },
                move |err| {
                    error!("playback stream error: {err}");
                    let mut state = err_shared.lock();
                    fail_playback(&mut state, &err.to_string());
                },
                None,
            ),
            fmt => {
                return Err(SkywaveError::AudioStream(format!(
                    "unsupported playback sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| SkywaveError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| SkywaveError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            device_rate,
        })
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl AudioOutput {
    pub fn open(audio: &AudioConfig, _shared: SharedPlayback) -> Result<Self> {
        let _ = audio;
        Err(crate::error::SkywaveError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}

/// Drain up to `data.len() / channels` mono samples into an f32 buffer.
pub fn fill_f32(state: &mut PlaybackState, data: &mut [f32], channels: usize) {
    let frames = data.len() / channels.max(1);
    for f in 0..frames {
        let sample = match state.queue.pop_front() {
            Some(s) => s as f32 / 32768.0,
            None => 0.0,
        };
        let base = f * channels;
        for c in 0..channels {
            data[base + c] = sample;
        }
    }
    finish_if_drained(state);
}

/// Drain into an i16 buffer.
pub fn fill_i16(state: &mut PlaybackState, data: &mut [i16], channels: usize) {
    let frames = data.len() / channels.max(1);
    for f in 0..frames {
        let sample = state.queue.pop_front().unwrap_or(0);
        let base = f * channels;
        for c in 0..channels {
            data[base + c] = sample;
        }
    }
    finish_if_drained(state);
}

fn finish_if_drained(state: &mut PlaybackState) {
    if state.active && state.queue.is_empty() {
        state.active = false;
        state.complete = true;
    }
}

/// Mark the in-flight transmission finished on error, preserving the turn
/// contract (the orchestrator observes a normal completion).
pub fn fail_playback(state: &mut PlaybackState, message: &str) {
    state.queue.clear();
    state.error = Some(message.to_string());
    if state.active {
        state.active = false;
        state.complete = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_pads_silence_when_idle() {
        let mut state = PlaybackState::default();
        let mut out = [1.0f32; 8];
        fill_f32(&mut state, &mut out, 2);
        assert_eq!(out, [0.0f32; 8]);
        assert!(!state.complete);
    }

    #[test]
    fn drain_sets_complete_once_active() {
        let mut state = PlaybackState {
            queue: VecDeque::from(vec![100, 200]),
            active: true,
            ..Default::default()
        };

        let mut out = [0i16; 2];
        fill_i16(&mut state, &mut out, 1);
        assert_eq!(out, [100, 200]);
        assert!(state.complete);
        assert!(!state.active);
    }

    #[test]
    fn stereo_duplicates_mono_samples() {
        let mut state = PlaybackState {
            queue: VecDeque::from(vec![16384]),
            active: true,
            ..Default::default()
        };
        let mut out = [0.0f32; 4];
        fill_f32(&mut state, &mut out, 2);
        assert_eq!(out[0], out[1]);
        assert!(out[0] > 0.49 && out[0] < 0.51);
        // Remaining frame padded with silence.
        assert_eq!(out[2], 0.0);
    }

    #[test]
    fn error_folds_into_completion() {
        let mut state = PlaybackState {
            queue: VecDeque::from(vec![1; 100]),
            active: true,
            ..Default::default()
        };
        fail_playback(&mut state, "device unplugged");
        assert!(state.complete);
        assert!(!state.active);
        assert!(state.queue.is_empty());
        assert_eq!(state.error.as_deref(), Some("device unplugged"));
    }
}
