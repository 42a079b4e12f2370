//! Energy-based endpointer with hysteresis, debounce and hangover.
//!
//! ## Algorithm
//!
//! 1. Compute RMS of the incoming frame.
//! 2. `Silence`: RMS above the effective start threshold for
//!    `start_frames_required` consecutive frames emits `SpeechStart`; the
//!    pre-speech ring is prepended so the first phoneme is not clipped.
//! 3. `Speech`: frames above the end threshold (start × 0.5) extend the
//!    segment; silence inside `pause_tolerance_ms` is still appended;
//!    cumulative silence ≥ `end_of_utterance_silence_ms` emits `SpeechEnd`.
//! 4. `Hangover`: renewed energy re-enters `Speech` (no event); after
//!    `hangover_ms` the detector returns to `Silence`.
//!
//! When adaptive thresholding is on, the noise floor follows quiet frames
//! with an exponential moving average and raises the effective start
//! threshold on noisy channels.

use std::collections::VecDeque;

use tracing::trace;

use super::{Endpointer, VadEvent};
use crate::audio::frame::{AudioBuffer, AudioFrame};
use crate::config::VadConfig;

/// Hysteresis ratio between start and end thresholds.
const END_THRESHOLD_RATIO: f32 = 0.5;
/// Noise floor EMA coefficient.
const FLOOR_ALPHA: f32 = 0.01;
/// Noise floor clamp range.
const MIN_FLOOR: f32 = 0.000_5;
const MAX_FLOOR: f32 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Silence,
    Speech,
    Hangover,
}

pub struct EnergyEndpointer {
    config: VadConfig,
    sample_rate: u32,
    state: State,
    /// Consecutive above-threshold frames seen while in `Silence`.
    start_streak: u32,
    /// Cumulative silence inside the current speech region (ms).
    silence_ms: u64,
    /// Time spent in `Hangover` (ms).
    hangover_elapsed_ms: u64,
    /// Adaptive noise floor estimate, RMS in [0.0, 1.0].
    noise_floor: f32,
    /// Recent frames kept while not in speech, prepended on SpeechStart.
    preroll: VecDeque<AudioFrame>,
    preroll_ms: u64,
    segment: AudioBuffer,
}

impl EnergyEndpointer {
    pub fn new(config: VadConfig, sample_rate: u32) -> Self {
        let initial_floor =
            (config.threshold / config.floor_multiplier.max(1.0)).clamp(MIN_FLOOR, MAX_FLOOR);
        Self {
            sample_rate,
            state: State::Silence,
            start_streak: 0,
            silence_ms: 0,
            hangover_elapsed_ms: 0,
            noise_floor: initial_floor,
            preroll: VecDeque::new(),
            preroll_ms: 0,
            segment: AudioBuffer::new(sample_rate),
            config,
        }
    }

    /// Start threshold after noise-floor adaptation.
    pub fn effective_start_threshold(&self) -> f32 {
        if self.config.adaptive_threshold {
            self.config
                .threshold
                .max(self.noise_floor * self.config.floor_multiplier)
        } else {
            self.config.threshold
        }
    }

    fn end_threshold(&self) -> f32 {
        self.effective_start_threshold() * END_THRESHOLD_RATIO
    }

    fn frame_ms(&self, frame: &AudioFrame) -> u64 {
        (frame.len() as u64 * 1000) / self.sample_rate.max(1) as u64
    }

    fn push_preroll(&mut self, frame: &AudioFrame) {
        let frame_ms = self.frame_ms(frame);
        self.preroll.push_back(frame.clone());
        self.preroll_ms += frame_ms;
        while self.preroll_ms > self.config.preroll_ms {
            match self.preroll.pop_front() {
                Some(dropped) => {
                    self.preroll_ms -= (dropped.len() as u64 * 1000) / self.sample_rate as u64;
                }
                None => break,
            }
        }
    }

    fn begin_segment_from_preroll(&mut self) {
        self.segment = AudioBuffer::new(self.sample_rate);
        for frame in self.preroll.drain(..) {
            self.segment.samples.extend_from_slice(&frame.samples);
        }
        self.preroll_ms = 0;
    }

    fn update_noise_floor(&mut self, rms: f32) {
        if !self.config.adaptive_threshold {
            return;
        }
        // Only follow frames plausibly belonging to the floor itself.
        if rms < self.noise_floor * 2.0 {
            self.noise_floor =
                (self.noise_floor + FLOOR_ALPHA * (rms - self.noise_floor)).clamp(MIN_FLOOR, MAX_FLOOR);
        }
    }
}

impl Endpointer for EnergyEndpointer {
    fn process(&mut self, frame: &AudioFrame) -> VadEvent {
        let rms = frame.rms();
        let frame_ms = self.frame_ms(frame);

        match self.state {
            State::Silence => {
                self.push_preroll(frame);
                if rms > self.effective_start_threshold() {
                    self.start_streak += 1;
                    if self.start_streak >= self.config.start_frames_required {
                        trace!(rms, streak = self.start_streak, "speech start");
                        self.state = State::Speech;
                        self.start_streak = 0;
                        self.silence_ms = 0;
                        self.begin_segment_from_preroll();
                        return VadEvent::SpeechStart;
                    }
                } else {
                    self.start_streak = 0;
                    self.update_noise_floor(rms);
                }
                VadEvent::None
            }

            State::Speech => {
                if rms > self.end_threshold() {
                    self.segment.push_frame(frame);
                    self.silence_ms = 0;
                    return VadEvent::None;
                }

                if self.silence_ms < self.config.pause_tolerance_ms {
                    // Mid-utterance pause: keep the audio so STT hears the
                    // natural phrasing.
                    self.segment.push_frame(frame);
                }
                self.silence_ms += frame_ms;
                if self.silence_ms >= self.config.end_of_utterance_silence_ms {
                    trace!(
                        silence_ms = self.silence_ms,
                        segment_ms = self.segment.duration_ms(),
                        "speech end"
                    );
                    self.state = State::Hangover;
                    self.hangover_elapsed_ms = 0;
                    self.silence_ms = 0;
                    return VadEvent::SpeechEnd;
                }
                VadEvent::None
            }

            State::Hangover => {
                if rms > self.end_threshold() {
                    // Late tail: re-enter speech and extend whatever segment
                    // is still buffered. No event; the boundary was already
                    // reported.
                    self.state = State::Speech;
                    self.silence_ms = 0;
                    self.segment.push_frame(frame);
                    return VadEvent::None;
                }
                self.push_preroll(frame);
                self.hangover_elapsed_ms += frame_ms;
                if self.hangover_elapsed_ms >= self.config.hangover_ms {
                    self.state = State::Silence;
                    self.start_streak = 0;
                }
                VadEvent::None
            }
        }
    }

    fn current_segment(&self) -> &AudioBuffer {
        &self.segment
    }

    fn finalize_segment(&mut self) -> AudioBuffer {
        self.segment.take()
    }

    fn reset(&mut self) {
        self.state = State::Silence;
        self.start_streak = 0;
        self.silence_ms = 0;
        self.hangover_elapsed_ms = 0;
        self.preroll.clear();
        self.preroll_ms = 0;
        self.segment = AudioBuffer::new(self.sample_rate);
    }

    fn is_in_speech(&self) -> bool {
        self.state == State::Speech
    }
}
