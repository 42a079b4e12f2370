//! Text-to-speech engine.
//!
//! Synthesis goes through the persistent piper worker when it is up, the
//! one-shot subprocess when it is not, and an LRU phrase cache in front of
//! both so canned phrases ("Stand by.", "Say again.") cost nothing after
//! the first use. Output is resampled to the system rate and gain-adjusted.
//!
//! A missing synthesizer or voice yields an **empty buffer**; callers treat
//! empty as "nothing to transmit" and suppress the turn rather than erroring.

pub mod piper;
pub mod tone;

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::audio::frame::AudioBuffer;
use crate::audio::resample::convert_buffer_i16;
use crate::config::TtsConfig;
use piper::PiperWorker;

/// Phrases longer than this are not cached.
const MAX_CACHE_KEY_CHARS: usize = 50;

/// VOX pre-roll frequency. 440 Hz opens squelch reliably without being
/// mistaken for a courtesy tone.
const PREROLL_FREQ_HZ: f32 = 440.0;

/// Seam between the pipeline and the concrete engine.
pub trait Synthesizer: Send + 'static {
    /// Synthesize a phrase at the system rate. Empty on failure.
    fn synth(&mut self, text: &str) -> AudioBuffer;

    /// Pre-roll tone concatenated with the synthesized phrase.
    fn synth_vox(&mut self, text: &str) -> AudioBuffer;

    fn preroll_buffer(&self) -> AudioBuffer;

    fn end_tone_buffer(&self) -> AudioBuffer;

    /// Warm the cache so the phrase's first real use is instant.
    fn preload_phrase(&mut self, text: &str);

    /// Stop any persistent worker. Default: nothing to stop.
    fn shutdown_worker(&mut self) {}
}

/// LRU phrase → audio map with a bounded key length.
pub struct PhraseCache {
    inner: LruCache<String, AudioBuffer>,
}

impl PhraseCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: LruCache::new(
                NonZeroUsize::new(capacity.max(1)).expect("capacity clamped to >= 1"),
            ),
        }
    }

    pub fn get(&mut self, text: &str) -> Option<AudioBuffer> {
        self.inner.get(text).cloned()
    }

    pub fn put(&mut self, text: &str, audio: AudioBuffer) {
        if text.chars().count() > MAX_CACHE_KEY_CHARS || audio.is_empty() {
            return;
        }
        self.inner.put(text.to_string(), audio);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Least-recently-used key, for tests and diagnostics.
    pub fn oldest_key(&self) -> Option<&String> {
        self.inner.iter().last().map(|(k, _)| k)
    }
}

pub struct TtsEngine {
    config: TtsConfig,
    system_rate: u32,
    worker: Mutex<Option<PiperWorker>>,
    cache: Mutex<PhraseCache>,
    preroll: AudioBuffer,
    end_tone: AudioBuffer,
}

impl TtsEngine {
    /// Build the engine and launch the persistent worker. A worker that
    /// fails to start is logged and left to the one-shot fallback.
    pub fn new(mut config: TtsConfig, system_rate: u32) -> Self {
        // Relative voice paths resolve against the voice models directory.
        if let Some(dir) = &config.voice_models_dir {
            if config.voice_path.is_relative() {
                config.voice_path = dir.join(&config.voice_path);
            }
        }

        let worker = match PiperWorker::spawn(&config) {
            Ok(w) => Some(w),
            Err(e) => {
                warn!(error = %e, "persistent synthesizer unavailable; using per-call fallback");
                None
            }
        };

        let preroll = tone::sine_burst(
            PREROLL_FREQ_HZ,
            config.vox_preroll_ms,
            config.vox_preroll_amplitude,
            system_rate,
        );
        let end_tone = tone::sine_burst(
            config.vox_end_tone_freq_hz,
            config.vox_end_tone_ms,
            config.vox_end_tone_amplitude,
            system_rate,
        );

        Self {
            cache: Mutex::new(PhraseCache::new(config.cache_capacity)),
            worker: Mutex::new(worker),
            preroll,
            end_tone,
            system_rate,
            config,
        }
    }

    /// Stop the worker process cleanly.
    pub fn shutdown(&self) {
        if let Some(worker) = self.worker.lock().take() {
            worker.shutdown();
        }
    }

    fn synthesize_raw(&self, text: &str) -> Option<Vec<i16>> {
        let mut guard = self.worker.lock();
        if let Some(worker) = guard.as_mut() {
            if worker.is_alive() {
                match worker.synthesize(text) {
                    Ok(samples) => return Some(samples),
                    Err(e) => {
                        warn!(error = %e, "persistent synthesizer failed; dropping worker");
                        if let Some(dead) = guard.take() {
                            dead.shutdown();
                        }
                    }
                }
            } else {
                warn!("persistent synthesizer exited; dropping worker");
                if let Some(dead) = guard.take() {
                    dead.shutdown();
                }
            }
        }
        drop(guard);

        match piper::synth_oneshot(&self.config, text) {
            Ok(samples) => Some(samples),
            Err(e) => {
                warn!(error = %e, "one-shot synthesis failed");
                None
            }
        }
    }

    fn postprocess(&self, samples: Vec<i16>) -> AudioBuffer {
        let at_system_rate =
            convert_buffer_i16(&samples, self.config.voice_sample_rate, self.system_rate);
        let gained = apply_gain(&at_system_rate, self.config.output_gain);
        AudioBuffer::from_samples(gained, self.system_rate)
    }
}

impl Synthesizer for TtsEngine {
    fn synth(&mut self, text: &str) -> AudioBuffer {
        let text = text.trim();
        if text.is_empty() {
            return AudioBuffer::new(self.system_rate);
        }

        if let Some(hit) = self.cache.lock().get(text) {
            debug!(chars = text.len(), "phrase cache hit");
            return hit;
        }

        let Some(samples) = self.synthesize_raw(text) else {
            return AudioBuffer::new(self.system_rate);
        };
        let audio = self.postprocess(samples);
        self.cache.lock().put(text, audio.clone());
        audio
    }

    fn synth_vox(&mut self, text: &str) -> AudioBuffer {
        let speech = self.synth(text);
        if speech.is_empty() {
            return speech;
        }
        let mut out = self.preroll.clone();
        out.extend(&speech);
        out
    }

    fn preroll_buffer(&self) -> AudioBuffer {
        self.preroll.clone()
    }

    fn end_tone_buffer(&self) -> AudioBuffer {
        self.end_tone.clone()
    }

    fn preload_phrase(&mut self, text: &str) {
        let _ = self.synth(text);
    }

    fn shutdown_worker(&mut self) {
        self.shutdown();
    }
}

fn apply_gain(samples: &[i16], gain: f32) -> Vec<i16> {
    if (gain - 1.0).abs() < f32::EPSILON {
        return samples.to_vec();
    }
    samples
        .iter()
        .map(|&s| ((s as f32 * gain).clamp(-32768.0, 32767.0)) as i16)
        .collect()
}
