//! VOX tone generation.
//!
//! Receiving radios open their squelch on energy, not on words; a short
//! sine burst before the first syllable keeps it from being clipped. Tones
//! get a 5 ms linear fade at both edges so they do not click.

use crate::audio::frame::AudioBuffer;

/// Edge fade applied to both ends of a burst (ms).
const FADE_MS: u64 = 5;

/// Generate a sine burst at `freq_hz` for `duration_ms`, `amplitude` in
/// [0.0, 1.0].
pub fn sine_burst(freq_hz: f32, duration_ms: u64, amplitude: f32, sample_rate: u32) -> AudioBuffer {
    let total = (sample_rate as u64 * duration_ms / 1000) as usize;
    let fade = ((sample_rate as u64 * FADE_MS / 1000) as usize).min(total / 2);
    let amplitude = amplitude.clamp(0.0, 1.0);

    let samples: Vec<i16> = (0..total)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            let mut value = (2.0 * std::f32::consts::PI * freq_hz * t).sin() * amplitude;
            if fade > 0 {
                if i < fade {
                    value *= i as f32 / fade as f32;
                } else if i >= total - fade {
                    value *= (total - i) as f32 / fade as f32;
                }
            }
            (value * 32767.0) as i16
        })
        .collect();

    AudioBuffer::from_samples(samples, sample_rate)
}
