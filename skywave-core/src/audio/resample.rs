//! Sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! Capture arrives at the device rate, the pipeline runs at the system rate
//! (typically 16 kHz), synth voices run at their own native rate, and the
//! output device has a fourth opinion. `RateConverter` bridges any fixed
//! pair of rates on a non-RT thread. Linear interpolation keeps the latency
//! and CPU cost negligible for speech-band audio.
//!
//! When the rates match, `RateConverter` is a passthrough and no rubato
//! session is created at all.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::error::{Result, SkywaveError};

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when the rates match (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Accumulation buffer — holds partial input chunks between calls.
    input_buf: Vec<f32>,
    /// How many input samples rubato expects per process call.
    chunk_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// # Errors
    /// `SkywaveError::AudioStream` if rubato fails to initialise.
    pub fn new(from_rate: u32, to_rate: u32, chunk_size: usize) -> Result<Self> {
        if from_rate == to_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }

        let ratio = to_rate as f64 / from_rate as f64;
        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio
            PolynomialDegree::Linear,
            chunk_size,
            1, // mono
        )
        .map_err(|e| SkywaveError::AudioStream(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let output_buf = vec![vec![0f32; max_out]; 1];

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            chunk_size,
            output_buf,
        })
    }

    /// Process incoming samples, returning converted output (may be empty
    /// while a partial chunk accumulates). Passthrough mode copies input.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);

        let mut result = Vec::new();
        while self.input_buf.len() >= self.chunk_size {
            let input_slice = &self.input_buf[..self.chunk_size];
            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => {
                    error!("resampler process error: {e}");
                }
            }
            self.input_buf.drain(..self.chunk_size);
        }
        result
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

/// One-shot conversion of a complete i16 buffer between rates.
///
/// Pads the tail so rubato flushes every input sample, then trims to the
/// expected output length. Used for synthesized audio and TX hand-off,
/// where the whole buffer is in hand.
pub fn convert_buffer_i16(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    const CHUNK: usize = 1024;
    let mut converter = match RateConverter::new(from_rate, to_rate, CHUNK) {
        Ok(c) => c,
        Err(e) => {
            error!("buffer conversion unavailable: {e}");
            return samples.to_vec();
        }
    };

    let as_f32: Vec<f32> = samples.iter().map(|&s| s as f32 / 32768.0).collect();
    let mut out = converter.process(&as_f32);
    // Flush the remainder with one padded chunk.
    let tail_pad = CHUNK - (as_f32.len() % CHUNK);
    if tail_pad != CHUNK {
        out.extend(converter.process(&vec![0f32; tail_pad]));
    }

    let expected = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    out.truncate(expected);

    out.iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_identity() {
        let mut rc = RateConverter::new(16_000, 16_000, 960).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        let out = rc.process(&samples);
        assert_eq!(out, samples);
    }

    #[test]
    fn ratio_48k_to_16k_correct_length() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        assert!(!rc.is_passthrough());
        let samples = vec![0.0f32; 960];
        let out = rc.process(&samples);
        assert!(!out.is_empty(), "expected non-empty output");
        let expected = 320usize;
        assert!(
            (out.len() as isize - expected as isize).unsigned_abs() <= 10,
            "output len={} expected≈{}",
            out.len(),
            expected
        );
    }

    #[test]
    fn partial_accumulation_returns_empty() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        let out = rc.process(&vec![0.0f32; 500]);
        assert!(out.is_empty(), "expected empty output for partial chunk");
    }

    #[test]
    fn convert_buffer_upsamples_to_expected_length() {
        let samples = vec![1000i16; 22_050];
        let out = convert_buffer_i16(&samples, 22_050, 16_000);
        assert_eq!(out.len(), 16_000);
    }

    #[test]
    fn convert_buffer_same_rate_is_identity() {
        let samples = vec![42i16; 100];
        assert_eq!(convert_buffer_i16(&samples, 16_000, 16_000), samples);
    }
}
